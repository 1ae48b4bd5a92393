//! Beacon binary.
//!
//! Waits for the network link, opens one (optionally TLS) connection to the
//! configured endpoint, announces the device identity and closes, retrying
//! failed connects with a two-tier backoff.

use beacon_lifecycle::{ConnectionState, Lifecycle};
use beacon_platform::{Connector, Driver, RouteProbe, TlsClientConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::BeaconConfig;
use logging::BeaconLogFormatter;

#[cfg(feature = "tls")]
use beacon_platform::{make_client_config, ClientIdentity};

/// Device announcement client with two-tier reconnect
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Announce this device to a remote endpoint")]
struct Args {
    /// Remote endpoint, e.g. 192.168.4.1:8443
    #[arg(long)]
    remote: Option<std::net::SocketAddr>,

    /// Device identity in MAC notation, e.g. 5c:cf:7f:01:a2:ff
    #[arg(long)]
    device_id: Option<String>,

    /// Tag appended to the identity
    #[arg(long)]
    tag: Option<String>,

    /// Link poll interval, e.g. 1s
    #[arg(long)]
    link_poll_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    verbose: bool,

    /// Exit once the announcement connection has closed
    #[arg(long)]
    once: bool,

    // TLS options
    /// Force TLS on, even when the config file turns it off
    #[arg(long, conflicts_with = "no_tls")]
    tls: bool,

    /// Send the announcement over plain TCP
    #[arg(long)]
    no_tls: bool,

    /// Path to CA certificate file (PEM format)
    #[arg(long, conflicts_with = "no_tls")]
    tls_ca: Option<PathBuf>,

    /// Path to client certificate file for mutual TLS (PEM format)
    #[arg(long, conflicts_with = "no_tls")]
    tls_cert: Option<PathBuf>,

    /// Path to client private key file for mutual TLS (PEM format)
    #[arg(long, conflicts_with = "no_tls")]
    tls_key: Option<PathBuf>,

    /// Server name for TLS SNI
    #[arg(long, conflicts_with = "no_tls")]
    tls_sni: Option<String>,

    /// Configuration file path
    #[arg(long, default_value = "beacon.yaml")]
    config: PathBuf,
}

impl Args {
    /// Command line values win over file and environment
    fn apply_to(&self, config: &mut BeaconConfig) {
        if let Some(remote) = self.remote {
            config.remote_addr = remote.to_string();
        }
        if let Some(device_id) = &self.device_id {
            config.device_id = device_id.clone();
        }
        if let Some(tag) = &self.tag {
            config.tag = tag.clone();
        }
        if let Some(interval) = self.link_poll_interval {
            config.timings.link_poll_ms = Duration::from(interval).as_millis() as u64;
        }
        if self.tls {
            config.tls.enabled = true;
        }
        if self.no_tls {
            config.tls.enabled = false;
        }
        if let Some(ca) = &self.tls_ca {
            config.tls.ca_file = ca.to_string_lossy().into_owned();
        }
        if let Some(cert) = &self.tls_cert {
            config.tls.cert_file = cert.to_string_lossy().into_owned();
        }
        if let Some(key) = &self.tls_key {
            config.tls.key_file = key.to_string_lossy().into_owned();
        }
        if let Some(sni) = &self.tls_sni {
            config.server_name = Some(sni.clone());
        }
    }

    fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = args.effective_log_level();
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("beacon={}", log_level).parse()?)
        .add_directive(format!("beacon_lifecycle={}", log_level).parse()?)
        .add_directive(format!("beacon_platform={}", log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(BeaconLogFormatter::new("beacon"))
        .init();

    info!("Starting beacon v{}", env!("CARGO_PKG_VERSION"));

    let mut beacon_config = BeaconConfig::load_from_file(&args.config)?;
    args.apply_to(&mut beacon_config);

    let lifecycle_config = beacon_config.to_lifecycle_config()?;
    let remote = lifecycle_config.remote;

    let connector = if beacon_config.tls.enabled {
        Connector::with_tls(load_tls(&beacon_config).await?)
    } else {
        Connector::plain()
    };

    component_info!(
        "config",
        "Remote endpoint: {} (TLS: {})",
        remote,
        connector.is_secure()
    );
    component_info!(
        "config",
        "Identity: {}, tag: {}",
        lifecycle_config.announcement.identity,
        lifecycle_config.announcement.tag
    );
    component_info!(
        "config",
        "Link poll {:?}, backoff {:?} x{} then {:?}",
        lifecycle_config.timings.link_poll,
        lifecycle_config.timings.short_backoff,
        lifecycle_config.timings.failure_threshold - 1,
        lifecycle_config.timings.long_backoff
    );

    let driver = Driver::new(
        Lifecycle::new(lifecycle_config),
        RouteProbe::new(remote),
        connector,
    );

    let mut states = driver.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::LinkError | ConnectionState::StreamConnectError => {
                    component_warn!("lifecycle", "State: {}", state)
                }
                _ => component_info!("lifecycle", "State: {}", state),
            }
        }
    });

    let shutdown = shutdown_signal(driver.subscribe(), args.once);
    let lifecycle = driver.run(shutdown).await;

    info!(
        "Beacon stopped in state {} ({} consecutive failures)",
        lifecycle.state(),
        lifecycle.retries()
    );
    Ok(())
}

/// Resolve on Ctrl-C, or with `once` after the announcement connection closed
async fn shutdown_signal(mut state: watch::Receiver<ConnectionState>, once: bool) {
    let disconnected = async {
        if once
            && state
                .wait_for(|s| *s == ConnectionState::StreamDisconnected)
                .await
                .is_ok()
        {
            component_info!("driver", "Announcement connection closed, exiting");
            return;
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = disconnected => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => component_error!("driver", "Failed to listen for Ctrl-C: {}", e),
        },
    }
}

#[cfg(feature = "tls")]
async fn load_tls(config: &BeaconConfig) -> anyhow::Result<TlsClientConfig> {
    use anyhow::Context;
    use std::sync::Arc;

    let tls = &config.tls;
    if tls.ca_file.is_empty() {
        anyhow::bail!("TLS enabled but no CA certificate configured (--tls-ca)");
    }

    info!(
        "Loading TLS configuration from ca={:?}, cert={:?}, key={:?}",
        tls.ca_file, tls.cert_file, tls.key_file
    );

    let ca_pem = tokio::fs::read_to_string(&tls.ca_file)
        .await
        .with_context(|| format!("Failed to read CA file {:?}", tls.ca_file))?;

    let identity_pem = match (tls.cert_file.is_empty(), tls.key_file.is_empty()) {
        (true, true) => None,
        (false, false) => {
            let cert_pem = tokio::fs::read_to_string(&tls.cert_file)
                .await
                .with_context(|| {
                    format!("Failed to read certificate file {:?}", tls.cert_file)
                })?;
            let key_pem = tokio::fs::read_to_string(&tls.key_file)
                .await
                .with_context(|| {
                    format!("Failed to read private key file {:?}", tls.key_file)
                })?;
            Some((cert_pem, key_pem))
        }
        _ => anyhow::bail!("Mutual TLS needs both --tls-cert and --tls-key"),
    };

    let identity = identity_pem.as_ref().map(|(cert, key)| ClientIdentity {
        cert_chain_pem: cert,
        private_key_pem: key,
    });
    let client_config = make_client_config(&ca_pem, identity)?;

    info!("TLS configuration loaded successfully");
    Ok(TlsClientConfig {
        client_config: Arc::new(client_config),
        server_name: config.server_name()?,
    })
}

#[cfg(not(feature = "tls"))]
async fn load_tls(_config: &BeaconConfig) -> anyhow::Result<TlsClientConfig> {
    anyhow::bail!("TLS requested but not compiled with TLS support. Build with --features tls")
}
