//! TCP and TLS transport for the announcement stream.
//!
//! This module provides the client side only: a plain TCP dialer bound to the
//! descriptor's local port, and an optional TLS layer on top of it.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, warn};

use beacon_lifecycle::{ConnectionDescriptor, Protocol, TransportCode};

use crate::codes::code_for_io_error;

/// Unified stream type that can be either plain TCP or TLS
pub enum IoStream {
    /// Plain TCP stream
    Plain(TcpStream),
    /// TLS client stream
    #[cfg(feature = "tls")]
    TlsClient(tokio_rustls::client::TlsStream<TcpStream>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl IoStream {
    /// Get the peer address of the underlying stream
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            IoStream::Plain(stream) => stream.peer_addr(),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    /// Get the local address of the underlying stream
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            IoStream::Plain(stream) => stream.local_addr(),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => stream.get_ref().0.local_addr(),
        }
    }
}

/// Connect to `remote` from `local_port` (0 lets the OS choose)
///
/// A local port held by another socket is given up for an OS-assigned one.
pub async fn connect_tcp(local_port: u16, remote: SocketAddr) -> tokio::io::Result<TcpStream> {
    match connect_from(local_port, remote).await {
        Err(e) if local_port != 0 && e.kind() == ErrorKind::AddrInUse => {
            debug!("Local port {} busy ({}), letting the OS choose", local_port, e);
            connect_from(0, remote).await
        }
        result => result,
    }
}

async fn connect_from(local_port: u16, remote: SocketAddr) -> tokio::io::Result<TcpStream> {
    let (socket, local) = match remote {
        SocketAddr::V4(_) => (
            TcpSocket::new_v4()?,
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), local_port),
        ),
        SocketAddr::V6(_) => (
            TcpSocket::new_v6()?,
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), local_port),
        ),
    };
    socket.set_reuseaddr(true)?;
    socket.bind(local)?;
    socket.connect(remote).await
}

/// TLS client configuration for outbound connections
#[cfg(feature = "tls")]
#[derive(Clone)]
pub struct TlsClientConfig {
    /// Rustls client configuration
    pub client_config: std::sync::Arc<rustls::ClientConfig>,
    /// Server name for SNI
    pub server_name: String,
}

#[cfg(not(feature = "tls"))]
#[derive(Clone)]
/// TLS client configuration for outbound connections
pub struct TlsClientConfig;

/// Opens the stream described by a [`ConnectionDescriptor`]
#[derive(Clone, Default)]
pub struct Connector {
    tls: Option<TlsClientConfig>,
}

impl Connector {
    /// Plain TCP connector
    pub fn plain() -> Self {
        Self { tls: None }
    }

    /// TLS connector
    pub fn with_tls(tls: TlsClientConfig) -> Self {
        Self { tls: Some(tls) }
    }

    /// Whether streams can be wrapped in TLS
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether this connector can open streams of `protocol`
    pub fn supports(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::SecureStream => self.is_secure(),
            Protocol::PlainStream => true,
        }
    }

    /// Dial the descriptor's remote, then run the TLS handshake for a secure stream
    pub async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<IoStream, TransportCode> {
        if !self.supports(descriptor.protocol) {
            warn!("Secure stream requested without TLS configuration");
            return Err(TransportCode::Arg);
        }

        let tcp_stream = connect_tcp(descriptor.local_port, descriptor.remote)
            .await
            .map_err(|e| {
                warn!("TCP connect to {} failed: {}", descriptor.remote, e);
                code_for_io_error(&e)
            })?;
        debug!(
            "TCP connection established to {} from local port {}",
            descriptor.remote,
            tcp_stream.local_addr().map(|a| a.port()).unwrap_or(0)
        );

        if descriptor.protocol == Protocol::PlainStream {
            return Ok(IoStream::Plain(tcp_stream));
        }

        #[cfg_attr(not(feature = "tls"), allow(unused_variables))]
        let Some(tls_cfg) = &self.tls else {
            return Err(TransportCode::Arg);
        };

        #[cfg(feature = "tls")]
        {
            tls::connect_tls(tls_cfg.client_config.clone(), tcp_stream, &tls_cfg.server_name)
                .await
                .map_err(|e| {
                    warn!("TLS handshake failed to {}: {}", descriptor.remote, e);
                    code_for_io_error(&e)
                })
        }
        #[cfg(not(feature = "tls"))]
        {
            warn!("TLS requested but not compiled with TLS support");
            drop(tcp_stream);
            Err(TransportCode::Arg)
        }
    }
}

// TLS-specific functionality
#[cfg(feature = "tls")]
/// TLS client setup and handshake
pub mod tls {
    use super::*;
    use anyhow::{Context as AnyhowContext, Result};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use std::sync::Arc;
    use tokio_rustls::TlsConnector;
    use tracing::info;

    /// Client certificate chain and key for mutual TLS
    pub struct ClientIdentity<'a> {
        /// PEM certificate chain
        pub cert_chain_pem: &'a str,
        /// PEM PKCS#8 private key
        pub private_key_pem: &'a str,
    }

    /// Create a TLS client configuration trusting `ca_pem`, with optional client auth
    pub fn make_client_config(
        ca_pem: &str,
        identity: Option<ClientIdentity<'_>>,
    ) -> Result<ClientConfig> {
        info!("Creating TLS client configuration");

        // Install default crypto provider if not already set
        let _ = rustls::crypto::ring::default_provider().install_default();

        // Load CA certificates for server verification
        let mut roots = RootCertStore::empty();
        let ca_results: Result<Vec<_>, _> = rustls_pemfile::certs(&mut ca_pem.as_bytes()).collect();
        let ca_certs = ca_results.context("Failed to parse CA certificates")?;
        if ca_certs.is_empty() {
            anyhow::bail!("No CA certificates found");
        }

        for ca_cert in ca_certs {
            roots
                .add(CertificateDer::from(ca_cert))
                .context("Failed to add CA certificate to root store")?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);

        let Some(identity) = identity else {
            info!("TLS client configuration created (server auth only)");
            return Ok(builder.with_no_client_auth());
        };

        // Load client certificate chain
        let cert_results: Result<Vec<_>, _> =
            rustls_pemfile::certs(&mut identity.cert_chain_pem.as_bytes()).collect();
        let certs = cert_results
            .context("Failed to parse certificate chain")?
            .into_iter()
            .map(CertificateDer::from)
            .collect::<Vec<_>>();

        if certs.is_empty() {
            anyhow::bail!("No certificates found in certificate chain");
        }

        // Load private key
        let key = {
            let key_results: Result<Vec<_>, _> =
                rustls_pemfile::pkcs8_private_keys(&mut identity.private_key_pem.as_bytes())
                    .collect();
            let mut keys = key_results.context("Failed to parse private key")?;
            if keys.is_empty() {
                anyhow::bail!("No private key found");
            }
            PrivateKeyDer::from(keys.remove(0))
        };

        let config = builder
            .with_client_auth_cert(certs, key)
            .context("Failed to configure client certificate")?;

        info!("TLS client configuration created (mutual TLS)");
        Ok(config)
    }

    /// Run the TLS handshake over an established TCP stream
    pub async fn connect_tls(
        config: Arc<ClientConfig>,
        tcp_stream: TcpStream,
        sni: &str,
    ) -> std::io::Result<IoStream> {
        let peer_addr = tcp_stream.peer_addr()?;
        debug!("Connecting via TLS to {} (SNI: {})", peer_addr, sni);

        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(sni.to_owned()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid server name: {}", sni),
            )
        })?;

        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        debug!("TLS connection established to {}", peer_addr);
        Ok(IoStream::TlsClient(tls_stream))
    }
}
