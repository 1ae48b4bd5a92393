//! # Beacon Platform
//!
//! Host side of the beacon connectivity lifecycle: a link probe, the TCP
//! and TLS transport, the single lifecycle timer and the [`Driver`] that
//! executes lifecycle commands on a tokio runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codes;
pub mod driver;
pub mod link;
pub mod timer;
pub mod transport;

pub use codes::code_for_io_error;
pub use driver::{Callback, Driver};
pub use link::{LinkService, RouteProbe, ScriptedLink};
pub use timer::LifecycleTimer;
pub use transport::{connect_tcp, Connector, IoStream, TlsClientConfig};

#[cfg(feature = "tls")]
pub use transport::tls::{connect_tls, make_client_config, ClientIdentity};
