//! Sans-io lifecycle state machine, link classification and reconnect policy for beacon.
//!
//! The lifecycle brings a device from "link down" to "announcement delivered":
//! it polls the link until an address is assigned, opens one secure stream to
//! the configured endpoint, sends the announcement payload and closes. Failed
//! connects are retried with a two-tier backoff.
//!
//! Nothing in this crate performs I/O. Timer firings, collaborator results and
//! transport callbacks go in as [`Event`]s; side effects come out as
//! [`Command`]s for a driver to execute.
//!
//! ## Example
//!
//! ```rust
//! use beacon_lifecycle::{
//!     Announcement, Command, ConnectionState, Event, Lifecycle, LifecycleConfig, LinkReport,
//!     Timings,
//! };
//! use std::net::Ipv4Addr;
//!
//! # fn main() -> Result<(), beacon_lifecycle::LifecycleError> {
//! let config = LifecycleConfig::new(
//!     "10.0.0.1:8443".parse().unwrap(),
//!     Announcement::new("5c:cf:7f:01:a2:ff".parse()?),
//!     Timings::default(),
//! )?;
//! let mut lifecycle = Lifecycle::new(config);
//!
//! lifecycle.handle(Event::Start);
//! let step = lifecycle.handle(Event::TimerFired);
//! assert_eq!(step.commands, vec![Command::PollLink]);
//!
//! let step = lifecycle.handle(Event::LinkPolled(LinkReport::got_ip(Ipv4Addr::new(10, 0, 0, 5))));
//! assert_eq!(step.state, ConnectionState::StreamConnecting);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod code;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod establisher;
pub mod event;
pub mod link;
pub mod machine;
pub mod reconnect;
pub mod state;

// Re-export main types
pub use code::TransportCode;
pub use command::Command;
pub use config::{
    LifecycleConfig, Timings, FAILURE_THRESHOLD, LINK_POLL_INTERVAL, LONG_BACKOFF,
    REJECT_RETRY_DELAY, SHORT_BACKOFF,
};
pub use descriptor::{ConnId, ConnectionDescriptor, EphemeralPorts, Protocol};
pub use error::LifecycleError;
pub use establisher::{Announcement, AttemptResult, DeviceId, Establisher, SendResult, DEFAULT_TAG};
pub use event::Event;
pub use link::{classify, LinkOutcome, LinkReport, LinkStatus};
pub use machine::{Lifecycle, Step};
pub use reconnect::{next_delay, Backoff, ReconnectPolicy, RetryCounter};
pub use state::ConnectionState;
