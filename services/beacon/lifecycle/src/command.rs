//! Side effects requested by the lifecycle, executed by a driver.

use bytes::Bytes;
use std::time::Duration;

use crate::descriptor::{ConnId, ConnectionDescriptor};

/// One side effect, executed in the order it was emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Cancel any pending timer firing (no-op when nothing is armed)
    DisarmTimer,
    /// Schedule the lifecycle timer
    ArmTimer {
        /// Delay until the firing
        delay: Duration,
        /// Re-fire every `delay` until disarmed
        repeat: bool,
    },
    /// Read the link status and feed back [`crate::Event::LinkPolled`]
    PollLink,
    /// Route connect/reconnect/disconnect callbacks for `conn` to the lifecycle
    RegisterCallbacks {
        /// Connection the callbacks belong to
        conn: ConnId,
    },
    /// Issue the connect and feed back [`crate::Event::ConnectIssued`]
    Connect(ConnectionDescriptor),
    /// Send bytes and feed back [`crate::Event::SendIssued`]
    Send {
        /// Connection to write to
        conn: ConnId,
        /// Bytes to write
        payload: Bytes,
    },
    /// Gracefully close the stream
    Close {
        /// Connection to close
        conn: ConnId,
    },
}

impl Command {
    /// One-shot timer arm
    pub fn arm_once(delay: Duration) -> Self {
        Command::ArmTimer {
            delay,
            repeat: false,
        }
    }
}
