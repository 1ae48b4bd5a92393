//! Connection phase tracked by the lifecycle.

use std::fmt;

/// The single phase the lifecycle is in.
///
/// Written only by [`crate::Lifecycle::handle`]; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Waiting for the link to associate and obtain an address
    #[default]
    LinkConnecting,
    /// The last link poll reported a credential, access point or association failure
    LinkError,
    /// Link is up with an address (transient, immediately followed by a connect)
    LinkConnected,
    /// The stream was closed or dropped
    StreamDisconnected,
    /// A stream connect has been issued or is about to be retried
    StreamConnecting,
    /// The failure threshold was hit; waiting out the long backoff
    StreamConnectError,
    /// The stream is open (transient, the announcement is sent right away)
    StreamConnected,
    /// The announcement was rejected by the transport
    StreamSendError,
    /// The announcement was accepted by the transport
    StreamSent,
}

impl ConnectionState {
    /// Whether the state belongs to the link phase (polled by the timer)
    pub fn is_link_phase(&self) -> bool {
        matches!(
            self,
            ConnectionState::LinkConnecting | ConnectionState::LinkError
        )
    }

    /// Stable lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::LinkConnecting => "link-connecting",
            ConnectionState::LinkError => "link-error",
            ConnectionState::LinkConnected => "link-connected",
            ConnectionState::StreamDisconnected => "stream-disconnected",
            ConnectionState::StreamConnecting => "stream-connecting",
            ConnectionState::StreamConnectError => "stream-connect-error",
            ConnectionState::StreamConnected => "stream-connected",
            ConnectionState::StreamSendError => "stream-send-error",
            ConnectionState::StreamSent => "stream-sent",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
