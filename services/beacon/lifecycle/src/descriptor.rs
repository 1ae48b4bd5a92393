//! Identity of the one managed connection.

use std::fmt;
use std::net::SocketAddr;

/// First port of the ephemeral range
pub const EPHEMERAL_PORT_MIN: u16 = 49152;
/// Last port of the ephemeral range
pub const EPHEMERAL_PORT_MAX: u16 = 65535;

/// Back-reference carried by every transport callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Protocol family of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Encrypted byte stream over TCP
    #[default]
    SecureStream,
    /// Unencrypted byte stream over TCP
    PlainStream,
}

/// Connection identity, re-populated on every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Callback back-reference
    pub id: ConnId,
    /// Local ephemeral port
    pub local_port: u16,
    /// Remote address and port
    pub remote: SocketAddr,
    /// Stream flavour the transport must open
    pub protocol: Protocol,
}

/// Rolling allocator over the ephemeral port range
#[derive(Debug, Clone)]
pub struct EphemeralPorts {
    next: u16,
}

impl Default for EphemeralPorts {
    fn default() -> Self {
        Self::starting_at(EPHEMERAL_PORT_MIN)
    }
}

impl EphemeralPorts {
    /// Allocator whose first port is `port`, clamped into the range
    pub fn starting_at(port: u16) -> Self {
        Self {
            next: port.max(EPHEMERAL_PORT_MIN),
        }
    }

    /// Next port, wrapping back to the start of the range
    pub fn allocate(&mut self) -> u16 {
        let port = self.next;
        self.next = if port == EPHEMERAL_PORT_MAX {
            EPHEMERAL_PORT_MIN
        } else {
            port + 1
        };
        port
    }
}
