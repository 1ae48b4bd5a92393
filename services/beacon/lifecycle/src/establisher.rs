//! Connection establisher: descriptor setup, connect request and announcement.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::code::TransportCode;
use crate::command::Command;
use crate::descriptor::{ConnId, ConnectionDescriptor, EphemeralPorts, Protocol};
use crate::error::LifecycleError;
use crate::state::ConnectionState;

/// Tag appended to the identity when none is configured
pub const DEFAULT_TAG: &str = "ESP8266";

/// Six-byte hardware address identifying the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(pub [u8; 6]);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for DeviceId {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| LifecycleError::DeviceId(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| LifecycleError::DeviceId(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(LifecycleError::DeviceId(s.to_string()));
        }
        Ok(DeviceId(bytes))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = LifecycleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// Fixed message sent on every successful connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Device identity
    pub identity: DeviceId,
    /// Fixed tag
    pub tag: String,
}

impl Announcement {
    /// Announcement with the default tag
    pub fn new(identity: DeviceId) -> Self {
        Self {
            identity,
            tag: DEFAULT_TAG.to_string(),
        }
    }

    /// Override the tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Wire bytes: `<identity>,<tag>`
    pub fn payload(&self) -> Bytes {
        Bytes::from(format!("{},{}", self.identity, self.tag))
    }
}

/// Immediate answer of the transport to a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    /// Connect is in flight; exactly one callback will follow
    Initiated,
    /// Refused synchronously; no callback will follow
    RejectedImmediately(TransportCode),
}

/// Immediate answer of the transport to a send request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Payload queued
    Accepted,
    /// Payload refused
    Rejected(TransportCode),
}

/// Builds descriptors and the commands for one connection attempt
#[derive(Debug, Clone)]
pub struct Establisher {
    remote: SocketAddr,
    announcement: Announcement,
    ports: EphemeralPorts,
    protocol: Protocol,
    next_id: u64,
}

impl Establisher {
    /// Establisher dialing `remote` and announcing `announcement`
    pub fn new(remote: SocketAddr, announcement: Announcement) -> Self {
        Self {
            remote,
            announcement,
            ports: EphemeralPorts::default(),
            protocol: Protocol::SecureStream,
            next_id: 1,
        }
    }

    /// Replace the port allocator
    pub fn with_ports(mut self, ports: EphemeralPorts) -> Self {
        self.ports = ports;
        self
    }

    /// Stream flavour written into every descriptor
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Fresh descriptor and the commands to start connecting it
    ///
    /// Callback registration is always ordered before the connect request.
    pub fn attempt(&mut self) -> (ConnectionDescriptor, Vec<Command>) {
        let descriptor = ConnectionDescriptor {
            id: ConnId(self.next_id),
            local_port: self.ports.allocate(),
            remote: self.remote,
            protocol: self.protocol,
        };
        self.next_id += 1;

        info!(
            "Start connecting {} from local port {} to {}",
            descriptor.id, descriptor.local_port, descriptor.remote
        );

        let commands = vec![
            Command::RegisterCallbacks { conn: descriptor.id },
            Command::Connect(descriptor),
        ];
        (descriptor, commands)
    }

    /// Commands to run once the stream is open
    pub fn on_connected(&self, conn: ConnId) -> Vec<Command> {
        vec![Command::Send {
            conn,
            payload: self.announcement.payload(),
        }]
    }

    /// State after the send result, plus the close request
    pub fn on_send_result(
        &self,
        conn: ConnId,
        result: SendResult,
    ) -> (ConnectionState, Vec<Command>) {
        let state = match result {
            SendResult::Accepted => {
                info!(
                    "Data sent on {}, payload: {},{}",
                    conn, self.announcement.identity, self.announcement.tag
                );
                ConnectionState::StreamSent
            }
            SendResult::Rejected(code) => {
                warn!("Error while sending data on {}: {}", conn, code);
                ConnectionState::StreamSendError
            }
        };
        debug!("Requesting close of {}", conn);
        (state, vec![Command::Close { conn }])
    }
}
