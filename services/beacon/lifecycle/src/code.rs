//! Result codes reported by the transport collaborator.
//!
//! The numbering follows the embedded TCP/IP stack the device firmware runs
//! on, so codes coming from real hardware can be logged unchanged.

use std::fmt;

/// Transport status code carried by immediate results and callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCode {
    /// No error
    Ok,
    /// Out of memory
    Mem,
    /// Buffer error
    Buf,
    /// Timeout
    Timeout,
    /// Routing problem
    Rte,
    /// Operation in progress
    InProgress,
    /// Illegal value
    Val,
    /// Operation would block
    WouldBlock,
    /// Connection aborted
    Abrt,
    /// Connection reset
    Rst,
    /// Connection closed
    Clsd,
    /// Not connected
    Conn,
    /// Illegal argument
    Arg,
    /// Address in use
    Use,
    /// Low-level netif error
    If,
    /// Already connected
    IsConn,
    /// A code outside the known table
    Other(i8),
}

impl TransportCode {
    /// Decode a raw stack code
    pub fn from_raw(raw: i8) -> Self {
        match raw {
            0 => TransportCode::Ok,
            -1 => TransportCode::Mem,
            -2 => TransportCode::Buf,
            -3 => TransportCode::Timeout,
            -4 => TransportCode::Rte,
            -5 => TransportCode::InProgress,
            -6 => TransportCode::Val,
            -7 => TransportCode::WouldBlock,
            -8 => TransportCode::Abrt,
            -9 => TransportCode::Rst,
            -10 => TransportCode::Clsd,
            -11 => TransportCode::Conn,
            -12 => TransportCode::Arg,
            -13 => TransportCode::Use,
            -14 => TransportCode::If,
            -15 => TransportCode::IsConn,
            other => TransportCode::Other(other),
        }
    }

    /// Raw stack code
    pub fn raw(&self) -> i8 {
        match self {
            TransportCode::Ok => 0,
            TransportCode::Mem => -1,
            TransportCode::Buf => -2,
            TransportCode::Timeout => -3,
            TransportCode::Rte => -4,
            TransportCode::InProgress => -5,
            TransportCode::Val => -6,
            TransportCode::WouldBlock => -7,
            TransportCode::Abrt => -8,
            TransportCode::Rst => -9,
            TransportCode::Clsd => -10,
            TransportCode::Conn => -11,
            TransportCode::Arg => -12,
            TransportCode::Use => -13,
            TransportCode::If => -14,
            TransportCode::IsConn => -15,
            TransportCode::Other(raw) => *raw,
        }
    }

    /// Human-readable description, `?` for unknown codes
    pub fn description(&self) -> &'static str {
        match self {
            TransportCode::Ok => "Ok",
            TransportCode::Mem => "Out of memory error",
            TransportCode::Buf => "Buffer error",
            TransportCode::Timeout => "Timeout",
            TransportCode::Rte => "Routing problem",
            TransportCode::InProgress => "Operation in progress",
            TransportCode::Val => "Illegal value",
            TransportCode::WouldBlock => "Operation would block",
            TransportCode::Abrt => "Connection aborted",
            TransportCode::Rst => "Connection reset",
            TransportCode::Clsd => "Connection closed",
            TransportCode::Conn => "Not connected",
            TransportCode::Arg => "Illegal argument",
            TransportCode::Use => "Address in use",
            TransportCode::If => "Low-level netif error",
            TransportCode::IsConn => "Already connected",
            TransportCode::Other(_) => "?",
        }
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.raw(), self.description())
    }
}
