//! Mapping of host I/O errors onto transport codes.

use beacon_lifecycle::TransportCode;
use std::io::{Error, ErrorKind};

/// Closest transport code for an I/O error
pub fn code_for_io_error(err: &Error) -> TransportCode {
    match err.kind() {
        ErrorKind::TimedOut => TransportCode::Timeout,
        // The stack reports a refused connect as a reset
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => TransportCode::Rst,
        ErrorKind::ConnectionAborted | ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
            TransportCode::Abrt
        }
        ErrorKind::BrokenPipe => TransportCode::Clsd,
        ErrorKind::NotConnected => TransportCode::Conn,
        ErrorKind::AddrInUse => TransportCode::Use,
        ErrorKind::AddrNotAvailable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::HostUnreachable => TransportCode::Rte,
        ErrorKind::NetworkDown => TransportCode::If,
        ErrorKind::OutOfMemory => TransportCode::Mem,
        ErrorKind::InvalidInput => TransportCode::Arg,
        ErrorKind::WouldBlock => TransportCode::WouldBlock,
        _ => TransportCode::Abrt,
    }
}
