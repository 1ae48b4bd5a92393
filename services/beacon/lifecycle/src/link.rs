//! Link monitor: classifies what the link service reports.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Association status as reported by the link service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not started
    Idle,
    /// Associating or waiting for an address
    Connecting,
    /// Access point rejected the credentials
    WrongPassword,
    /// Configured access point not visible
    NoApFound,
    /// Association failed for another reason
    ConnectFail,
    /// Fully negotiated, an address has been assigned
    GotIp,
}

/// One observation of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    /// Association status
    pub status: LinkStatus,
    /// Assigned station address, unspecified when none
    pub address: IpAddr,
}

impl LinkReport {
    /// A report with no address
    pub fn without_address(status: LinkStatus) -> Self {
        Self {
            status,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// A negotiated link with the given address
    pub fn got_ip(address: impl Into<IpAddr>) -> Self {
        Self {
            status: LinkStatus::GotIp,
            address: address.into(),
        }
    }
}

/// Classification of a [`LinkReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Link negotiated with a usable address
    GotAddress(IpAddr),
    /// Credentials rejected
    WrongCredentials,
    /// Access point not found
    NoAccessPointFound,
    /// Association failed
    ConnectFailed,
    /// Still associating, or negotiated without an address yet
    StillConnecting,
}

impl LinkOutcome {
    /// Whether the outcome is one of the link error classifications
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LinkOutcome::WrongCredentials
                | LinkOutcome::NoAccessPointFound
                | LinkOutcome::ConnectFailed
        )
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkOutcome::GotAddress(addr) => write!(f, "got address {}", addr),
            LinkOutcome::WrongCredentials => f.write_str("wrong password"),
            LinkOutcome::NoAccessPointFound => f.write_str("access point not found"),
            LinkOutcome::ConnectFailed => f.write_str("connect failed"),
            LinkOutcome::StillConnecting => f.write_str("connecting"),
        }
    }
}

/// Classify a link observation
///
/// A negotiated status only counts as up once the address is non-zero, so the
/// caller keeps polling instead of dialing without a source address.
pub fn classify(report: &LinkReport) -> LinkOutcome {
    match report.status {
        LinkStatus::GotIp if !report.address.is_unspecified() => {
            LinkOutcome::GotAddress(report.address)
        }
        LinkStatus::GotIp => LinkOutcome::StillConnecting,
        LinkStatus::WrongPassword => LinkOutcome::WrongCredentials,
        LinkStatus::NoApFound => LinkOutcome::NoAccessPointFound,
        LinkStatus::ConnectFail => LinkOutcome::ConnectFailed,
        LinkStatus::Idle | LinkStatus::Connecting => LinkOutcome::StillConnecting,
    }
}
