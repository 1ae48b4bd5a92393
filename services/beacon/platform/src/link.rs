//! Link services: where link status reports come from.

use beacon_lifecycle::{LinkReport, LinkStatus};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use tracing::debug;

/// Source of link status reports, polled on every link timer tick
pub trait LinkService: Send {
    /// Current association status and assigned address
    fn poll_status(&mut self) -> LinkReport;
}

/// Host link probe
///
/// Asks the routing table which local address would carry traffic to the
/// target. A UDP `connect` only selects a route, no packet is sent.
#[derive(Debug, Clone)]
pub struct RouteProbe {
    target: SocketAddr,
}

impl RouteProbe {
    /// Probe the route towards `target`
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }

    fn local_address(&self) -> std::io::Result<IpAddr> {
        let bind: SocketAddr = match self.target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(self.target)?;
        Ok(socket.local_addr()?.ip())
    }
}

impl LinkService for RouteProbe {
    fn poll_status(&mut self) -> LinkReport {
        match self.local_address() {
            Ok(address) => LinkReport::got_ip(address),
            Err(e) => {
                debug!("Route probe towards {} failed: {}", self.target, e);
                match e.kind() {
                    ErrorKind::NetworkUnreachable
                    | ErrorKind::HostUnreachable
                    | ErrorKind::AddrNotAvailable
                    | ErrorKind::NetworkDown => LinkReport::without_address(LinkStatus::Connecting),
                    _ => LinkReport::without_address(LinkStatus::ConnectFail),
                }
            }
        }
    }
}

/// Link service replaying a fixed sequence of reports
///
/// Once the script is exhausted the last report repeats.
#[derive(Debug, Clone)]
pub struct ScriptedLink {
    script: VecDeque<LinkReport>,
    last: LinkReport,
}

impl ScriptedLink {
    /// Replay `reports` in order
    pub fn new(reports: impl IntoIterator<Item = LinkReport>) -> Self {
        Self {
            script: reports.into_iter().collect(),
            last: LinkReport::without_address(LinkStatus::Idle),
        }
    }
}

impl LinkService for ScriptedLink {
    fn poll_status(&mut self) -> LinkReport {
        if let Some(report) = self.script.pop_front() {
            self.last = report;
        }
        self.last
    }
}
