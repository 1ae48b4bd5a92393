//! Inputs that drive the lifecycle.

use crate::code::TransportCode;
use crate::descriptor::ConnId;
use crate::establisher::{AttemptResult, SendResult};
use crate::link::LinkReport;

/// Timer firings, collaborator results and transport callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Lifecycle start, schedules the first link poll
    Start,
    /// The lifecycle timer fired
    TimerFired,
    /// Result of a [`crate::Command::PollLink`]
    LinkPolled(LinkReport),
    /// Immediate result of a [`crate::Command::Connect`]
    ConnectIssued {
        /// Connection the result belongs to
        conn: ConnId,
        /// Accepted or refused
        result: AttemptResult,
    },
    /// Callback: the stream is open
    Connected {
        /// Connection the callback belongs to
        conn: ConnId,
    },
    /// Callback: the connect failed or the stream broke with an error
    ReconnectNeeded {
        /// Connection the callback belongs to
        conn: ConnId,
        /// Transport error
        code: TransportCode,
    },
    /// Callback: the stream closed cleanly
    Disconnected {
        /// Connection the callback belongs to
        conn: ConnId,
    },
    /// Immediate result of a [`crate::Command::Send`]
    SendIssued {
        /// Connection the result belongs to
        conn: ConnId,
        /// Accepted or refused
        result: SendResult,
    },
    /// Callback: previously accepted bytes were written out
    SendComplete {
        /// Connection the callback belongs to
        conn: ConnId,
    },
}

impl Event {
    /// Short name for transition logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::TimerFired => "timer-fired",
            Event::LinkPolled(_) => "link-polled",
            Event::ConnectIssued { .. } => "connect-issued",
            Event::Connected { .. } => "connected",
            Event::ReconnectNeeded { .. } => "reconnect-needed",
            Event::Disconnected { .. } => "disconnected",
            Event::SendIssued { .. } => "send-issued",
            Event::SendComplete { .. } => "send-complete",
        }
    }
}
