//! The lifecycle state machine.
//!
//! [`Lifecycle`] owns every piece of mutable lifecycle state. It never performs
//! I/O: each [`Event`] produces a [`Step`] holding the new state and the
//! [`Command`]s the driver must execute, in order.

use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::code::TransportCode;
use crate::command::Command;
use crate::config::{LifecycleConfig, Timings};
use crate::descriptor::{ConnId, ConnectionDescriptor};
use crate::establisher::{AttemptResult, Establisher};
use crate::event::Event;
use crate::link::{classify, LinkOutcome, LinkReport};
use crate::reconnect::{ReconnectPolicy, RetryCounter};
use crate::state::ConnectionState;

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// State after the event
    pub state: ConnectionState,
    /// Side effects to execute, in order
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerSlot {
    Disarmed,
    Armed { repeat: bool },
}

/// Lifecycle context: state, retry counter, descriptor slot and timer bookkeeping
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    retries: RetryCounter,
    policy: ReconnectPolicy,
    timings: Timings,
    establisher: Establisher,
    descriptor: Option<ConnectionDescriptor>,
    timer: TimerSlot,
    started: bool,
    /// A poll was requested and its result not yet seen
    awaiting_poll: bool,
    /// A poll reported no usable address since the last `GotAddress`
    link_lost: bool,
}

impl Lifecycle {
    /// New lifecycle in [`ConnectionState::LinkConnecting`]
    pub fn new(config: LifecycleConfig) -> Self {
        Self::with_establisher(
            config.timings,
            Establisher::new(config.remote, config.announcement).with_protocol(config.protocol),
        )
    }

    /// New lifecycle with a prepared establisher
    pub fn with_establisher(timings: Timings, establisher: Establisher) -> Self {
        Self {
            state: ConnectionState::LinkConnecting,
            retries: RetryCounter::default(),
            policy: ReconnectPolicy::new(&timings),
            timings,
            establisher,
            descriptor: None,
            timer: TimerSlot::Disarmed,
            started: false,
            awaiting_poll: false,
            link_lost: false,
        }
    }

    /// Current phase
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive stream-connect failures
    pub fn retries(&self) -> u32 {
        self.retries.get()
    }

    /// Descriptor of the connection in flight, if any
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.descriptor.as_ref()
    }

    /// Whether the lifecycle expects a timer firing
    pub fn timer_armed(&self) -> bool {
        matches!(self.timer, TimerSlot::Armed { .. })
    }

    /// Feed one event through the machine
    pub fn handle(&mut self, event: Event) -> Step {
        let from = self.state;
        let name = event.name();

        let commands = match event {
            Event::Start => self.on_start(),
            Event::TimerFired => self.on_timer_fired(),
            Event::LinkPolled(report) => self.on_link_polled(report),
            Event::ConnectIssued { conn, result } => self.on_connect_issued(conn, result),
            Event::Connected { conn } => self.on_connected(conn),
            Event::SendIssued { conn, result } => {
                if self.is_current(conn, name) {
                    let (state, commands) = self.establisher.on_send_result(conn, result);
                    self.state = state;
                    commands
                } else {
                    Vec::new()
                }
            }
            Event::SendComplete { conn } => {
                if self.is_current(conn, name) {
                    debug!("Send on {} completed", conn);
                }
                Vec::new()
            }
            Event::ReconnectNeeded { conn, code } => self.on_reconnect_needed(conn, code),
            Event::Disconnected { conn } => self.on_disconnected(conn),
        };

        if from != self.state {
            debug!(from = %from, to = %self.state, event = name, "state transition");
        } else {
            trace!(state = %self.state, event = name, "no transition");
        }

        Step {
            state: self.state,
            commands,
        }
    }

    fn on_start(&mut self) -> Vec<Command> {
        if self.started {
            warn!("Lifecycle already started, ignoring start");
            return Vec::new();
        }
        self.started = true;
        self.state = ConnectionState::LinkConnecting;
        info!("Waiting for link, first poll in {:?}", self.timings.link_poll);
        self.rearm(self.timings.link_poll)
    }

    fn on_timer_fired(&mut self) -> Vec<Command> {
        match self.timer {
            TimerSlot::Disarmed => {
                debug!("Timer fired while disarmed, ignoring");
                return Vec::new();
            }
            TimerSlot::Armed { repeat: false } => self.timer = TimerSlot::Disarmed,
            TimerSlot::Armed { repeat: true } => {}
        }

        if !self.state.is_link_phase() {
            self.state = ConnectionState::LinkConnecting;
        }
        self.awaiting_poll = true;
        vec![Command::PollLink]
    }

    fn on_link_polled(&mut self, report: LinkReport) -> Vec<Command> {
        if !self.awaiting_poll {
            warn!("Unrequested link report {:?}, ignoring", report);
            return Vec::new();
        }
        self.awaiting_poll = false;

        let outcome = classify(&report);
        match outcome {
            LinkOutcome::GotAddress(addr) => {
                if self.link_lost {
                    self.retries.reset();
                    self.link_lost = false;
                }
                let from = self.state;
                self.state = ConnectionState::LinkConnected;
                debug!(
                    from = %from,
                    to = %self.state,
                    event = "link-polled",
                    "state transition"
                );
                info!("Link connected with address {}", addr);

                let (descriptor, commands) = self.establisher.attempt();
                self.descriptor = Some(descriptor);
                self.state = ConnectionState::StreamConnecting;
                commands
            }
            outcome if outcome.is_error() => {
                self.link_lost = true;
                self.state = ConnectionState::LinkError;
                warn!("Link error: {}", outcome);
                self.rearm(self.timings.link_poll)
            }
            _ => {
                self.link_lost = true;
                debug!("Link connecting...");
                self.rearm(self.timings.link_poll)
            }
        }
    }

    fn on_connect_issued(&mut self, conn: ConnId, result: AttemptResult) -> Vec<Command> {
        if !self.is_current(conn, "connect-issued") {
            return Vec::new();
        }
        match result {
            AttemptResult::Initiated => {
                debug!("Connect for {} in flight", conn);
                Vec::new()
            }
            AttemptResult::RejectedImmediately(code) => {
                warn!(
                    "Connect for {} refused: {}; re-verifying link in {:?}",
                    conn, code, self.timings.reject_retry
                );
                self.descriptor = None;
                self.state = ConnectionState::LinkConnecting;
                self.rearm(self.timings.reject_retry)
            }
        }
    }

    fn on_connected(&mut self, conn: ConnId) -> Vec<Command> {
        if !self.is_current(conn, "connected") {
            return Vec::new();
        }
        self.retries.reset();
        self.state = ConnectionState::StreamConnected;
        info!("Stream {} connected, sending announcement", conn);
        self.establisher.on_connected(conn)
    }

    fn on_reconnect_needed(&mut self, conn: ConnId, code: TransportCode) -> Vec<Command> {
        if !self.is_current(conn, "reconnect-needed") {
            return Vec::new();
        }
        warn!("Connection error on {}: {}", conn, code);
        self.descriptor = None;

        let failures = self.retries.increment();
        let backoff = self.policy.next_delay(failures);
        if backoff.reset {
            self.retries.reset();
            self.state = ConnectionState::StreamConnectError;
            warn!(
                "{} failed connection attempts, will reconnect in {:?}",
                failures, backoff.delay
            );
        } else {
            self.state = ConnectionState::StreamConnecting;
            info!("Will reconnect in {:?} (failure {})", backoff.delay, failures);
        }
        self.rearm(backoff.delay)
    }

    fn on_disconnected(&mut self, conn: ConnId) -> Vec<Command> {
        if !self.is_current(conn, "disconnected") {
            return Vec::new();
        }
        self.descriptor = None;
        self.state = ConnectionState::StreamDisconnected;
        info!("Stream {} disconnected", conn);
        Vec::new()
    }

    fn is_current(&self, conn: ConnId, event: &str) -> bool {
        let current = self.descriptor.map(|d| d.id);
        if current == Some(conn) {
            true
        } else {
            debug!("Ignoring {} for stale {} (current: {:?})", event, conn, current);
            false
        }
    }

    fn rearm(&mut self, delay: Duration) -> Vec<Command> {
        self.timer = TimerSlot::Armed { repeat: false };
        vec![Command::DisarmTimer, Command::arm_once(delay)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::establisher::{Announcement, SendResult};
    use crate::link::LinkStatus;
    use std::net::Ipv4Addr;

    fn lifecycle() -> Lifecycle {
        let config = LifecycleConfig::new(
            "10.0.0.1:8443".parse().unwrap(),
            Announcement::new("5c:cf:7f:01:a2:ff".parse().unwrap()),
            Timings::default(),
        )
        .unwrap();
        Lifecycle::new(config)
    }

    fn armed_delay(step: &Step) -> Option<Duration> {
        step.commands.iter().find_map(|c| match c {
            Command::ArmTimer { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    fn connect_of(step: &Step) -> Option<ConnectionDescriptor> {
        step.commands.iter().find_map(|c| match c {
            Command::Connect(d) => Some(*d),
            _ => None,
        })
    }

    fn got_ip() -> LinkReport {
        LinkReport::got_ip(Ipv4Addr::new(10, 0, 0, 5))
    }

    /// Fire the timer, report an address, accept the connect
    fn dial(lc: &mut Lifecycle) -> ConnId {
        assert_eq!(lc.handle(Event::TimerFired).commands, vec![Command::PollLink]);
        let step = lc.handle(Event::LinkPolled(got_ip()));
        let conn = connect_of(&step).expect("connect command").id;
        let step = lc.handle(Event::ConnectIssued {
            conn,
            result: AttemptResult::Initiated,
        });
        assert!(step.commands.is_empty());
        assert_eq!(step.state, ConnectionState::StreamConnecting);
        conn
    }

    #[test]
    fn test_start_arms_first_poll() {
        let mut lc = lifecycle();
        assert_eq!(lc.state(), ConnectionState::LinkConnecting);

        let step = lc.handle(Event::Start);
        assert_eq!(step.state, ConnectionState::LinkConnecting);
        assert_eq!(
            step.commands,
            vec![Command::DisarmTimer, Command::arm_once(Duration::from_millis(1000))]
        );
        assert!(lc.timer_armed());

        // Second start is a no-op
        assert!(lc.handle(Event::Start).commands.is_empty());
    }

    #[test]
    fn test_still_connecting_then_address() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);

        let mut states = Vec::new();
        for _ in 0..5 {
            lc.handle(Event::TimerFired);
            let step = lc.handle(Event::LinkPolled(LinkReport::without_address(
                LinkStatus::Connecting,
            )));
            assert_eq!(armed_delay(&step), Some(Duration::from_millis(1000)));
            states.push(step.state);
        }
        lc.handle(Event::TimerFired);
        let step = lc.handle(Event::LinkPolled(got_ip()));
        states.push(step.state);

        assert_eq!(states[..5], [ConnectionState::LinkConnecting; 5]);
        assert_eq!(states[5], ConnectionState::StreamConnecting);

        let descriptor = connect_of(&step).unwrap();
        assert_eq!(descriptor.remote, "10.0.0.1:8443".parse().unwrap());
        assert_eq!(
            step.commands[0],
            Command::RegisterCallbacks {
                conn: descriptor.id
            }
        );
        assert!(!lc.timer_armed());
    }

    #[test]
    fn test_got_ip_without_address_keeps_polling() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        lc.handle(Event::TimerFired);
        let step = lc.handle(Event::LinkPolled(LinkReport::without_address(LinkStatus::GotIp)));
        assert_eq!(step.state, ConnectionState::LinkConnecting);
        assert!(connect_of(&step).is_none());
        assert_eq!(armed_delay(&step), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_connect_and_send_success() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        let conn = dial(&mut lc);

        let step = lc.handle(Event::Connected { conn });
        assert_eq!(step.state, ConnectionState::StreamConnected);
        assert_eq!(
            step.commands,
            vec![Command::Send {
                conn,
                payload: bytes::Bytes::from_static(b"5c:cf:7f:01:a2:ff,ESP8266"),
            }]
        );

        let step = lc.handle(Event::SendIssued {
            conn,
            result: SendResult::Accepted,
        });
        assert_eq!(step.state, ConnectionState::StreamSent);
        assert_eq!(step.commands, vec![Command::Close { conn }]);
        assert_eq!(lc.retries(), 0);

        let step = lc.handle(Event::SendComplete { conn });
        assert_eq!(step.state, ConnectionState::StreamSent);
        assert!(step.commands.is_empty());

        let step = lc.handle(Event::Disconnected { conn });
        assert_eq!(step.state, ConnectionState::StreamDisconnected);
        assert!(step.commands.is_empty());
        assert!(!lc.timer_armed());
        assert!(lc.descriptor().is_none());
    }

    #[test]
    fn test_send_rejected_still_closes() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        let conn = dial(&mut lc);
        lc.handle(Event::Connected { conn });

        let step = lc.handle(Event::SendIssued {
            conn,
            result: SendResult::Rejected(TransportCode::Mem),
        });
        assert_eq!(step.state, ConnectionState::StreamSendError);
        assert_eq!(step.commands, vec![Command::Close { conn }]);
    }

    #[test]
    fn test_five_connect_failures_escalate() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);

        let mut delays = Vec::new();
        let mut last = None;
        for _ in 0..5 {
            let conn = dial(&mut lc);
            let step = lc.handle(Event::ReconnectNeeded {
                conn,
                code: TransportCode::Rst,
            });
            delays.push(armed_delay(&step).unwrap());
            last = Some(step);
        }

        let ms = |n| Duration::from_millis(n);
        assert_eq!(delays, vec![ms(2000), ms(2000), ms(2000), ms(2000), ms(10000)]);
        assert_eq!(last.unwrap().state, ConnectionState::StreamConnectError);
        assert_eq!(lc.retries(), 0);

        // The long backoff expiry re-drives the link poll from scratch
        let step = lc.handle(Event::TimerFired);
        assert_eq!(step.state, ConnectionState::LinkConnecting);
        assert_eq!(step.commands, vec![Command::PollLink]);
    }

    #[test]
    fn test_short_tier_stays_stream_connecting() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        let conn = dial(&mut lc);
        let step = lc.handle(Event::ReconnectNeeded {
            conn,
            code: TransportCode::Timeout,
        });
        assert_eq!(step.state, ConnectionState::StreamConnecting);
        assert_eq!(lc.retries(), 1);
        assert!(lc.descriptor().is_none());
    }

    #[test]
    fn test_error_after_stream_opened_backs_off() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);

        for send in [None, Some(SendResult::Accepted)] {
            let conn = dial(&mut lc);
            let step = lc.handle(Event::Connected { conn });
            assert_eq!(step.state, ConnectionState::StreamConnected);
            assert_eq!(lc.retries(), 0);
            if let Some(result) = send {
                let step = lc.handle(Event::SendIssued { conn, result });
                assert_eq!(step.state, ConnectionState::StreamSent);
            }

            let step = lc.handle(Event::ReconnectNeeded {
                conn,
                code: TransportCode::Rst,
            });
            assert_eq!(step.state, ConnectionState::StreamConnecting);
            assert_eq!(
                step.commands,
                vec![Command::DisarmTimer, Command::arm_once(Duration::from_millis(2000))]
            );
            assert_eq!(lc.retries(), 1);
            assert!(lc.descriptor().is_none());

            // The close that follows the error belongs to a finished attempt
            let step = lc.handle(Event::Disconnected { conn });
            assert_eq!(step.state, ConnectionState::StreamConnecting);
            assert!(step.commands.is_empty());
            assert!(lc.timer_armed());
        }
    }

    #[test]
    fn test_success_resets_retries() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        for _ in 0..3 {
            let conn = dial(&mut lc);
            lc.handle(Event::ReconnectNeeded {
                conn,
                code: TransportCode::Rst,
            });
        }
        assert_eq!(lc.retries(), 3);

        let conn = dial(&mut lc);
        lc.handle(Event::Connected { conn });
        assert_eq!(lc.retries(), 0);
    }

    #[test]
    fn test_link_reconnection_resets_retries() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        for _ in 0..2 {
            let conn = dial(&mut lc);
            lc.handle(Event::ReconnectNeeded {
                conn,
                code: TransportCode::Rte,
            });
        }
        assert_eq!(lc.retries(), 2);

        // Link drops during the backoff and comes back
        lc.handle(Event::TimerFired);
        lc.handle(Event::LinkPolled(LinkReport::without_address(LinkStatus::ConnectFail)));
        assert_eq!(lc.retries(), 2);
        lc.handle(Event::TimerFired);
        lc.handle(Event::LinkPolled(got_ip()));
        assert_eq!(lc.retries(), 0);
    }

    #[test]
    fn test_wrong_credentials_repeats() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);

        for _ in 0..10 {
            let step = lc.handle(Event::TimerFired);
            assert_eq!(step.commands, vec![Command::PollLink]);
            let step = lc.handle(Event::LinkPolled(LinkReport::without_address(
                LinkStatus::WrongPassword,
            )));
            assert_eq!(step.state, ConnectionState::LinkError);
            assert_eq!(armed_delay(&step), Some(Duration::from_millis(1000)));
        }

        // Still associating after an error keeps the error state
        lc.handle(Event::TimerFired);
        let step = lc.handle(Event::LinkPolled(LinkReport::without_address(
            LinkStatus::Connecting,
        )));
        assert_eq!(step.state, ConnectionState::LinkError);

        lc.handle(Event::TimerFired);
        let step = lc.handle(Event::LinkPolled(got_ip()));
        assert_eq!(step.state, ConnectionState::StreamConnecting);
    }

    #[test]
    fn test_immediate_rejection_reverifies_link() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        lc.handle(Event::TimerFired);
        let step = lc.handle(Event::LinkPolled(got_ip()));
        let conn = connect_of(&step).unwrap().id;

        let step = lc.handle(Event::ConnectIssued {
            conn,
            result: AttemptResult::RejectedImmediately(TransportCode::Rte),
        });
        assert_eq!(step.state, ConnectionState::LinkConnecting);
        assert_eq!(
            step.commands,
            vec![Command::DisarmTimer, Command::arm_once(Duration::from_millis(1000))]
        );
        assert_eq!(lc.retries(), 0);

        // Nothing is expected for the refused attempt anymore
        let step = lc.handle(Event::Connected { conn });
        assert_eq!(step.state, ConnectionState::LinkConnecting);
        assert!(step.commands.is_empty());
    }

    #[test]
    fn test_stale_callbacks_ignored() {
        let mut lc = lifecycle();
        lc.handle(Event::Start);
        let first = dial(&mut lc);
        lc.handle(Event::ReconnectNeeded {
            conn: first,
            code: TransportCode::Abrt,
        });
        let second = dial(&mut lc);
        assert_ne!(first, second);

        for event in [
            Event::Connected { conn: first },
            Event::Disconnected { conn: first },
            Event::ReconnectNeeded {
                conn: first,
                code: TransportCode::Rst,
            },
        ] {
            let step = lc.handle(event);
            assert_eq!(step.state, ConnectionState::StreamConnecting);
            assert!(step.commands.is_empty());
        }
        assert_eq!(lc.retries(), 1);
    }

    #[test]
    fn test_spurious_inputs_ignored() {
        let mut lc = lifecycle();
        let step = lc.handle(Event::TimerFired);
        assert!(step.commands.is_empty());

        let step = lc.handle(Event::LinkPolled(got_ip()));
        assert!(step.commands.is_empty());
        assert_eq!(step.state, ConnectionState::LinkConnecting);
    }

    #[test]
    fn test_every_arm_preceded_by_disarm() {
        let mut lc = lifecycle();
        let mut steps = vec![lc.handle(Event::Start)];

        for round in 0..12 {
            steps.push(lc.handle(Event::TimerFired));
            let report = match round % 3 {
                0 => LinkReport::without_address(LinkStatus::NoApFound),
                _ => got_ip(),
            };
            let step = lc.handle(Event::LinkPolled(report));
            let connect = connect_of(&step);
            steps.push(step);

            if let Some(descriptor) = connect {
                let conn = descriptor.id;
                let result = if round % 4 == 1 {
                    AttemptResult::RejectedImmediately(TransportCode::IsConn)
                } else {
                    AttemptResult::Initiated
                };
                steps.push(lc.handle(Event::ConnectIssued { conn, result }));
                steps.push(lc.handle(Event::ReconnectNeeded {
                    conn,
                    code: TransportCode::Timeout,
                }));
            }
        }

        let mut arms = 0;
        for step in &steps {
            for (i, command) in step.commands.iter().enumerate() {
                if matches!(command, Command::ArmTimer { .. }) {
                    arms += 1;
                    assert!(i > 0, "arm without disarm in {:?}", step);
                    assert_eq!(step.commands[i - 1], Command::DisarmTimer);
                }
            }
        }
        assert!(arms > 12);
    }
}
