//! Event loop that executes lifecycle commands and feeds results back.
//!
//! Everything runs on one task: timer firings and transport callbacks are
//! taken one at a time, and every command produced by an event is executed
//! (and its immediate result fed back) before the next input is looked at.
//! Only the connect itself runs on a spawned task, whose outcome comes back
//! as a callback.

use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use beacon_lifecycle::{
    AttemptResult, Command, ConnId, ConnectionDescriptor, ConnectionState, Event, Lifecycle,
    SendResult, TransportCode,
};

use crate::codes::code_for_io_error;
use crate::link::LinkService;
use crate::timer::LifecycleTimer;
use crate::transport::{Connector, IoStream};

/// Asynchronous notification from the transport
pub enum Callback {
    /// The connect succeeded
    Connected {
        /// Connection the stream belongs to
        conn: ConnId,
        /// The open stream
        stream: IoStream,
    },
    /// The connect failed
    ReconnectNeeded {
        /// Connection that failed
        conn: ConnId,
        /// Transport error
        code: TransportCode,
    },
    /// The stream was closed
    Disconnected {
        /// Connection that closed
        conn: ConnId,
    },
    /// Accepted bytes were written out
    SendComplete {
        /// Connection written to
        conn: ConnId,
    },
}

impl Callback {
    /// Connection the callback belongs to
    pub fn conn(&self) -> ConnId {
        match self {
            Callback::Connected { conn, .. }
            | Callback::ReconnectNeeded { conn, .. }
            | Callback::Disconnected { conn }
            | Callback::SendComplete { conn } => *conn,
        }
    }
}

enum Input {
    Timer,
    Callback(Callback),
    Shutdown,
}

/// Runs a [`Lifecycle`] against a link service, a connector and the lifecycle timer
pub struct Driver<L> {
    lifecycle: Lifecycle,
    link: L,
    connector: Connector,
    timer: LifecycleTimer,
    callback_tx: mpsc::UnboundedSender<Callback>,
    callback_rx: mpsc::UnboundedReceiver<Callback>,
    /// Connection whose callbacks are routed to the lifecycle
    registered: Option<ConnId>,
    /// Connect in flight
    connecting: Option<ConnId>,
    stream: Option<(ConnId, IoStream)>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<L: LinkService> Driver<L> {
    /// New driver; nothing happens until [`Driver::run`]
    pub fn new(lifecycle: Lifecycle, link: L, connector: Connector) -> Self {
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(lifecycle.state());
        Self {
            lifecycle,
            link,
            connector,
            timer: LifecycleTimer::new(),
            callback_tx,
            callback_rx,
            registered: None,
            connecting: None,
            stream: None,
            state_tx,
        }
    }

    /// Watch the connection state
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start the lifecycle and process inputs until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F) -> Lifecycle
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Driver started ({} transport)",
            if self.connector.is_secure() { "tls" } else { "plain" }
        );
        self.dispatch(Event::Start).await;

        loop {
            let input = tokio::select! {
                _ = &mut shutdown => Input::Shutdown,
                _ = self.timer.fired() => Input::Timer,
                Some(callback) = self.callback_rx.recv() => Input::Callback(callback),
            };

            let event = match input {
                Input::Shutdown => break,
                Input::Timer => Event::TimerFired,
                Input::Callback(callback) => match self.accept(callback) {
                    Some(event) => event,
                    None => continue,
                },
            };
            self.dispatch(event).await;
        }

        info!("Shutdown requested in state {}", self.lifecycle.state());
        self.timer.disarm();
        if let Some((conn, mut stream)) = self.stream.take() {
            debug!("Closing {} on shutdown", conn);
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", conn, e);
            }
        }
        self.lifecycle
    }

    /// Feed an event and everything its commands produce
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let step = self.lifecycle.handle(event);
            self.state_tx.send_if_modified(|state| {
                let changed = *state != step.state;
                *state = step.state;
                changed
            });
            for command in step.commands {
                if let Some(next) = self.execute(command).await {
                    queue.push_back(next);
                }
            }
        }
    }

    /// Turn a callback into an event, dropping callbacks for unregistered connections
    fn accept(&mut self, callback: Callback) -> Option<Event> {
        let conn = callback.conn();
        if self.connecting == Some(conn)
            && matches!(
                callback,
                Callback::Connected { .. } | Callback::ReconnectNeeded { .. }
            )
        {
            self.connecting = None;
        }

        if self.registered != Some(conn) {
            debug!("Dropping callback for unregistered {}", conn);
            return None;
        }

        let event = match callback {
            Callback::Connected { conn, stream } => {
                if let Ok(local) = stream.local_addr() {
                    debug!("{} open on local port {}", conn, local.port());
                }
                self.stream = Some((conn, stream));
                Event::Connected { conn }
            }
            Callback::ReconnectNeeded { conn, code } => Event::ReconnectNeeded { conn, code },
            Callback::Disconnected { conn } => {
                self.registered = None;
                Event::Disconnected { conn }
            }
            Callback::SendComplete { conn } => Event::SendComplete { conn },
        };
        Some(event)
    }

    async fn execute(&mut self, command: Command) -> Option<Event> {
        match command {
            Command::DisarmTimer => {
                self.timer.disarm();
                None
            }
            Command::ArmTimer { delay, repeat } => {
                self.timer.arm(delay, repeat);
                None
            }
            Command::PollLink => Some(Event::LinkPolled(self.link.poll_status())),
            Command::RegisterCallbacks { conn } => {
                self.registered = Some(conn);
                None
            }
            Command::Connect(descriptor) => Some(Event::ConnectIssued {
                conn: descriptor.id,
                result: self.start_connect(descriptor),
            }),
            Command::Send { conn, payload } => Some(Event::SendIssued {
                conn,
                result: self.send(conn, payload).await,
            }),
            Command::Close { conn } => {
                self.close(conn).await;
                None
            }
        }
    }

    fn start_connect(&mut self, descriptor: ConnectionDescriptor) -> AttemptResult {
        if self.stream.is_some() || self.connecting.is_some() {
            return AttemptResult::RejectedImmediately(TransportCode::IsConn);
        }
        if descriptor.remote.ip().is_unspecified() || descriptor.remote.port() == 0 {
            return AttemptResult::RejectedImmediately(TransportCode::Arg);
        }
        if !self.connector.supports(descriptor.protocol) {
            warn!("No TLS configuration for the secure stream {}", descriptor.id);
            return AttemptResult::RejectedImmediately(TransportCode::Arg);
        }

        let conn = descriptor.id;
        self.connecting = Some(conn);
        let connector = self.connector.clone();
        let callback_tx = self.callback_tx.clone();
        tokio::spawn(async move {
            let callback = match connector.open(&descriptor).await {
                Ok(stream) => Callback::Connected { conn, stream },
                Err(code) => Callback::ReconnectNeeded { conn, code },
            };
            let _ = callback_tx.send(callback);
        });
        AttemptResult::Initiated
    }

    async fn send(&mut self, conn: ConnId, payload: Bytes) -> SendResult {
        let Some((_, stream)) = self.stream.as_mut().filter(|(id, _)| *id == conn) else {
            return SendResult::Rejected(TransportCode::Conn);
        };

        let written = async {
            stream.write_all(&payload).await?;
            stream.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                let _ = self.callback_tx.send(Callback::SendComplete { conn });
                SendResult::Accepted
            }
            Err(e) => {
                warn!("Write on {} failed: {}", conn, e);
                SendResult::Rejected(code_for_io_error(&e))
            }
        }
    }

    async fn close(&mut self, conn: ConnId) {
        match self.stream.take() {
            Some((id, mut stream)) if id == conn => {
                if let Err(e) = stream.shutdown().await {
                    debug!("Graceful shutdown of {} failed: {}", conn, e);
                }
                let _ = self.callback_tx.send(Callback::Disconnected { conn });
            }
            other => {
                debug!("Close for {} without an open stream", conn);
                self.stream = other;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ScriptedLink;
    use beacon_lifecycle::{
        Announcement, EphemeralPorts, Establisher, LinkReport, LinkStatus, Protocol, Timings,
    };
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn fast_timings() -> Timings {
        Timings {
            link_poll: Duration::from_millis(10),
            reject_retry: Duration::from_millis(10),
            short_backoff: Duration::from_millis(10),
            long_backoff: Duration::from_secs(2),
            failure_threshold: 5,
        }
    }

    fn lifecycle(remote: SocketAddr, first_port: u16) -> Lifecycle {
        let establisher = Establisher::new(
            remote,
            Announcement::new("5c:cf:7f:01:a2:ff".parse().unwrap()),
        )
        .with_ports(EphemeralPorts::starting_at(first_port))
        .with_protocol(Protocol::PlainStream);
        Lifecycle::with_establisher(fast_timings(), establisher)
    }

    fn link_up_after_two_polls() -> ScriptedLink {
        ScriptedLink::new([
            LinkReport::without_address(LinkStatus::Connecting),
            LinkReport::without_address(LinkStatus::GotIp),
            LinkReport::got_ip(Ipv4Addr::new(10, 0, 0, 5)),
        ])
    }

    #[tokio::test]
    async fn test_announcement_delivered_then_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let driver = Driver::new(
            lifecycle(remote, 51210),
            link_up_after_two_polls(),
            Connector::plain(),
        );
        let mut state = driver.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(driver.run(async {
            let _ = stop_rx.await;
        }));

        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::StreamDisconnected),
        )
        .await
        .expect("announcement cycle finished")
        .unwrap();

        let received = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(received, b"5c:cf:7f:01:a2:ff,ESP8266");

        stop_tx.send(()).unwrap();
        let lifecycle = running.await.unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::StreamDisconnected);
        assert_eq!(lifecycle.retries(), 0);
        assert!(!lifecycle.timer_armed());
    }

    #[tokio::test]
    async fn test_busy_local_port_still_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        // Another socket holds the first port the allocator hands out
        let mut holder = None;
        for port in 52777..52877 {
            if let Ok(bound) = TcpListener::bind(("0.0.0.0", port)).await {
                holder = Some(bound);
                break;
            }
        }
        let holder = holder.expect("free port to hold");
        let busy = holder.local_addr().unwrap().port();

        let link = ScriptedLink::new([LinkReport::got_ip(Ipv4Addr::LOCALHOST)]);
        let driver = Driver::new(lifecycle(remote, busy), link, Connector::plain());
        let mut state = driver.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(driver.run(async {
            let _ = stop_rx.await;
        }));

        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::StreamDisconnected),
        )
        .await
        .expect("announcement delivered despite the busy port")
        .unwrap();
        let received = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert_eq!(received, b"5c:cf:7f:01:a2:ff,ESP8266");

        stop_tx.send(()).unwrap();
        let lifecycle = running.await.unwrap();
        assert_eq!(lifecycle.retries(), 0);
        drop(holder);
    }

    #[tokio::test]
    async fn test_refused_connects_escalate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();
        drop(listener);

        let link = ScriptedLink::new([LinkReport::got_ip(Ipv4Addr::LOCALHOST)]);
        let driver = Driver::new(lifecycle(remote, 51310), link, Connector::plain());
        let mut state = driver.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(driver.run(async {
            let _ = stop_rx.await;
        }));

        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::StreamConnectError),
        )
        .await
        .expect("long backoff reached")
        .unwrap();

        stop_tx.send(()).unwrap();
        let lifecycle = running.await.unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::StreamConnectError);
        assert_eq!(lifecycle.retries(), 0);
        assert!(lifecycle.timer_armed());
    }

    #[tokio::test]
    async fn test_immediate_rejections() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut driver = Driver::new(
            lifecycle(remote, 51410),
            ScriptedLink::new([]),
            Connector::plain(),
        );

        let unspecified = ConnectionDescriptor {
            id: ConnId(1),
            local_port: 0,
            remote: "0.0.0.0:8443".parse().unwrap(),
            protocol: Protocol::SecureStream,
        };
        assert_eq!(
            driver.start_connect(unspecified),
            AttemptResult::RejectedImmediately(TransportCode::Arg)
        );

        let secure = ConnectionDescriptor {
            id: ConnId(2),
            remote,
            ..unspecified
        };
        assert_eq!(
            driver.start_connect(secure),
            AttemptResult::RejectedImmediately(TransportCode::Arg)
        );
        assert!(driver.connecting.is_none());

        driver.connecting = Some(ConnId(2));
        let busy = ConnectionDescriptor {
            id: ConnId(3),
            remote,
            ..unspecified
        };
        assert_eq!(
            driver.start_connect(busy),
            AttemptResult::RejectedImmediately(TransportCode::IsConn)
        );
    }

    #[tokio::test]
    async fn test_unregistered_callbacks_dropped() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut driver = Driver::new(
            lifecycle(remote, 51510),
            ScriptedLink::new([]),
            Connector::plain(),
        );

        assert!(driver.accept(Callback::Disconnected { conn: ConnId(7) }).is_none());

        driver.connecting = Some(ConnId(7));
        let failed = Callback::ReconnectNeeded {
            conn: ConnId(7),
            code: TransportCode::Rst,
        };
        assert!(driver.accept(failed).is_none());
        assert!(driver.connecting.is_none());

        driver.registered = Some(ConnId(8));
        assert_eq!(
            driver.accept(Callback::SendComplete { conn: ConnId(8) }),
            Some(Event::SendComplete { conn: ConnId(8) })
        );
    }

    #[tokio::test]
    async fn test_send_without_stream_rejected() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut driver = Driver::new(
            lifecycle(remote, 51610),
            ScriptedLink::new([]),
            Connector::plain(),
        );
        let result = driver.send(ConnId(1), Bytes::from_static(b"x")).await;
        assert_eq!(result, SendResult::Rejected(TransportCode::Conn));
    }
}
