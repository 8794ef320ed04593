use super::dispatcher::Relay;
use super::journal::Level;
use super::protocol::{parse_inbound, Inbound, Outbound};
use super::state::RelayState;
use crate::error::RelayError;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};

/// Upper bound on the opening handshake of one connect attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The back-off elapsed.
    Reconnect,
    /// The session task ended.
    Closed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// At most one pending reconnect. Scheduling aborts the previous one.
#[derive(Default)]
pub struct ReconnectTimer {
    pending: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    pub fn schedule(&mut self, delay: Duration, events: mpsc::UnboundedSender<LinkEvent>) {
        self.clear();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LinkEvent::Reconnect);
        }));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn clear(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Keeps one client socket to the relay endpoint alive.
///
/// All link events are handled sequentially by [`ConnectionManager::run`].
/// Each open socket is served by its own session task. The manager holds that
/// task's handle, so a session that ends for any reason, a panic included,
/// becomes [`LinkEvent::Closed`].
pub struct ConnectionManager {
    endpoint: String,
    relay: Arc<Relay>,
    state: Arc<RelayState>,
    heartbeat: Duration,
    reconnect_delay: Duration,
    construction_delay: Duration,
    handshake_timeout: Duration,
    phase: Phase,
    timer: ReconnectTimer,
    session: Option<JoinHandle<String>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: impl Into<String>,
        relay: Arc<Relay>,
        heartbeat: Duration,
        reconnect_delay: Duration,
        construction_delay: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = relay.state().clone();
        Self {
            endpoint: endpoint.into(),
            relay,
            state,
            heartbeat,
            reconnect_delay,
            construction_delay,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            phase: Phase::Disconnected,
            timer: ReconnectTimer::default(),
            session: None,
            events_tx,
            events_rx,
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Connect, then reconnect forever.
    pub async fn run(mut self) {
        self.connect().await;
        loop {
            let event = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
                reason = session_ended(&mut self.session) => LinkEvent::Closed { reason },
            };
            match event {
                LinkEvent::Reconnect => self.connect().await,
                LinkEvent::Closed { reason } => self.on_closed(reason),
            }
        }
    }

    async fn connect(&mut self) {
        if self.phase != Phase::Disconnected {
            debug!("[relay] connect skipped, phase is {:?}", self.phase);
            return;
        }
        self.timer.clear();
        self.phase = Phase::Connecting;
        self.state.record(
            Level::System,
            "Connecting to relay endpoint",
            Some(json!({ "endpoint": self.endpoint })),
        );

        let attempt = timeout(self.handshake_timeout, connect_async(self.endpoint.as_str())).await;
        let failure = match attempt {
            Ok(Ok((socket, _response))) => {
                self.phase = Phase::Connected;
                self.state.set_live(true);
                self.state.record(Level::Success, "Relay connection established", None);
                self.session = Some(tokio::spawn(run_session(
                    socket,
                    self.relay.clone(),
                    self.heartbeat,
                )));
                None
            }
            Ok(Err(e)) => Some(self.classify(e)),
            Err(_elapsed) => Some((
                RelayError::ConnectionLost(format!(
                    "handshake timed out after {} ms",
                    self.handshake_timeout.as_millis()
                )),
                self.reconnect_delay,
            )),
        };

        let Some((error, delay)) = failure else { return };
        self.phase = Phase::Disconnected;
        self.state.record(
            Level::Critical,
            "Relay connection failed",
            Some(json!({
                "error": error.to_string(),
                "retry_ms": delay.as_millis() as u64,
            })),
        );
        self.timer.schedule(delay, self.events_tx.clone());
    }

    fn on_closed(&mut self, reason: String) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
        self.phase = Phase::Disconnected;
        self.state.set_live(false);
        self.state.record(
            Level::Critical,
            "Relay connection closed",
            Some(json!({
                "reason": reason,
                "retry_ms": self.reconnect_delay.as_millis() as u64,
            })),
        );
        self.timer.schedule(self.reconnect_delay, self.events_tx.clone());
    }

    /// A socket that cannot even be built waits longer than a refused one.
    fn classify(&self, error: tungstenite::Error) -> (RelayError, Duration) {
        match error {
            tungstenite::Error::Url(e) => (
                RelayError::ConstructionFailure(e.to_string()),
                self.construction_delay,
            ),
            tungstenite::Error::HttpFormat(e) => (
                RelayError::ConstructionFailure(e.to_string()),
                self.construction_delay,
            ),
            other => (
                RelayError::ConnectionLost(other.to_string()),
                self.reconnect_delay,
            ),
        }
    }
}

/// Resolves with the close reason once the current session task ends.
/// Pending forever while there is no session.
async fn session_ended(session: &mut Option<JoinHandle<String>>) -> String {
    let Some(handle) = session.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = handle.await;
    *session = None;
    match outcome {
        Ok(reason) => reason,
        Err(e) => format!("session task failed: {}", e),
    }
}

/// Serve one open socket. Returns why it ended.
async fn run_session<S>(socket: WebSocketStream<S>, relay: Arc<Relay>, heartbeat: Duration) -> String
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let state = relay.state().clone();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let _ = out_tx.send(relay.status_report().await);
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.touch();
                    dispatch(text.as_str(), &relay, &out_tx);
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by peer".to_string());
                }
                Some(Ok(_)) => state.touch(),
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
            Some(reply) = out_rx.recv() => {
                if let Err(e) = send_frame(&mut sink, &reply).await {
                    break e.to_string();
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = send_frame(&mut sink, &Outbound::heartbeat()).await {
                    break e.to_string();
                }
            }
        }
    };

    info!("[relay] session ended: {}", reason);
    reason
}

/// Each command runs on its own task so a slow tab never blocks the socket.
fn dispatch(text: &str, relay: &Arc<Relay>, out: &mpsc::UnboundedSender<Outbound>) {
    match parse_inbound(text) {
        Ok(Inbound::Command(command)) => {
            debug!("[relay] command received: {:?}", command);
            let relay = relay.clone();
            let out = out.clone();
            tokio::spawn(async move {
                if let Some(reply) = relay.handle(command).await {
                    let _ = out.send(reply);
                }
            });
        }
        Ok(Inbound::Unknown(action)) => {
            warn!("[relay] ignoring unknown action '{}'", action);
        }
        Err(e) => {
            relay
                .state()
                .record(Level::Error, "Dropped malformed command", Some(json!(e.to_string())));
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Outbound) -> Result<(), tungstenite::Error>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("[relay] cannot encode {} frame: {}", frame.action(), e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
