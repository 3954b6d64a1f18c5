//! WebSocket client facade and connection supervisor.
//!
//! The public [`WebSocketClient`] forwards every operation to a
//! supervisor task through a command queue, so the connection state
//! machine has a single writer and reconnect scheduling can never
//! re-enter itself. Each live connection runs a link task owning the
//! socket: a select loop over the outbound writer channel, the inbound
//! frame stream, the shutdown signal, and the idle-ping timer. Link tasks
//! report lifecycle events tagged with their generation so messages from
//! a torn-down socket cannot corrupt the state machine.

use crate::ack::AckRegistry;
use crate::handshake::HandshakeDriver;
use crate::message::{InMessage, OutMessage};
use crate::router::{self, Verdict};
use crate::settings::ConnectionSettings;
use crate::state::{ConnectionPhase, InternalState};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use sirocco_core::completion::Completion;
use sirocco_core::error::ClientError;
use sirocco_core::wire::{Envelope, WireFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

type OpReply = oneshot::Sender<Result<Completion, ClientError>>;
type HandlerSlot = Arc<RwLock<Option<Arc<dyn ReceiveHandler>>>>;

/// Receives the full inbound event stream, lifecycle events included.
///
/// Return `true` when the message was handled; unhandled messages fall
/// through silently.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    /// Called for every inbound event, in arrival order.
    async fn on_message(&self, message: InMessage) -> bool;
}

/// Resilient WebSocket client.
///
/// Maintains a logical connection across transient network failures:
/// throttled reconnection, offline buffering through a
/// [`BackupBuffer`](crate::buffer::BackupBuffer), idle pinging, and an
/// ack layer for sends that must be confirmed by the peer.
///
/// # Example
///
/// ```ignore
/// use sirocco_client::{ConnectionSettings, WebSocketClient};
///
/// let settings = ConnectionSettings::builder()
///     .url("wss://example.com/stream")
///     .build();
///
/// let mut client = WebSocketClient::new(settings);
/// client.connect().await?;
/// client.send_text("hello").await?;
/// ```
pub struct WebSocketClient {
    settings: Arc<ConnectionSettings>,
    state: Arc<RwLock<InternalState>>,
    handler: HandlerSlot,
    cmd_tx: Option<mpsc::Sender<Command>>,
    supervisor: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl WebSocketClient {
    /// Creates a client with the given settings.
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        let throttle = settings.throttle.clone();
        Self {
            settings: Arc::new(settings),
            state: Arc::new(RwLock::new(InternalState::new(throttle))),
            handler: Arc::new(RwLock::new(None)),
            cmd_tx: None,
            supervisor: None,
            pump: None,
        }
    }

    /// Installs the receive handler for inbound events.
    pub fn set_handler(&mut self, handler: impl ReceiveHandler + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Returns the settings this client was built with.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> ConnectionPhase {
        self.state.read().phase
    }

    /// Returns whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.read().phase.is_open()
    }

    /// Returns the number of connection attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.state.read().connect_attempts
    }

    /// Connects to the endpoint.
    ///
    /// Idempotent when already open; joins an attempt already in flight.
    /// Resolves `Success` once the connection is open and any buffered
    /// backlog has drained, `Cancelled` when the reconnect schedule is
    /// exhausted or a `disconnect` pre-empts the attempt.
    ///
    /// # Errors
    ///
    /// Returns the attempt error when it fails and no reconnect schedule
    /// is configured.
    pub async fn connect(&mut self) -> Result<Completion, ClientError> {
        self.ensure_running();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Connect { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| ClientError::closed("client terminated"))?
    }

    /// Disconnects from the endpoint.
    ///
    /// Resolves `Success` even when already closed. Pre-empts any pending
    /// reconnect delay; the pre-empted `connect` futures resolve
    /// `Cancelled`.
    pub async fn disconnect(&mut self) -> Completion {
        let Some(cmd_tx) = self.cmd_tx.clone() else {
            return Completion::Success;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx
            .send(Command::Disconnect { reply: reply_tx })
            .await
            .is_err()
        {
            return Completion::Success;
        }
        reply_rx.await.unwrap_or(Completion::Success)
    }

    /// Tears the current connection down and reconnects after the
    /// schedule's delay.
    ///
    /// Emits `Reconnecting` if an episode is not already underway.
    /// Resolves with the chained connect, or `Cancelled` when the
    /// schedule is terminal.
    ///
    /// # Errors
    ///
    /// Returns an error when the client task is gone.
    pub async fn reconnect(&mut self) -> Result<Completion, ClientError> {
        self.ensure_running();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Reconnect { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| ClientError::closed("client terminated"))?
    }

    /// Sends a message.
    ///
    /// While open, resolves once the link writer accepts the frame;
    /// ack-wrapped messages resolve only when the acknowledgement arrives
    /// (`Success`) or the ack timer fires (`Cancelled`). While
    /// disconnected the message diverts to the backup buffer when one is
    /// configured, otherwise it is dropped; both resolve `Success`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the message cannot be rendered, or
    /// `Closed` when the link disappears under the send.
    pub async fn send(&self, message: OutMessage) -> Result<Completion, ClientError> {
        match &self.cmd_tx {
            Some(cmd_tx) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                cmd_tx
                    .send(Command::Send {
                        message,
                        reply: reply_tx,
                    })
                    .await
                    .map_err(|_| ClientError::closed("client terminated"))?;
                reply_rx
                    .await
                    .map_err(|_| ClientError::closed("client terminated"))?
            }
            // Never connected: divert straight to the buffer.
            None => {
                if let Some(buffer) = &self.settings.buffer {
                    buffer.write(message);
                } else {
                    debug!("dropping message sent before first connect");
                }
                Ok(Completion::Success)
            }
        }
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// Same contract as [`WebSocketClient::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<Completion, ClientError> {
        self.send(OutMessage::text(text)).await
    }

    /// Serializes a value to JSON and sends it.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value cannot be serialized;
    /// otherwise the [`WebSocketClient::send`] contract.
    pub async fn send_json<T: serde::Serialize>(
        &self,
        value: &T,
    ) -> Result<Completion, ClientError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ClientError::serialization(format!("failed to serialize: {e}")))?;
        self.send(OutMessage::json(value)).await
    }

    /// Disconnects within the configured close bound and releases the
    /// client's tasks, joining them off the I/O path.
    pub async fn close(&mut self) -> Completion {
        let bound = self.settings.close_timeout();
        let completion = timeout(bound, self.disconnect())
            .await
            .unwrap_or(Completion::Cancelled);

        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Shutdown).await;
        }
        if let Some(task) = self.supervisor.take() {
            let _ = task.await;
        }
        if let Some(task) = self.pump.take() {
            let _ = task.await;
        }
        completion
    }

    /// Spawns the supervisor and event pump on first use.
    fn ensure_running(&mut self) {
        if self.cmd_tx.is_some() {
            return;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (link_tx, link_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(64);

        let supervisor = Supervisor {
            settings: Arc::clone(&self.settings),
            state: Arc::clone(&self.state),
            registry: Arc::new(AckRegistry::new(events_tx.clone())),
            events: events_tx,
            cmd_tx: cmd_tx.clone(),
            link_tx,
            link: None,
            link_epoch: 0,
            retry_token: 0,
            waiters: Vec::new(),
            closing_reply: None,
        };

        self.supervisor = Some(tokio::spawn(supervisor.run(cmd_rx, link_rx)));
        self.pump = Some(tokio::spawn(run_pump(
            events_rx,
            Arc::clone(&self.handler),
        )));
        self.cmd_tx = Some(cmd_tx);
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| ClientError::closed("client not running"))?;
        cmd_tx
            .send(command)
            .await
            .map_err(|_| ClientError::closed("client terminated"))
    }
}

#[derive(Debug)]
enum Command {
    Connect { reply: OpReply },
    Disconnect { reply: oneshot::Sender<Completion> },
    Reconnect { reply: OpReply },
    Send { message: OutMessage, reply: OpReply },
    Retry { token: u64 },
    Shutdown,
}

#[derive(Debug)]
enum LinkEvent {
    PeerClose { epoch: u64, reason: Option<String> },
    Failed { epoch: u64, error: ClientError },
    Closed { epoch: u64 },
}

struct Link {
    out_tx: mpsc::Sender<Message>,
    shutdown_tx: mpsc::Sender<()>,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

/// Single writer of the connection state machine.
struct Supervisor {
    settings: Arc<ConnectionSettings>,
    state: Arc<RwLock<InternalState>>,
    registry: Arc<AckRegistry>,
    events: mpsc::Sender<InMessage>,
    cmd_tx: mpsc::Sender<Command>,
    link_tx: mpsc::Sender<LinkEvent>,
    link: Option<Link>,
    /// Generation of the current link; stale link events are ignored.
    link_epoch: u64,
    /// Generation of the pending reconnect timer; stale retries are ignored.
    retry_token: u64,
    /// Pending `connect`/`reconnect` completions for the current attempt.
    waiters: Vec<OpReply>,
    /// Pending `disconnect` completion while the link closes.
    closing_reply: Option<oneshot::Sender<Completion>>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut link_rx: mpsc::Receiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = link_rx.recv() => self.handle_link_event(event).await,
            }
        }
        // Dropping the link's channels lets its task wind down on its own.
        self.link = None;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.handle_connect(reply).await,
            Command::Disconnect { reply } => self.handle_disconnect(reply).await,
            Command::Reconnect { reply } => self.handle_reconnect(reply).await,
            Command::Send { message, reply } => self.handle_send(message, reply).await,
            Command::Retry { token } => self.handle_retry(token).await,
            Command::Shutdown => {}
        }
    }

    async fn handle_connect(&mut self, reply: OpReply) {
        let phase = self.state.read().phase;
        match phase {
            ConnectionPhase::Open => {
                let _ = reply.send(Ok(Completion::Success));
            }
            ConnectionPhase::Idle | ConnectionPhase::Closed => {
                self.waiters.push(reply);
                self.attempt().await;
            }
            // An attempt or close is in flight; join its resolution.
            _ => self.waiters.push(reply),
        }
    }

    async fn handle_disconnect(&mut self, reply: oneshot::Sender<Completion>) {
        self.retry_token += 1;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(Completion::Cancelled));
        }

        let phase = self.state.read().phase;
        if phase.is_inactive() {
            let _ = reply.send(Completion::Success);
            return;
        }
        if phase == ConnectionPhase::Closing {
            let _ = reply.send(Completion::Success);
            return;
        }

        {
            let mut st = self.state.write();
            st.mark_closing();
            // An explicit disconnect ends any reconnect episode.
            st.is_reconnecting = false;
        }

        let deliverable = match &self.link {
            Some(link) => link.shutdown_tx.send(()).await.is_ok(),
            None => false,
        };
        if deliverable {
            self.closing_reply = Some(reply);
        } else {
            self.enter_closed(None).await;
            let _ = reply.send(Completion::Success);
        }
    }

    async fn handle_reconnect(&mut self, reply: OpReply) {
        let phase = self.state.read().phase;
        if phase.is_inactive() {
            self.handle_connect(reply).await;
            return;
        }
        if self.state.read().current_throttle.is_terminal() {
            let _ = reply.send(Ok(Completion::Cancelled));
            return;
        }

        let notify = self.state.write().begin_reconnect();
        if notify {
            let _ = self.events.send(InMessage::Reconnecting).await;
        }

        // The old link is done; anything it still reports is stale.
        if let Some(link) = self.link.take() {
            let _ = link.shutdown_tx.try_send(());
        }
        self.link_epoch += 1;

        self.waiters.push(reply);
        let delay = self.state.write().take_throttle_step().unwrap_or_default();
        info!(delay = %humanize(delay), "reconnect requested");
        self.arm_retry(delay);
    }

    async fn handle_send(&mut self, message: OutMessage, reply: OpReply) {
        let phase = self.state.read().phase;
        if phase.is_open() {
            self.dispatch_open(message, Some(reply)).await;
        } else if let Some(buffer) = &self.settings.buffer {
            buffer.write(message);
            let _ = reply.send(Ok(Completion::Success));
        } else {
            debug!(phase = %phase, "dropping message sent while disconnected");
            let _ = reply.send(Ok(Completion::Success));
        }
    }

    async fn handle_retry(&mut self, token: u64) {
        if token != self.retry_token {
            return;
        }
        if self.state.read().phase != ConnectionPhase::Reconnecting {
            return;
        }
        self.attempt().await;
    }

    /// One connection attempt: TCP, upgrade, then Open.
    async fn attempt(&mut self) {
        self.state.write().mark_connecting();
        let attempt = self.state.read().connect_attempts;
        debug!(url = %self.settings.url, attempt, "connecting");

        match self.establish().await {
            Ok(stream) => self.enter_open(stream).await,
            Err(error) => self.attempt_failed(error).await,
        }
    }

    async fn establish(&mut self) -> Result<WsStream, ClientError> {
        let mut handshaker = HandshakeDriver::new(&self.settings);
        let request = handshaker.upgrade_request()?;
        let (host, port) = endpoint(&self.settings.url)?;

        let attempt = async {
            let tcp = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(ClientError::transport)?;
            self.state.write().mark_handshaking();
            client_async_tls(request, tcp).await.map_err(map_ws_error)
        };

        let (stream, response) = match timeout(self.settings.connect_timeout(), attempt).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(error)) => return Err(error),
            Err(_) => {
                return Err(ClientError::Timeout {
                    timeout_ms: self.settings.connect_timeout_ms,
                })
            }
        };

        handshaker.complete(&response)?;
        Ok(stream)
    }

    /// Entering Open: swap the pipeline to frame mode, reset the
    /// throttle, drain the buffer, then resolve waiters and announce.
    async fn enter_open(&mut self, stream: WsStream) {
        self.link_epoch += 1;
        self.retry_token += 1;

        let (out_tx, out_rx) = mpsc::channel::<Message>(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(run_link(
            LinkContext {
                epoch: self.link_epoch,
                state: Arc::clone(&self.state),
                registry: Arc::clone(&self.registry),
                wire: Arc::clone(&self.settings.wire_format),
                events: self.events.clone(),
                link_tx: self.link_tx.clone(),
                ping_interval: self.settings.ping_interval(),
            },
            stream,
            out_rx,
            shutdown_rx,
        ));
        self.link = Some(Link {
            out_tx,
            shutdown_tx,
            task,
        });

        self.state.write().mark_open(&self.settings.throttle);
        info!(url = %self.settings.url, "connected");

        if let Some(buffer) = self.settings.buffer.clone() {
            buffer.open();
            self.drain_buffer(buffer).await;
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(Completion::Success));
        }
        let _ = self.events.send(InMessage::Connected).await;
    }

    /// Replays the buffered backlog through the normal send path, in
    /// FIFO order and ahead of any command queued behind this call.
    async fn drain_buffer(&mut self, buffer: Arc<dyn crate::buffer::BackupBuffer>) {
        let (tx, mut rx) = mpsc::channel::<OutMessage>(32);
        let drain = tokio::spawn(async move { buffer.drain(&tx).await });
        while let Some(message) = rx.recv().await {
            self.dispatch_open(message, None).await;
        }
        match drain.await {
            Ok(Ok(0)) => {}
            Ok(Ok(count)) => info!(count, "drained backup buffer"),
            Ok(Err(error)) => warn!(error = %error, "backup buffer drain failed"),
            Err(error) => warn!(error = %error, "backup buffer drain task failed"),
        }
    }

    /// Open-phase send: render and hand to the link writer. Ack-wrapped
    /// messages register with the ack registry first; their reply
    /// resolves on ack or timeout rather than on write.
    async fn dispatch_open(&mut self, message: OutMessage, reply: Option<OpReply>) {
        match message {
            OutMessage::Binary(data) => {
                let outcome = self.write_frame(Message::Binary(data)).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.map(|()| Completion::Success));
                }
            }
            OutMessage::Ackable { timeout, inner } => match inner.payload_envelope() {
                Ok(envelope) => {
                    let id = self.registry.register(*inner, timeout, reply);
                    let wrapped = Envelope::ack_request(id, envelope);
                    let rendered = self.settings.wire_format.render(&wrapped);
                    let outcome = match rendered {
                        Ok(text) => self.write_frame(Message::Text(text)).await,
                        Err(error) => Err(error),
                    };
                    if let Err(error) = outcome {
                        // Never reached the wire; fail the send instead of
                        // letting the ack timer report a phantom timeout.
                        if let Some(reply) = self.registry.abort(id) {
                            let _ = reply.send(Err(error));
                        }
                    }
                }
                Err(error) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(error));
                    }
                }
            },
            plain => {
                let rendered = plain
                    .payload_envelope()
                    .and_then(|envelope| self.settings.wire_format.render(&envelope));
                let outcome = match rendered {
                    Ok(text) => self.write_frame(Message::Text(text)).await,
                    Err(error) => Err(error),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.map(|()| Completion::Success));
                }
            }
        }
    }

    async fn write_frame(&mut self, frame: Message) -> Result<(), ClientError> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| ClientError::closed("no active link"))?;
        link.out_tx
            .send(frame)
            .await
            .map_err(|_| ClientError::closed("link writer gone"))
    }

    async fn attempt_failed(&mut self, error: ClientError) {
        if self.state.read().is_closing {
            self.state.write().is_reconnecting = false;
            self.enter_closed(None).await;
            return;
        }

        if self.state.read().is_reconnecting {
            // Expected retry noise; a refused connect mid-episode is not
            // worth alarming the application about.
            debug!(error = %error, "reconnect attempt failed");
        } else {
            warn!(error = %error, "connection attempt failed");
            let _ = self.events.send(InMessage::Error(error.clone())).await;
        }

        self.after_failure(Some(error)).await;
    }

    /// Consults the throttle after a failed attempt or a lost link:
    /// either schedules the next attempt or parks the session in Closed.
    async fn after_failure(&mut self, error: Option<ClientError>) {
        let (notify, delay, fresh_exhaustion) = {
            let mut st = self.state.write();
            match st.take_throttle_step() {
                Some(delay) => (st.begin_reconnect(), Some(delay), false),
                None => (false, None, !st.is_reconnecting),
            }
        };

        match delay {
            Some(delay) => {
                if notify {
                    let _ = self.events.send(InMessage::Reconnecting).await;
                }
                info!(delay = %humanize(delay), "reconnecting");
                self.arm_retry(delay);
            }
            None => {
                // No schedule at all: the failure goes straight back to
                // the callers. An exhausted schedule resolves Cancelled.
                if fresh_exhaustion {
                    if let Some(error) = &error {
                        for waiter in self.waiters.drain(..) {
                            let _ = waiter.send(Err(error.clone()));
                        }
                    }
                } else {
                    info!("reconnect schedule exhausted");
                }
                let reason = error.map_or_else(
                    || "reconnect schedule exhausted".to_string(),
                    |e| e.to_string(),
                );
                self.state.write().is_reconnecting = false;
                self.enter_closed(Some(reason)).await;
            }
        }
    }

    fn arm_retry(&mut self, delay: Duration) {
        self.retry_token += 1;
        let token = self.retry_token;
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(Command::Retry { token }).await;
        });
    }

    /// Only events from the live link generation may drive transitions.
    fn is_current(&self, epoch: u64) -> bool {
        self.link.is_some() && epoch == self.link_epoch
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Closed { epoch } => {
                if !self.is_current(epoch) {
                    return;
                }
                self.state.write().is_reconnecting = false;
                self.enter_closed(None).await;
                if let Some(reply) = self.closing_reply.take() {
                    let _ = reply.send(Completion::Success);
                }
            }
            LinkEvent::PeerClose { epoch, reason } => {
                if !self.is_current(epoch) {
                    return;
                }
                if self.state.read().is_closing {
                    self.state.write().is_reconnecting = false;
                    self.enter_closed(reason).await;
                    if let Some(reply) = self.closing_reply.take() {
                        let _ = reply.send(Completion::Success);
                    }
                } else {
                    info!(reason = ?reason, "peer closed the connection");
                    self.link = None;
                    self.after_failure(None).await;
                }
            }
            LinkEvent::Failed { epoch, error } => {
                if !self.is_current(epoch) {
                    return;
                }
                if self.state.read().is_closing {
                    // Expected while tearing the channel down.
                    debug!(error = %error, "link error during close");
                    self.state.write().is_reconnecting = false;
                    self.enter_closed(None).await;
                    if let Some(reply) = self.closing_reply.take() {
                        let _ = reply.send(Completion::Success);
                    }
                } else {
                    if self.state.read().is_reconnecting {
                        debug!(error = %error, "link lost during reconnect episode");
                    } else {
                        error!(error = %error, "transport error");
                        let _ = self.events.send(InMessage::Error(error)).await;
                    }
                    self.link = None;
                    self.after_failure(None).await;
                }
            }
        }
    }

    /// Entering Closed: drop the link, clear the ack registry, and (when
    /// this ends the session rather than a reconnect cycle) close the
    /// buffer and announce.
    async fn enter_closed(&mut self, reason: Option<String>) {
        self.retry_token += 1;
        self.link = None;
        self.state.write().mark_closed();
        self.registry.clear().await;

        if !self.state.read().is_reconnecting {
            if let Some(buffer) = &self.settings.buffer {
                buffer.close();
            }
            let _ = self.events.send(InMessage::Disconnected(reason)).await;
        }

        // Fresh, unresolved connected signal for the next session.
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(Completion::Cancelled));
        }
    }
}

struct LinkContext {
    epoch: u64,
    state: Arc<RwLock<InternalState>>,
    registry: Arc<AckRegistry>,
    wire: Arc<dyn WireFormat>,
    events: mpsc::Sender<InMessage>,
    link_tx: mpsc::Sender<LinkEvent>,
    ping_interval: Duration,
}

/// Owns one live socket: writes queued frames, routes inbound frames,
/// answers pings, and emits a ping when the link goes idle.
async fn run_link(
    ctx: LinkContext,
    stream: WsStream,
    mut out_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let (mut sink, mut source) = stream.split();
    let mut ping_timer = interval(ctx.ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                // User close: write the close frame, await it, then close
                // the transport.
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!(error = %e, "close frame write failed");
                }
                let _ = sink.close().await;
                let _ = ctx.link_tx.send(LinkEvent::Closed { epoch: ctx.epoch }).await;
                break;
            }

            outbound = out_rx.recv() => match outbound {
                Some(frame) => {
                    ctx.state.write().record_write();
                    if let Err(e) = sink.send(frame).await {
                        let _ = ctx.link_tx.send(LinkEvent::Failed {
                            epoch: ctx.epoch,
                            error: map_ws_error(e),
                        }).await;
                        break;
                    }
                }
                // The supervisor dropped the link.
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },

            inbound = source.next() => match inbound {
                Some(Ok(frame)) => {
                    ctx.state.write().record_read();
                    if !handle_frame(&ctx, &mut sink, frame).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = ctx.link_tx.send(LinkEvent::Failed {
                        epoch: ctx.epoch,
                        error: map_ws_error(e),
                    }).await;
                    break;
                }
                None => {
                    let _ = ctx.link_tx.send(LinkEvent::Failed {
                        epoch: ctx.epoch,
                        error: ClientError::closed("stream ended"),
                    }).await;
                    break;
                }
            },

            _ = ping_timer.tick() => {
                if ctx.state.read().is_idle(ctx.ping_interval) {
                    ctx.state.write().record_ping();
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "failed to send ping");
                    } else {
                        debug!("ping sent");
                    }
                }
            }
        }
    }
}

/// Acts on one routed frame. Returns false when the link must stop.
async fn handle_frame(ctx: &LinkContext, sink: &mut WsSink, frame: Message) -> bool {
    match router::route(frame, ctx.wire.as_ref()) {
        Verdict::Deliver(message) => {
            let _ = ctx.events.send(message).await;
        }
        Verdict::AckInbound(id) => ctx.registry.acknowledge(id),
        Verdict::AckRequest { id, inner } => {
            // Deliver first, then acknowledge on the wire.
            let _ = ctx.events.send(inner).await;
            match ctx.wire.render(&Envelope::ack(id)) {
                Ok(text) => {
                    ctx.state.write().record_write();
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, id, "failed to send ack");
                    }
                }
                Err(error) => warn!(error = %error, id, "failed to render ack"),
            }
        }
        Verdict::Pong(payload) => {
            ctx.state.write().record_write();
            if let Err(e) = sink.send(Message::Pong(payload)).await {
                warn!(error = %e, "failed to send pong");
            }
        }
        Verdict::PongReceived => trace!("pong received"),
        Verdict::PeerClose(reason) => {
            let _ = ctx
                .link_tx
                .send(LinkEvent::PeerClose {
                    epoch: ctx.epoch,
                    reason,
                })
                .await;
            return false;
        }
        Verdict::Drop => {}
    }
    true
}

/// Delivers inbound events to the registered handler, in order.
async fn run_pump(mut events: mpsc::Receiver<InMessage>, handler: HandlerSlot) {
    while let Some(message) = events.recv().await {
        let current = handler.read().clone();
        match current {
            Some(handler) => {
                let kind = message.kind();
                if !handler.on_message(message).await {
                    trace!(kind, "message fell through unhandled");
                }
            }
            None => trace!(kind = message.kind(), "no receive handler registered"),
        }
    }
}

/// Host and port for the endpoint, with scheme-default ports.
fn endpoint(url: &str) -> Result<(String, u16), ClientError> {
    let parsed = Url::parse(url).map_err(|e| ClientError::handshake(format!("{url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(ClientError::handshake(format!(
            "unsupported scheme {:?}",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::handshake("missing host"))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| ClientError::handshake("missing port"))?;
    Ok((host, port))
}

fn map_ws_error(error: WsError) -> ClientError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ClientError::closed("connection closed")
        }
        WsError::Io(e) => ClientError::transport(e),
        WsError::Tls(e) => ClientError::transport(e),
        WsError::Http(response) => {
            ClientError::handshake(format!("unexpected HTTP status {}", response.status()))
        }
        WsError::HttpFormat(e) => ClientError::handshake(e),
        WsError::Url(e) => ClientError::handshake(e),
        other => ClientError::protocol(other),
    }
}

/// Log-friendly delay rendering; minutes are the coarsest unit used.
fn humanize(delay: Duration) -> String {
    let secs = delay.as_secs();
    if delay < Duration::from_secs(1) {
        format!("{}ms", delay.as_millis())
    } else if secs < 60 {
        format!("{:.1}s", delay.as_secs_f64())
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryBuffer;
    use sirocco_core::throttle::Throttle;

    #[test]
    fn test_client_creation() {
        let settings = ConnectionSettings::builder()
            .url("wss://example.com/stream")
            .build();
        let client = WebSocketClient::new(settings);
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionPhase::Idle);
        assert_eq!(client.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_send_before_connect_diverts_to_buffer() {
        let buffer = Arc::new(MemoryBuffer::new());
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .buffer(buffer.clone())
            .build();
        let client = WebSocketClient::new(settings);

        let completion = client.send(OutMessage::text("queued")).await.unwrap();
        assert_eq!(completion, Completion::Success);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_send_before_connect_without_buffer_is_dropped() {
        let settings = ConnectionSettings::builder().url("ws://example.com").build();
        let client = WebSocketClient::new(settings);
        let completion = client.send(OutMessage::text("gone")).await.unwrap();
        assert_eq!(completion, Completion::Success);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_succeeds() {
        let settings = ConnectionSettings::builder()
            .url("ws://example.com")
            .throttle(Throttle::none())
            .build();
        let mut client = WebSocketClient::new(settings);
        assert_eq!(client.disconnect().await, Completion::Success);
    }

    #[test]
    fn test_endpoint_defaults_ports_by_scheme() {
        assert_eq!(endpoint("ws://example.com/").unwrap().1, 80);
        assert_eq!(endpoint("wss://example.com/").unwrap().1, 443);
        assert_eq!(endpoint("ws://example.com:9001/").unwrap().1, 9001);
        assert!(endpoint("http://example.com/").is_err());
        assert!(endpoint("nonsense").is_err());
    }

    #[test]
    fn test_humanize_caps_at_minutes() {
        assert_eq!(humanize(Duration::from_millis(250)), "250ms");
        assert_eq!(humanize(Duration::from_secs(5)), "5.0s");
        assert_eq!(humanize(Duration::from_millis(1500)), "1.5s");
        assert_eq!(humanize(Duration::from_secs(90)), "1m30s");
        assert_eq!(humanize(Duration::from_secs(7200)), "120m0s");
    }
}
