//! One MOS channel: a socket plus its command queue.
//!
//! [`CommandQueueClient`] is a cheap handle to a task that owns the socket,
//! the framed reader/writer and a [`CommandQueue`]. The task reacts to four
//! sources, one at a time: requests from handles, connection attempts,
//! received documents, and timers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mosprims_frame::{FrameError, FramedUnit, MosCodec};
use mosprims_model::{Envelope, IncomingMessage, MosMessage, PortType};
use mosprims_transport::{Endpoint, MosStream, TransportError};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::CommandError;
use crate::event::ConnectionEvent;
use crate::queue::{CommandQueue, HandedOverQueue, QueuedCommand, ReplyOutcome, Transmit};
use crate::sequence::MessageIdSequence;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<MosStream, TransportError>> + Send>>;

/// A queued command's eventual reply.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<IncomingMessage, CommandError>>,
}

impl PendingReply {
    pub async fn wait(self) -> Result<IncomingMessage, CommandError> {
        self.rx.await.unwrap_or(Err(CommandError::Closed))
    }
}

enum Request {
    Queue {
        message: MosMessage,
        enqueued_at: Instant,
        responder: oneshot::Sender<Result<IncomingMessage, CommandError>>,
    },
    Requeue(HandedOverQueue),
    HandOver(oneshot::Sender<HandedOverQueue>),
    Connect,
    Dispose(oneshot::Sender<()>),
}

/// Handle to one channel task.
#[derive(Debug, Clone)]
pub struct CommandQueueClient {
    port: PortType,
    endpoint: Endpoint,
    requests: mpsc::UnboundedSender<Request>,
    connected: watch::Receiver<bool>,
}

impl CommandQueueClient {
    /// Spawn the channel task. Nothing connects until [`connect`](Self::connect).
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(
        port: PortType,
        endpoint: Endpoint,
        identity: Identity,
        config: ClientConfig,
        sequence: MessageIdSequence,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(false);
        let task = ChannelTask {
            port,
            endpoint: endpoint.clone(),
            identity,
            queue: CommandQueue::new(config.command_timeout, config.timed_out_retention),
            config,
            sequence,
            requests: requests_rx,
            status: status_tx,
            events,
            socket: None,
            connecting: None,
            should_be_connected: false,
            last_attempt: None,
            reconnect_timer: None,
            reconnect_attempt: 0,
        };
        tokio::spawn(task.run());
        Self {
            port,
            endpoint,
            requests: requests_tx,
            connected: status_rx,
        }
    }

    pub fn port(&self) -> PortType {
        self.port
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch the socket's connected state.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Start connecting. Repeated calls within the reconnect delay collapse
    /// into the attempt already running.
    pub fn connect(&self) {
        let _ = self.requests.send(Request::Connect);
    }

    /// Append a command to the queue.
    pub fn queue_command(&self, message: MosMessage) -> PendingReply {
        self.queue_command_at(message, Instant::now())
    }

    /// Append a command, counting its queue time from `enqueued_at`.
    pub fn queue_command_at(&self, message: MosMessage, enqueued_at: Instant) -> PendingReply {
        let (responder, rx) = oneshot::channel();
        let request = Request::Queue {
            message,
            enqueued_at,
            responder,
        };
        if let Err(mpsc::error::SendError(Request::Queue { responder, .. })) = self.requests.send(request) {
            let _ = responder.send(Err(CommandError::Closed));
        }
        PendingReply { rx }
    }

    /// Queue `message` and wait for its reply.
    pub async fn execute(&self, message: MosMessage) -> Result<IncomingMessage, CommandError> {
        self.queue_command(message).wait().await
    }

    /// Take every non-heartbeat command off this channel.
    pub async fn hand_over_queue(&self) -> HandedOverQueue {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::HandOver(tx)).is_err() {
            return HandedOverQueue::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Append commands handed over from another channel.
    pub fn requeue(&self, handed: HandedOverQueue) {
        if let Err(mpsc::error::SendError(Request::Requeue(handed))) =
            self.requests.send(Request::Requeue(handed))
        {
            handed.fail(CommandError::Closed);
        }
    }

    /// Stop the channel: fail outstanding commands, close the socket, cancel timers.
    pub async fn dispose(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Dispose(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// `mosID`/`ncsID` written into every envelope on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub mos_id: String,
    pub ncs_id: String,
}

struct Socket {
    reader: FramedRead<OwnedReadHalf, MosCodec>,
    writer: FramedWrite<OwnedWriteHalf, MosCodec>,
}

enum Wake {
    Request(Option<Request>),
    Connected(Result<MosStream, TransportError>),
    Unit(Option<Result<FramedUnit, FrameError>>),
    Timer,
    Reconnect,
}

struct ChannelTask {
    port: PortType,
    endpoint: Endpoint,
    identity: Identity,
    config: ClientConfig,
    sequence: MessageIdSequence,
    queue: CommandQueue,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<bool>,
    events: broadcast::Sender<ConnectionEvent>,
    socket: Option<Socket>,
    connecting: Option<ConnectFuture>,
    should_be_connected: bool,
    last_attempt: Option<Instant>,
    reconnect_timer: Option<Interval>,
    reconnect_attempt: u32,
}

impl ChannelTask {
    async fn run(mut self) {
        loop {
            let deadline = self.queue.next_deadline(self.is_connected());
            let wake = tokio::select! {
                request = self.requests.recv() => Wake::Request(request),
                result = wait_connect(&mut self.connecting), if self.connecting.is_some() => Wake::Connected(result),
                unit = next_unit(&mut self.socket), if self.socket.is_some() => Wake::Unit(unit),
                _ = sleep_until(deadline), if deadline.is_some() => Wake::Timer,
                _ = tick(&mut self.reconnect_timer), if self.reconnect_timer.is_some() => Wake::Reconnect,
            };

            match wake {
                Wake::Request(None) => {
                    // Every handle is gone.
                    self.shutdown();
                    return;
                }
                Wake::Request(Some(Request::Dispose(done))) => {
                    self.shutdown();
                    let _ = done.send(());
                    return;
                }
                Wake::Request(Some(request)) => self.on_request(request),
                Wake::Connected(result) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }
                Wake::Unit(Some(Ok(unit))) => self.on_unit(unit),
                Wake::Unit(Some(Err(err))) => self.on_closed(Some(err.to_string())),
                Wake::Unit(None) => self.on_closed(None),
                Wake::Timer => {
                    let now = Instant::now();
                    if let Some(retry) = self.queue.on_timer(now, self.is_connected()) {
                        self.transmit(retry).await;
                    }
                }
                Wake::Reconnect => self.on_reconnect_tick(),
            }

            self.drain().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Queue {
                message,
                enqueued_at,
                responder,
            } => {
                let lease = self.sequence.lease();
                trace!(port = %self.port, message_id = %lease.id(), kind = message.kind(), "queueing command");
                self.queue
                    .push(QueuedCommand::leased(lease, message, enqueued_at, responder));
            }
            Request::Requeue(handed) => {
                debug!(port = %self.port, count = handed.len(), "taking over commands");
                self.queue.requeue(handed);
            }
            Request::HandOver(reply) => {
                let handed = self.queue.hand_over();
                debug!(port = %self.port, count = handed.len(), "handing over commands");
                if let Err(handed) = reply.send(handed) {
                    self.queue.requeue(handed);
                }
            }
            Request::Connect => self.connect(),
            // Handled by the run loop.
            Request::Dispose(_) => {}
        }
    }

    fn connect(&mut self) {
        if self.queue.is_disposed() || self.is_connected() {
            return;
        }
        let now = Instant::now();
        let throttled = self
            .last_attempt
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.reconnect_delay);
        if !throttled {
            if self.connecting.take().is_some() {
                debug!(port = %self.port, endpoint = %self.endpoint, "abandoning pending connection attempt");
            }
            let endpoint = self.endpoint.clone();
            let timeout = self.config.connect_timeout;
            self.connecting = Some(Box::pin(async move { endpoint.connect(timeout).await }));
            self.should_be_connected = true;
            self.last_attempt = Some(now);
        }
        if self.config.auto_reconnect && self.reconnect_timer.is_none() {
            let period = self.config.reconnect_delay.max(Duration::from_millis(1));
            let mut timer = tokio::time::interval_at(now + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.reconnect_timer = Some(timer);
        }
    }

    fn on_reconnect_tick(&mut self) {
        if !self.config.auto_reconnect {
            return;
        }
        let cap = self.config.reconnect_attempts;
        if cap > 0 && self.reconnect_attempt >= cap {
            warn!(port = %self.port, endpoint = %self.endpoint, attempts = cap, "giving up reconnecting");
            self.clear_reconnect_timer();
            return;
        }
        if !self.is_connected() {
            self.reconnect_attempt += 1;
            self.connect();
        }
    }

    fn clear_reconnect_timer(&mut self) {
        self.reconnect_attempt = 0;
        self.reconnect_timer = None;
    }

    fn on_connect_result(&mut self, result: Result<MosStream, TransportError>) {
        match result {
            Ok(stream) => {
                let (read, write) = stream.into_split();
                let frame = self.config.frame_config();
                self.socket = Some(Socket {
                    reader: FramedRead::new(read, MosCodec::with_config(frame.clone())),
                    writer: FramedWrite::new(write, MosCodec::with_config(frame)),
                });
                self.clear_reconnect_timer();
                info!(port = %self.port, endpoint = %self.endpoint, "channel connected");
                self.set_connected(true);
            }
            Err(err) => {
                debug!(port = %self.port, endpoint = %self.endpoint, error = %err, "connection attempt failed");
                self.emit_warning(format!("Socket {} {} error: {err}", self.port, self.endpoint.port));
                self.reconnect_if_needed();
            }
        }
    }

    fn on_closed(&mut self, error: Option<String>) {
        if self.socket.take().is_none() {
            return;
        }
        match &error {
            Some(err) => {
                warn!(port = %self.port, endpoint = %self.endpoint, error = %err, "socket closed with error");
                self.emit_warning("Socket closed with error".to_string());
            }
            None => info!(port = %self.port, endpoint = %self.endpoint, "socket closed"),
        }
        self.set_connected(false);
        self.reconnect_if_needed();
    }

    fn reconnect_if_needed(&mut self) {
        if self.should_be_connected && !self.queue.is_disposed() {
            warn!(port = %self.port, endpoint = %self.endpoint, "socket should reconnect");
            self.emit_warning("Socket should reconnect".to_string());
            self.connect();
        }
    }

    fn on_unit(&mut self, unit: FramedUnit) {
        let document = match unit {
            FramedUnit::Document(document) => document,
            FramedUnit::Malformed { raw, error } => {
                warn!(port = %self.port, %error, "malformed document");
                self.emit_error(format!("{error}: {raw}"));
                return;
            }
        };
        let message = match IncomingMessage::decode(document) {
            Ok(message) => message,
            Err(err) => {
                warn!(port = %self.port, error = %err, "undecodable document");
                self.emit_error(err.to_string());
                return;
            }
        };
        trace!(port = %self.port, message_id = ?message.message_id, kind = ?message.kind(), "received");

        let raw = message.raw.clone();
        match self.queue.on_reply(Instant::now(), message) {
            ReplyOutcome::Resolved { id } | ReplyOutcome::Rejected { id } => {
                trace!(port = %self.port, message_id = %id, "reply correlated");
            }
            ReplyOutcome::Deferred { id } => {
                debug!(port = %self.port, message_id = %id, "buddy server deferred to main server");
            }
            ReplyOutcome::Mismatch { expected, received } => {
                warn!(port = %self.port, %expected, %received, "reply id mismatch");
                self.emit_warning(format!("Mos reply id diff: {received}, {expected}"));
            }
            ReplyOutcome::Late { id, after } => {
                debug!(port = %self.port, message_id = %id, ?after, "reply arrived after command timed out");
            }
            ReplyOutcome::Unexpected { id } => {
                warn!(port = %self.port, message_id = %id, "reply to a command that was never sent");
                self.emit_warning(format!(
                    "Got a reply ({id}), but we haven't sent any message: \"{raw}\""
                ));
            }
            ReplyOutcome::NackWithoutId { description } => {
                self.emit_error(format!("Error message: {description}"));
            }
            ReplyOutcome::Unknown => self.emit_error(format!("Unknown message: {raw}")),
        }
    }

    async fn drain(&mut self) {
        while let Some(transmit) = self.queue.poll_transmit(Instant::now(), self.is_connected()) {
            self.transmit(transmit).await;
        }
    }

    async fn transmit(&mut self, transmit: Transmit) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let envelope = Envelope {
            ncs_id: self.identity.ncs_id.clone(),
            mos_id: self.identity.mos_id.clone(),
            message_id: transmit.id,
        };
        let xml = transmit.message.to_xml(&envelope);
        trace!(port = %self.port, message_id = %transmit.id, retry = transmit.retry, "sending");
        if let Err(err) = socket.writer.send(xml).await {
            self.on_closed(Some(err.to_string()));
        }
    }

    fn set_connected(&mut self, connected: bool) {
        let changed = self.status.send_replace(connected) != connected;
        if changed {
            let _ = self.events.send(ConnectionEvent::ChannelStatus {
                port: self.port,
                connected,
            });
        }
    }

    fn emit_warning(&self, message: String) {
        let _ = self.events.send(ConnectionEvent::Warning {
            port: self.port,
            message,
        });
    }

    fn emit_error(&self, message: String) {
        let _ = self.events.send(ConnectionEvent::Error {
            port: self.port,
            message,
        });
    }

    fn shutdown(&mut self) {
        debug!(port = %self.port, endpoint = %self.endpoint, "disposing channel");
        self.should_be_connected = false;
        self.queue.dispose();
        self.connecting = None;
        self.clear_reconnect_timer();
        self.socket = None;
        self.set_connected(false);
    }
}

async fn wait_connect(connecting: &mut Option<ConnectFuture>) -> Result<MosStream, TransportError> {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_unit(socket: &mut Option<Socket>) -> Option<Result<FramedUnit, FrameError>> {
    match socket {
        Some(socket) => socket.reader.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    fn task(config: ClientConfig) -> ChannelTask {
        let (_requests, requests) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(false);
        let (events, _) = broadcast::channel(8);
        ChannelTask {
            port: PortType::Lower,
            endpoint: Endpoint::new("127.0.0.1", 1),
            identity: Identity {
                mos_id: "mos.test".into(),
                ncs_id: "ncs.test".into(),
            },
            queue: CommandQueue::new(config.command_timeout, config.timed_out_retention),
            config,
            sequence: MessageIdSequence::new(),
            requests,
            status,
            events,
            socket: None,
            connecting: None,
            should_be_connected: false,
            last_attempt: None,
            reconnect_timer: None,
            reconnect_attempt: 0,
        }
    }

    /// A connection attempt that never finishes; the receiver closes when it is dropped.
    fn stalled_attempt() -> (ConnectFuture, oneshot::Receiver<()>) {
        let (alive, dropped) = oneshot::channel::<()>();
        let attempt: ConnectFuture = Box::pin(async move {
            let _alive = alive;
            std::future::pending::<Result<MosStream, TransportError>>().await
        });
        (attempt, dropped)
    }

    fn config(reconnect_delay_ms: u64) -> ClientConfig {
        ClientConfig {
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stalled_attempt_is_abandoned_after_the_delay() {
        let mut task = task(config(100));
        let (attempt, mut dropped) = stalled_attempt();
        task.connecting = Some(attempt);
        task.last_attempt = Some(Instant::now() - Duration::from_secs(1));

        task.connect();
        assert_eq!(dropped.try_recv(), Err(TryRecvError::Closed));
        assert!(task.connecting.is_some());
        assert!(task.should_be_connected);
        assert!(task.reconnect_timer.is_some());
    }

    #[tokio::test]
    async fn test_attempt_within_the_delay_is_kept() {
        let mut task = task(config(60_000));
        let (attempt, mut dropped) = stalled_attempt();
        task.connecting = Some(attempt);
        let started = Instant::now();
        task.last_attempt = Some(started);

        task.connect();
        assert_eq!(dropped.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(task.last_attempt, Some(started));
    }

    #[tokio::test]
    async fn test_no_reconnect_timer_without_auto_reconnect() {
        let mut task = task(ClientConfig {
            auto_reconnect: false,
            ..config(100)
        });
        task.connect();
        assert!(task.connecting.is_some());
        assert!(task.reconnect_timer.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_timer_stops_at_the_attempt_cap() {
        let mut task = task(ClientConfig {
            reconnect_attempts: 2,
            ..config(100)
        });
        task.connect();
        task.connecting = None;
        task.last_attempt = None;

        task.on_reconnect_tick();
        task.last_attempt = None;
        task.on_reconnect_tick();
        assert_eq!(task.reconnect_attempt, 2);
        assert!(task.reconnect_timer.is_some());

        task.on_reconnect_tick();
        assert!(task.reconnect_timer.is_none());
        assert_eq!(task.reconnect_attempt, 0);
    }
}
