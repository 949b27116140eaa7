use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use mosprims_model::{IncomingMessage, MachineInfo, MosMessage, Parsed, PortType, Strictness};
use mosprims_transport::Endpoint;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{CommandQueueClient, Identity, PendingReply};
use crate::config::ConnectionConfig;
use crate::error::{CommandError, PeerError, Result};
use crate::event::ConnectionEvent;
use crate::queue::HandedOverQueue;
use crate::sequence::MessageIdSequence;

const EVENT_CAPACITY: usize = 256;

/// Connected state of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub port: PortType,
    pub tcp_port: u16,
    pub connected: bool,
}

/// Snapshot of a [`ServerConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub id: String,
    pub host: String,
    pub connected: bool,
    pub heartbeat_enabled: bool,
    pub channels: Vec<ChannelStatus>,
}

/// The channels to one NCS, treated as one logical connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ConnectionConfig,
    clients: BTreeMap<PortType, CommandQueueClient>,
    heartbeat_enabled: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectionEvent>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = match self.heartbeat_task.get_mut() {
            Ok(task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl ServerConnection {
    /// Create the channel tasks for every configured channel.
    ///
    /// Must be called within a tokio runtime. Heartbeats start disabled.
    pub fn new(config: ConnectionConfig, mos_id: impl Into<String>, sequence: MessageIdSequence) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let identity = Identity {
            mos_id: mos_id.into(),
            ncs_id: config.id.clone(),
        };
        let clients = config
            .channels
            .iter()
            .map(|&port| {
                let endpoint = Endpoint::new(config.host.clone(), config.ports.port(port));
                let client = CommandQueueClient::spawn(
                    port,
                    endpoint,
                    identity.clone(),
                    config.client.clone(),
                    sequence.clone(),
                    events.clone(),
                );
                (port, client)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                clients,
                heartbeat_enabled: Arc::new(AtomicBool::new(false)),
                events,
                heartbeat_task: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Connect every channel and start the heartbeat ticker.
    pub fn connect(&self) {
        for client in self.inner.clients.values() {
            client.connect();
        }
        self.start_heartbeats();
    }

    /// True when every configured channel is connected.
    pub fn connected(&self) -> bool {
        !self.inner.clients.is_empty() && self.inner.clients.values().all(CommandQueueClient::is_connected)
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.inner.heartbeat_enabled.load(Ordering::Acquire)
    }

    /// Suppress or resume heartbeats, regardless of socket state.
    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        let previous = self.inner.heartbeat_enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!(connection = %self.id(), enabled, "heartbeat toggled");
        }
    }

    /// Subscribe to channel status changes, warnings and errors.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn client(&self, port: PortType) -> Option<&CommandQueueClient> {
        self.inner.clients.get(&port)
    }

    /// Queue `message` on the channel for its category.
    pub fn queue(&self, message: MosMessage) -> std::result::Result<PendingReply, CommandError> {
        let port = message.port();
        let client = self
            .client(port)
            .ok_or(CommandError::ChannelUnavailable { port })?;
        Ok(client.queue_command(message))
    }

    /// Queue `message` and wait for its reply.
    pub async fn execute(&self, message: MosMessage) -> std::result::Result<IncomingMessage, CommandError> {
        self.queue(message)?.wait().await
    }

    /// Ask the NCS to describe itself.
    pub async fn request_machine_info(&self, strictness: Strictness) -> Result<Parsed<MachineInfo>> {
        let reply = self.execute(MosMessage::ReqMachInfo).await?;
        Ok(reply.machine_info(strictness)?)
    }

    /// Remove all non-heartbeat commands from every channel.
    pub async fn hand_over_queue(&self) -> Vec<(PortType, HandedOverQueue)> {
        let mut handed = Vec::new();
        for (&port, client) in &self.inner.clients {
            let queue = client.hand_over_queue().await;
            if !queue.is_empty() {
                handed.push((port, queue));
            }
        }
        handed
    }

    /// Take over commands handed over from another connection.
    ///
    /// Commands for a channel this connection does not have are failed.
    pub fn requeue(&self, handed: Vec<(PortType, HandedOverQueue)>) {
        for (port, queue) in handed {
            match self.client(port) {
                Some(client) => client.requeue(queue),
                None => {
                    warn!(connection = %self.id(), %port, count = queue.len(), "no channel for handed-over commands");
                    queue.fail(CommandError::ChannelUnavailable { port });
                }
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            id: self.inner.config.id.clone(),
            host: self.inner.config.host.clone(),
            connected: self.connected(),
            heartbeat_enabled: self.heartbeat_enabled(),
            channels: self
                .inner
                .clients
                .iter()
                .map(|(&port, client)| ChannelStatus {
                    port,
                    tcp_port: client.endpoint().port,
                    connected: client.is_connected(),
                })
                .collect(),
        }
    }

    /// Wait until the connection reports connected, or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> Result<()> {
        let mut events = self.subscribe();
        let wait = async {
            while !self.connected() {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(PeerError::Command(CommandError::Closed)),
                }
            }
            Ok(())
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PeerError::Timeout(timeout))?
    }

    /// Stop heartbeats and dispose every channel.
    pub async fn dispose(&self) {
        if let Some(task) = self.take_heartbeat_task() {
            task.abort();
        }
        self.set_heartbeat_enabled(false);
        for client in self.inner.clients.values() {
            client.dispose().await;
        }
        debug!(connection = %self.id(), "connection disposed");
    }

    fn take_heartbeat_task(&self) -> Option<JoinHandle<()>> {
        match self.inner.heartbeat_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn start_heartbeats(&self) {
        let mut guard = match self.inner.heartbeat_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }

        let clients: Vec<CommandQueueClient> = self
            .inner
            .clients
            .values()
            .filter(|c| c.port().carries_heartbeat())
            .cloned()
            .collect();
        let enabled = Arc::clone(&self.inner.heartbeat_enabled);
        let period = self.inner.config.heartbeat_interval.max(std::time::Duration::from_millis(1));
        let connection = self.inner.config.id.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if !enabled.load(Ordering::Acquire) {
                    continue;
                }
                // The next round is only armed once every heartbeat of this one settled.
                let round = clients.iter().filter(|c| c.is_connected()).map(|client| {
                    let port = client.port();
                    let pending = client.queue_command(MosMessage::heartbeat(port));
                    async move { (port, pending.wait().await) }
                });
                for (port, result) in join_all(round).await {
                    match result {
                        Ok(_) | Err(CommandError::Superseded | CommandError::Disposed) => {}
                        Err(err) => warn!(%connection, %port, error = %err, "heartbeat failed"),
                    }
                }
            }
        }));
    }
}
