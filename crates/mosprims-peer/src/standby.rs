//! Primary/secondary failover.
//!
//! The controller watches both connections and keeps exactly one of them
//! "active". Only the active connection sends heartbeats; the standby stays
//! connected but silent. When the active connection drops, its pending
//! commands are moved to the other one.
//!
//! Heartbeat flags are only ever flipped here, and always disable-first, so no
//! observer can see both enabled.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mosprims_model::{IncomingMessage, MosMessage};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::PendingReply;
use crate::config::DeviceConfig;
use crate::connection::{ConnectionStatus, ServerConnection};
use crate::error::CommandError;
use crate::event::ConnectionEvent;
use crate::sequence::MessageIdSequence;

/// Which connection is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveConnection {
    Primary,
    Secondary,
    None,
}

/// Next active connection given the current one and who is connected.
///
/// The active connection keeps its role while connected. Otherwise the other
/// connection takes over if it is connected. From `None`, the primary wins
/// a tie.
pub fn decide(active: ActiveConnection, primary_connected: bool, secondary_connected: bool) -> ActiveConnection {
    use ActiveConnection::{None as Neither, Primary, Secondary};
    match active {
        Primary if primary_connected => Primary,
        Secondary if secondary_connected => Secondary,
        Primary if secondary_connected => Secondary,
        Secondary if primary_connected => Primary,
        Neither if primary_connected => Primary,
        Neither if secondary_connected => Secondary,
        _ => Neither,
    }
}

/// Snapshot of a device's connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub active: ActiveConnection,
    pub primary: ConnectionStatus,
    pub secondary: Option<ConnectionStatus>,
}

#[derive(Debug, Clone, Copy)]
struct State {
    active: ActiveConnection,
    /// Last connection that was active; pending work lives there while neither is.
    last_active: ActiveConnection,
}

impl State {
    /// Connection commands go to: the active one, else the last active one.
    fn route(self) -> ActiveConnection {
        match self.active {
            ActiveConnection::None => self.last_active,
            active => active,
        }
    }
}

#[derive(Debug)]
struct Inner {
    primary: ServerConnection,
    secondary: Option<ServerConnection>,
    state: Mutex<State>,
    /// Held for a whole transition so evaluations never interleave.
    transition: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = match self.monitor.get_mut() {
            Ok(task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Owns the primary and optional secondary connection of one device.
#[derive(Debug, Clone)]
pub struct HotStandbyController {
    inner: Arc<Inner>,
}

impl HotStandbyController {
    /// Build the connections described by `config`.
    ///
    /// Without `hot_standby` any secondary is ignored and the controller is a
    /// pass-through to the primary, whose heartbeat is always on.
    pub fn new(config: &DeviceConfig, sequence: MessageIdSequence) -> Self {
        let primary = ServerConnection::new(config.primary.clone(), config.mos_id.clone(), sequence.clone());
        let secondary = match (&config.secondary, config.hot_standby) {
            (Some(secondary), true) => Some(ServerConnection::new(
                secondary.clone(),
                config.mos_id.clone(),
                sequence,
            )),
            (Some(secondary), false) => {
                warn!(connection = %secondary.id, "secondary configured without hot standby, ignoring it");
                None
            }
            (None, _) => None,
        };
        Self::from_connections(primary, secondary)
    }

    /// Wrap existing connections.
    pub fn from_connections(primary: ServerConnection, secondary: Option<ServerConnection>) -> Self {
        primary.set_heartbeat_enabled(secondary.is_none());
        if let Some(secondary) = &secondary {
            secondary.set_heartbeat_enabled(false);
        }
        Self {
            inner: Arc::new(Inner {
                primary,
                secondary,
                state: Mutex::new(State {
                    active: ActiveConnection::None,
                    last_active: ActiveConnection::Primary,
                }),
                transition: tokio::sync::Mutex::new(()),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn primary(&self) -> &ServerConnection {
        &self.inner.primary
    }

    pub fn secondary(&self) -> Option<&ServerConnection> {
        self.inner.secondary.as_ref()
    }

    pub fn is_hot_standby(&self) -> bool {
        self.inner.secondary.is_some()
    }

    pub fn active(&self) -> ActiveConnection {
        self.state().active
    }

    /// Start monitoring and connect both connections.
    pub fn connect(&self) {
        self.start_monitor();
        self.inner.primary.connect();
        if let Some(secondary) = &self.inner.secondary {
            secondary.connect();
        }
    }

    /// Connection commands go to: the active one, else the last active one.
    pub fn current(&self) -> &ServerConnection {
        self.connection(self.state().route()).unwrap_or(&self.inner.primary)
    }

    /// Queue `message` on the current connection.
    ///
    /// The state lock is held while queueing, so a command never lands on a
    /// connection after a failover has started draining it.
    pub fn queue(&self, message: MosMessage) -> Result<PendingReply, CommandError> {
        let state = self.lock_state();
        self.connection(state.route())
            .unwrap_or(&self.inner.primary)
            .queue(message)
    }

    /// Send `message` through the current connection.
    pub async fn execute(&self, message: MosMessage) -> Result<IncomingMessage, CommandError> {
        self.queue(message)?.wait().await
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            active: self.active(),
            primary: self.inner.primary.status(),
            secondary: self.inner.secondary.as_ref().map(ServerConnection::status),
        }
    }

    /// Stop monitoring and dispose both connections.
    pub async fn dispose(&self) {
        let task = match self.inner.monitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.primary.dispose().await;
        if let Some(secondary) = &self.inner.secondary {
            secondary.dispose().await;
        }
    }

    /// Re-check both connections and apply any role change.
    pub async fn evaluate(&self) {
        let _transition = self.inner.transition.lock().await;
        let current = self.state();
        let primary_connected = self.inner.primary.connected();
        let secondary_connected = self
            .inner
            .secondary
            .as_ref()
            .is_some_and(ServerConnection::connected);
        let next = decide(current.active, primary_connected, secondary_connected);
        if next == current.active {
            return;
        }

        let Some(secondary) = &self.inner.secondary else {
            // Pass-through: only track the role for status reporting.
            self.set_state(next);
            return;
        };
        let primary = &self.inner.primary;
        info!(from = ?current.active, to = ?next, "switching active connection");

        // Disable before enable so the two flags are never both set.
        match next {
            ActiveConnection::Primary => secondary.set_heartbeat_enabled(false),
            ActiveConnection::Secondary => primary.set_heartbeat_enabled(false),
            ActiveConnection::None => {
                primary.set_heartbeat_enabled(false);
                secondary.set_heartbeat_enabled(false);
            }
        }

        // New commands go to `next` from here on; older ones are in the queue handed over below.
        self.set_state(next);

        if next != ActiveConnection::None && next != current.last_active {
            if let (Some(from), Some(to)) = (self.connection(current.last_active), self.connection(next)) {
                let handed = from.hand_over_queue().await;
                let count: usize = handed.iter().map(|(_, q)| q.len()).sum();
                if count > 0 {
                    info!(from = %from.id(), to = %to.id(), count, "moving pending commands");
                }
                to.requeue(handed);
            }
        }

        if let Some(to) = self.connection(next) {
            to.set_heartbeat_enabled(true);
        }
    }

    fn connection(&self, role: ActiveConnection) -> Option<&ServerConnection> {
        match role {
            ActiveConnection::Primary => Some(&self.inner.primary),
            ActiveConnection::Secondary => self.inner.secondary.as_ref(),
            ActiveConnection::None => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> State {
        *self.lock_state()
    }

    fn set_state(&self, active: ActiveConnection) {
        let mut guard = self.lock_state();
        guard.active = active;
        if active != ActiveConnection::None {
            guard.last_active = active;
        }
    }

    fn start_monitor(&self) {
        let mut guard = match self.inner.monitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let primary_events = self.inner.primary.subscribe();
        let secondary_events = self.inner.secondary.as_ref().map(ServerConnection::subscribe);
        let controller = Arc::downgrade(&self.inner);
        *guard = Some(tokio::spawn(monitor(controller, primary_events, secondary_events)));
    }
}

/// Re-evaluate on every connected-state change until the controller is gone.
async fn monitor(
    controller: Weak<Inner>,
    mut primary: broadcast::Receiver<ConnectionEvent>,
    mut secondary: Option<broadcast::Receiver<ConnectionEvent>>,
) {
    loop {
        let event = tokio::select! {
            event = primary.recv() => event,
            event = recv_optional(&mut secondary) => event,
        };
        match event {
            Ok(ConnectionEvent::ChannelStatus { .. }) | Err(RecvError::Lagged(_)) => {
                let Some(inner) = controller.upgrade() else {
                    return;
                };
                HotStandbyController { inner }.evaluate().await;
            }
            Ok(_) => {}
            Err(RecvError::Closed) => {
                debug!("connection events closed, stopping standby monitor");
                return;
            }
        }
    }
}

async fn recv_optional(
    receiver: &mut Option<broadcast::Receiver<ConnectionEvent>>,
) -> Result<ConnectionEvent, RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::ActiveConnection::{None as Neither, Primary, Secondary};
    use super::*;

    #[test]
    fn test_active_keeps_role_while_connected() {
        assert_eq!(decide(Primary, true, true), Primary);
        assert_eq!(decide(Secondary, true, true), Secondary);
        assert_eq!(decide(Primary, true, false), Primary);
    }

    #[test]
    fn test_fail_over_to_connected_standby() {
        assert_eq!(decide(Primary, false, true), Secondary);
        assert_eq!(decide(Secondary, true, false), Primary);
    }

    #[test]
    fn test_neither_connected() {
        assert_eq!(decide(Primary, false, false), Neither);
        assert_eq!(decide(Secondary, false, false), Neither);
        assert_eq!(decide(Neither, false, false), Neither);
    }

    #[test]
    fn test_first_to_connect_wins_from_none() {
        assert_eq!(decide(Neither, false, true), Secondary);
        assert_eq!(decide(Neither, true, false), Primary);
        assert_eq!(decide(Neither, true, true), Primary);
    }
}
