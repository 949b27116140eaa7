//! MOS session layer.
//!
//! - [`CommandQueueClient`]: one TCP channel with a FIFO command queue, a
//!   single command in flight, timeout with one retry, and reconnection
//! - [`ServerConnection`]: the lower/upper/query channels to one NCS, with
//!   routing by message category and heartbeat emission
//! - [`HotStandbyController`]: primary/secondary failover that keeps at most
//!   one connection heart-beating and moves pending work on failover
//! - [`MosListener`]: the server role, answering heartbeats and machine info
//!   requests from an NCS
//!
//! Everything runs on tokio. Each channel is a task that owns its socket and
//! queue; handles talk to it over channels, so no state is shared behind locks.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod listener;
pub mod queue;
pub mod sequence;
pub mod standby;

pub use client::{CommandQueueClient, Identity, PendingReply};
pub use config::{ChannelPorts, ClientConfig, ConnectionConfig, DeviceConfig, ListenerConfig};
pub use connection::{ChannelStatus, ConnectionStatus, ServerConnection};
pub use error::{CommandError, PeerError, Result};
pub use event::ConnectionEvent;
pub use listener::{respond, MessageHandler, MosListener};
pub use queue::{CommandQueue, HandedOverQueue, QueuedCommand, ReplyOutcome, Transmit};
pub use sequence::{IdLease, MessageIdSequence};
pub use standby::{decide, ActiveConnection, DeviceStatus, HotStandbyController};
