use mosprims_model::PortType;

/// Notifications published by a connection's channels.
///
/// Delivered over a `tokio::sync::broadcast` channel; a lagging subscriber
/// should re-read current state rather than replay missed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A channel's socket connected or disconnected.
    ChannelStatus { port: PortType, connected: bool },
    /// Recoverable problem: socket trouble, reply id mismatch, unexpected reply.
    Warning { port: PortType, message: String },
    /// A received document that could not be handled.
    Error { port: PortType, message: String },
}

impl ConnectionEvent {
    pub fn port(&self) -> PortType {
        match self {
            Self::ChannelStatus { port, .. } | Self::Warning { port, .. } | Self::Error { port, .. } => *port,
        }
    }
}
