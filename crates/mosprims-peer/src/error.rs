use std::time::Duration;

use mosprims_model::PortType;

/// Why a single command did not get a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Waited in the queue longer than the command timeout without being sent.
    #[error("command timed out in queue after {} ms", waited.as_millis())]
    QueueTimeout { waited: Duration },

    /// Sent, retried once, and still no reply.
    #[error("sent command timed out after {} ms", elapsed.as_millis())]
    SentTimeout { elapsed: Duration },

    /// Failed by the cleanup pass that follows a reply id mismatch.
    #[error("command timed out during queue cleanup after {} ms", waited.as_millis())]
    CleanupTimeout { waited: Duration },

    /// The channel was disposed while the command was outstanding.
    #[error("connection disposed")]
    Disposed,

    /// The peer answered with a NACK.
    #[error("command rejected: {description}")]
    Nack { description: String },

    /// A lingering heartbeat was replaced before its late reply arrived.
    #[error("command superseded before its reply arrived")]
    Superseded,

    /// No channel is configured for the message category.
    #[error("{port} channel is not configured")]
    ChannelUnavailable { port: PortType },

    /// The channel task is gone.
    #[error("channel task stopped")]
    Closed,
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::QueueTimeout { .. } | Self::SentTimeout { .. } | Self::CleanupTimeout { .. }
        )
    }
}

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mosprims_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] mosprims_frame::FrameError),

    /// The reply could not be decoded.
    #[error(transparent)]
    Model(#[from] mosprims_model::ModelError),

    /// The command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Waiting for a condition timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
