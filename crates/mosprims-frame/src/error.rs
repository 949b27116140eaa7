/// Errors that can occur while framing or parsing MOS documents.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The input could not be delimited into a document.
    #[error("malformed document: {reason}")]
    Malformed { reason: String },

    /// A document grew past the configured maximum without completing.
    #[error("document too large ({size} chars, max {max})")]
    Oversized { size: usize, max: usize },

    /// The document was delimited but is not well-formed XML.
    #[error("invalid XML: {0}")]
    Xml(String),

    /// An I/O error occurred while reading or writing documents.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a document.
    #[error("connection closed (incomplete document)")]
    ConnectionClosed,
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        Self::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
