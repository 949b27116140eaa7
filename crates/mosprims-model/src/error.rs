/// A typed value rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("string length {len} exceeds the maximum of {max} characters")]
    TooLong { len: usize, max: usize },

    #[error("Invalid timestamp: \"{raw}\"")]
    InvalidTimestamp { raw: String },

    #[error("Invalid duration: \"{raw}\"")]
    InvalidDuration { raw: String },

    #[error("required field is missing")]
    Missing,
}

/// A field of a received message failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unable to parse MOS reply at \"{path}\": {source}")]
pub struct ParseError {
    /// Dotted path of the offending field, e.g. `listMachInfo.time`.
    pub path: String,
    #[source]
    pub source: ValidationError,
}

/// Errors decoding a document into a MOS message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("not a MOS document (root element <{found}>)")]
    NotMosDocument { found: String },

    #[error("MOS message has no payload element")]
    MissingPayload,

    #[error("expected <{expected}> payload, got <{found}>")]
    UnexpectedPayload { expected: String, found: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, ModelError>;
