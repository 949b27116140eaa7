//! Typed values, envelopes and message variants for the MOS protocol.
//!
//! - [`types`]: `MosString128`, `MosTime`, `MosDuration` with strict or
//!   lenient construction
//! - [`field`]: field-level parsing that reports defects by path
//! - [`message`]: message ids, the envelope and outgoing message variants
//! - [`incoming`]: decoding received documents into envelope + payload
//! - [`machine_info`]: the profile 0 machine description

pub mod error;
pub mod field;
pub mod incoming;
pub mod machine_info;
pub mod message;
pub mod types;

pub use error::{ModelError, ParseError, Result, ValidationError};
pub use field::{Defect, FieldValue, ParseContext, Parsed};
pub use incoming::IncomingMessage;
pub use machine_info::{MachineInfo, SupportedProfiles};
pub use message::{AckStatus, Envelope, MessageId, MosAck, MosMessage, PortType, BUDDY_DEFERRAL};
pub use types::{
    AnyMosValue, DurationInput, MosDuration, MosString128, MosTime, MosType, MosTypeTag, MosTypes,
    Strictness, TimeInput,
};
