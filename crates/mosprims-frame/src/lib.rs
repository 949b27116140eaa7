//! UTF-16 XML document framing for MOS protocol streams.
//!
//! MOS has no length prefix. Each message is a single XML document, sent as
//! big-endian UTF-16, and documents follow each other on the socket with
//! nothing in between but optional whitespace. This crate:
//! - decodes the wide encoding incrementally (odd byte counts and split
//!   surrogate pairs across reads are fine)
//! - finds document boundaries by tracking element balance
//! - parses each complete document into a small element tree
//!
//! Malformed input yields a [`FramedUnit::Malformed`] for the offending unit;
//! the rest of the buffer is kept and framing continues.

pub mod boundary;
#[cfg(feature = "async")]
pub mod codec;
pub mod encoding;
pub mod error;
pub mod framer;
pub mod xml;

pub use boundary::{scan_document, Boundary, BoundaryScanner};
#[cfg(feature = "async")]
pub use codec::MosCodec;
pub use encoding::{encode_wide, WideDecoder};
pub use error::{FrameError, Result};
pub use framer::{Document, FrameConfig, FramedUnit, MessageFramer, DEFAULT_MAX_DOCUMENT_CHARS};
pub use xml::{XmlElement, XmlNode};
