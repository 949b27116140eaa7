use tracing::{debug, warn};

use crate::boundary::{Boundary, BoundaryScanner};
use crate::encoding::WideDecoder;
use crate::error::FrameError;
use crate::xml::XmlElement;

/// Default maximum size of a single buffered document: 16 Mi characters.
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 16 * 1024 * 1024;

/// Configuration for document framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum number of characters buffered for one unfinished document.
    pub max_document_chars: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}

/// A complete, well-formed document together with its raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: XmlElement,
    pub raw: String,
}

/// One unit produced by the framer.
#[derive(Debug)]
pub enum FramedUnit {
    Document(Document),
    /// Text that could not be turned into a document. Framing continues after it.
    Malformed { raw: String, error: FrameError },
}

impl FramedUnit {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::Document(document) => Some(document),
            Self::Malformed { .. } => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(document) => Some(document),
            Self::Malformed { .. } => None,
        }
    }
}

/// Turns a raw byte stream into discrete documents.
///
/// One framer per socket lifetime: feed every chunk read from the socket to
/// [`push`](Self::push), then drain with [`next_unit`](Self::next_unit) until it
/// returns `None`. Units come out in stream order.
#[derive(Debug, Default)]
pub struct MessageFramer {
    decoder: WideDecoder,
    buffer: String,
    scanner: BoundaryScanner,
    config: FrameConfig,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Append raw bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.decoder.decode(bytes, &mut self.buffer);
    }

    /// Characters buffered and not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete unit, or `None` if more input is needed.
    pub fn next_unit(&mut self) -> Option<FramedUnit> {
        let boundary = self.scanner.scan(&self.buffer);
        if boundary != Boundary::Incomplete {
            self.scanner.reset();
        }
        match boundary {
            Boundary::Empty => {
                self.buffer.clear();
                None
            }
            Boundary::Incomplete => {
                if self.buffer.len() <= self.config.max_document_chars {
                    return None;
                }
                let size = self.buffer.chars().count();
                if size <= self.config.max_document_chars {
                    return None;
                }
                warn!(size, max = self.config.max_document_chars, "discarding oversized document");
                self.scanner.reset();
                let raw = std::mem::take(&mut self.buffer);
                Some(FramedUnit::Malformed {
                    raw,
                    error: FrameError::Oversized {
                        size,
                        max: self.config.max_document_chars,
                    },
                })
            }
            Boundary::Garbage { end } => {
                let raw: String = self.buffer.drain(..end).collect();
                debug!(len = raw.len(), "discarding text outside of a document");
                Some(FramedUnit::Malformed {
                    raw,
                    error: FrameError::malformed("text outside of a document"),
                })
            }
            Boundary::Complete { start, end } => {
                let raw = self.buffer[start..end].to_string();
                self.buffer.drain(..end);
                Some(match XmlElement::parse(&raw) {
                    Ok(root) => FramedUnit::Document(Document { root, raw }),
                    Err(error) => FramedUnit::Malformed { raw, error },
                })
            }
        }
    }

    /// Drain every unit currently available.
    pub fn units(&mut self) -> impl Iterator<Item = FramedUnit> + '_ {
        std::iter::from_fn(move || self.next_unit())
    }

    /// Flush at end of stream.
    ///
    /// Call after `next_unit` returned `None`. Any leftover partial document
    /// is returned as malformed.
    pub fn finish(&mut self) -> Option<FramedUnit> {
        let mut tail = String::new();
        self.decoder.finish(&mut tail);
        self.buffer.push_str(&tail);
        self.scanner.reset();
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(FramedUnit::Malformed {
            raw: std::mem::take(&mut self.buffer),
            error: FrameError::ConnectionClosed,
        })
    }
}
