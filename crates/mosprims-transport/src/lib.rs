//! TCP transport for MOS protocol channels.
//!
//! Every MOS channel (lower, upper, query) is one persistent TCP connection.
//! This is the lowest layer of mosprims: it knows how to reach a host and port,
//! bind a listening port, and hand back a [`MosStream`]. It knows nothing about
//! encodings or messages.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::MosStream;
pub use tcp::{Endpoint, MosTcpListener};
