//! MOS protocol transport and session layer.
//!
//! mosprims speaks the MOS (Media Object Server) protocol used between newsroom
//! systems and broadcast devices: UTF-16 XML documents over persistent TCP
//! channels, with queued request/reply correlation and primary/secondary
//! hot standby.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP streams, connect with timeout, listeners
//! - [`frame`]: wide-character encoding and XML document framing
//! - [`model`]: typed values, message ids, envelopes and message variants
//! - [`peer`]: command queues, server connections, hot standby and the listener
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use mosprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mosprims_frame::*;
}

/// Re-export model types.
pub mod model {
    pub use mosprims_model::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use mosprims_peer::*;
}
