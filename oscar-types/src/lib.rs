//! Wire-level types for the OSCAR protocol: FLAP framing, SNAC framing, and
//! TLVs. This crate has no I/O of its own — it only encodes/decodes bytes —
//! so the stream plumbing in `oscar-core` and the connection lifecycle in
//! `oscar-server` can both depend on it without pulling in tokio.

pub mod error;
pub mod flap;
pub mod snac;
pub mod tlv;

pub use error::ErrorKind;
pub use flap::{FlapFrame, FlapFrameType, FlapHeader};
pub use snac::{SnacFrame, SnacMessage};
pub use tlv::{Tlv, TlvBlock};
