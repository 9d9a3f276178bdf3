//! Stream plumbing: the FLAP codec and the FLAP client built on top of it.

pub mod flap_client;
pub mod flap_codec;

pub use flap_client::{FlapClient, FlapSignonFrame, FLAP_VERSION};
pub use flap_codec::FlapCodec;
