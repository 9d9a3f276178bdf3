//! FLAP stream framing, the FLAP client, the IP admission rate limiter, and
//! shared configuration plumbing for the OSCAR protocol core.

pub mod comms;
pub mod config;
pub mod rate_limiter;

pub use comms::{FlapClient, FlapSignonFrame, FLAP_VERSION};
pub use rate_limiter::{IpRateLimiter, RateLimiterConfig};

pub use oscar_types as types;
