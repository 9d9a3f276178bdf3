//! Error kinds distinguished by the OSCAR core (see `ERROR HANDLING DESIGN`).

use thiserror::Error;

/// The full set of error conditions the connection lifecycle distinguishes.
///
/// Most variants are terminal for the connection; the doc comment on each
/// notes the handling policy so call sites don't have to cross-reference the
/// dispatcher.
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// FLAP header or payload could not be parsed. Terminal.
    #[error("malformed FLAP frame: {0}")]
    MalformedFrame(String),

    /// Unexpected frame type or SNAC at the current state. Terminal.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Missing session id, cookie-crack failure, or unknown session. Terminal.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// IP-level admission rejection. Handled inline by the signon state
    /// machine; never propagated to the supervisor as a connection error.
    #[error("rate limited at login")]
    RateLimitedAtLogin,

    /// Per-session per-rate-class admission rejection. The SNAC is dropped
    /// silently and the connection continues; this variant exists for
    /// logging, not for termination.
    #[error("rate limited in flight")]
    RateLimitedInFlight,

    /// The handler had no route for `(food_group, sub_group)`. Recoverable:
    /// the dispatcher answers with an `INVALID_SNAC` error SNAC and continues.
    #[error("no route for food group {food_group:#06x} sub group {sub_group:#06x}")]
    RouteNotFound { food_group: u16, sub_group: u16 },

    /// Any other failure returned by the SNAC handler capability. Terminal.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Socket read/write failure. Terminal; logged at `info` on EOF, `error`
    /// otherwise.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Graceful shutdown was requested. Not really a failure: the dispatcher
    /// sends a signoff frame and exits cleanly.
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl ErrorKind {
    /// `true` for conditions the dispatcher handles as a continue-path
    /// rather than tearing down the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitedInFlight | ErrorKind::RouteNotFound { .. }
        )
    }
}

/// Convenience alias used throughout the crate family.
pub type Result<T> = std::result::Result<T, ErrorKind>;
