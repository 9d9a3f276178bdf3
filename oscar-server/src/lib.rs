//! Connection lifecycle, routing, and rate-limiting core for an OSCAR
//! (AIM/ICQ) server: everything from the moment a socket is accepted up to
//! handing parsed SNACs to business-logic handlers supplied by the caller.

pub mod capabilities;
pub mod connection;
pub mod dispatch;
pub mod service_entry;
pub mod session;
pub mod signon;
pub mod supervisor;

pub use capabilities::{
    AuthService, BuddyListRegistry, ChatSessionManager, CrackedCookie, DepartureNotifier, FlapWriter, LoginCookie,
    OnlineNotifier, RateLimitUpdater, ServiceKind, SnacHandler, SnacRateLimits,
};
pub use connection::{handle_connection, Collaborators};
pub use session::{RateClassConfig, RateClassId, RateLimitOutcome, Session};
pub use supervisor::{Server, ServerHandle};

pub use oscar_core as core;
pub use oscar_types as types;
