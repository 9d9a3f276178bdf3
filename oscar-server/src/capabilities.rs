//! The external collaborators the core consumes (§6.2). These are the
//! boundary between "connection lifecycle" (this crate) and "business
//! logic" (everything named here, explicitly out of scope per §1).
//!
//! Every trait is `Send + Sync + 'static` so implementations can be shared
//! across connection tasks behind an `Arc`, matching how the teacher passes
//! its `ServerContext`/`AuthManager` capabilities around.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use oscar_core::FlapSignonFrame;
use oscar_types::{ErrorKind, SnacFrame, SnacMessage, TlvBlock};

use crate::session::{RateClassId, Session};

/// Result alias used across the capability boundary.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Which kind of service a login cookie was issued for (§3 Lifecycle,
/// §10.5). The service-entry dispatcher switches on this to decide which
/// registration/cleanup path a connection takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Basic OSCAR Service: the main per-user connection.
    Bos,
    /// A chat-room connection.
    Chat,
    Alert,
    ChatNav,
    Admin,
    Bart,
}

impl ServiceKind {
    /// `true` for kinds that get no lifecycle callbacks beyond
    /// `retrieve_bos_session` (§4.6 step 2, "any other").
    pub fn is_ancillary(self) -> bool {
        matches!(
            self,
            ServiceKind::Alert | ServiceKind::ChatNav | ServiceKind::Admin | ServiceKind::Bart
        )
    }
}

/// An opaque, server-issued login cookie as carried in the `LOGIN_COOKIE`
/// TLV. The core never inspects its bytes directly; `AuthService::crack_cookie`
/// does.
#[derive(Debug, Clone)]
pub struct LoginCookie(pub Vec<u8>);

/// The result of cracking a [`LoginCookie`]: which service it's for, and
/// the screen name it identifies.
#[derive(Debug, Clone)]
pub struct CrackedCookie {
    pub service: ServiceKind,
    pub screen_name: String,
    pub issued_at: std::time::SystemTime,
}

/// Authentication and session-registration capability (§6.2). One instance
/// is shared across every connection on the server.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    /// Crack an opaque login cookie into its constituent parts.
    fn crack_cookie(&self, cookie: &LoginCookie) -> Result<CrackedCookie>;

    /// Register a new BOS session for a cracked cookie.
    async fn register_bos_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>>;

    /// Register a new chat session for a cracked cookie.
    async fn register_chat_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>>;

    /// Look up the existing BOS session for a cracked cookie, for ancillary
    /// service kinds that don't create their own session (§3 Lifecycle).
    async fn retrieve_bos_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>>;

    /// Validate a legacy FLAP-auth signon (screen name + roasted password
    /// carried directly in the signon TLVs) and produce the TLV block to
    /// deliver in the closing signoff frame: a login cookie plus advertised
    /// host on success, or an error subcode on failure.
    async fn flap_login(&self, signon: &FlapSignonFrame, advertised_host: &str) -> Result<TlvBlock>;

    /// Answer a BUCP challenge request with either a normal challenge SNAC
    /// or, if the account doesn't exist, a `LOGIN_RESPONSE` carrying the
    /// failure (§4.5).
    async fn bucp_challenge(&self, request: &SnacMessage) -> Result<SnacMessage>;

    /// Validate a BUCP login request and produce the `LOGIN_RESPONSE` SNAC.
    async fn bucp_login(&self, request: &SnacMessage, advertised_host: &str) -> Result<SnacMessage>;

    /// Tear down a BOS session on connection close.
    async fn signout(&self, session: &Arc<Session>);

    /// Tear down a chat session on connection close.
    async fn signout_chat(&self, session: &Arc<Session>);
}

/// Buddy-list store capability (§6.2).
#[async_trait]
pub trait BuddyListRegistry: Send + Sync + 'static {
    async fn register_buddy_list(&self, ident_screen_name: &str) -> Result<()>;
    async fn unregister_buddy_list(&self, ident_screen_name: &str) -> Result<()>;
}

/// Chat-room registry capability (§6.2).
#[async_trait]
pub trait ChatSessionManager: Send + Sync + 'static {
    async fn remove_user_from_all_chats(&self, ident_screen_name: &str);
}

/// Buddy-departure broadcast capability (§6.2).
#[async_trait]
pub trait DepartureNotifier: Send + Sync + 'static {
    async fn broadcast_buddy_departed(&self, session: &Arc<Session>);
}

/// Produces the `HostOnline` SNAC sent right after a service connection
/// finishes signon (§4.6 step 4). Synchronous: this is pure message
/// construction, no I/O.
pub trait OnlineNotifier: Send + Sync + 'static {
    fn host_online(&self, service: ServiceKind) -> SnacMessage;
}

/// Periodic rate-limit status push capability (§4.7).
#[async_trait]
pub trait RateLimitUpdater: Send + Sync + 'static {
    async fn rate_limit_updates(&self, session: &Arc<Session>, now: Instant) -> Vec<SnacMessage>;
}

/// Maps `(food_group, sub_group)` to a rate class (§4.4, §9). Lookup misses
/// are intentionally permissive per the Open Question in §9: the dispatch
/// loop logs at `warn` and lets the SNAC through rather than treating an
/// unknown pair as unlimited-deny.
pub trait SnacRateLimits: Send + Sync + 'static {
    fn rate_class_lookup(&self, food_group: u16, sub_group: u16) -> Option<RateClassId>;
}

/// The single entry point into business-logic handlers (§6.2). Implementations
/// write their own response via `flap`; returning `ErrorKind::RouteNotFound`
/// is the sentinel the dispatch loop answers with a generic error SNAC
/// instead of tearing the connection down.
#[async_trait]
pub trait SnacHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        service: ServiceKind,
        session: &Arc<Session>,
        frame: SnacFrame,
        body: &[u8],
        flap: &mut dyn FlapWriter,
        remote_addr: SocketAddr,
    ) -> Result<()>;
}

/// The minimal write surface a `SnacHandler` needs from a connection's FLAP
/// client: enough to answer in place, without exposing the rest of
/// [`oscar_core::FlapClient`]'s (read or signoff) surface to business logic.
#[async_trait]
pub trait FlapWriter: Send {
    async fn send_snac(&mut self, frame: SnacFrame, body: &[u8]) -> Result<()>;
}

#[async_trait]
impl<R, W> FlapWriter for oscar_core::FlapClient<R, W>
where
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send_snac(&mut self, frame: SnacFrame, body: &[u8]) -> Result<()> {
        oscar_core::FlapClient::send_snac(self, frame, body).await
    }
}
