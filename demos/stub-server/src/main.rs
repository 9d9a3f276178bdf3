//! A minimal, runnable OSCAR (AIM/ICQ) server: wires in-memory stub
//! business-logic collaborators into `oscar_server::Server` so the
//! connection lifecycle, framing, and rate limiting can be exercised end
//! to end without a real account store or buddy-list backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;

use oscar_core::config::{Config, ListenerConfig, ServerConfig};
use oscar_core::IpRateLimiter;
use oscar_server::{
    AuthService, BuddyListRegistry, ChatSessionManager, Collaborators, CrackedCookie, DepartureNotifier, FlapWriter,
    LoginCookie, OnlineNotifier, RateClassId, RateLimitUpdater, ServerHandle, Server, ServiceKind, Session,
    SnacHandler, SnacRateLimits,
};
use oscar_types::snac::{bucp, food_group, o_service};
use oscar_types::tlv::{subcode, tag};
use oscar_types::{ErrorKind, SnacFrame, SnacMessage, Tlv, TlvBlock};

/// Fixed demo accounts: screen name -> password. A real deployment would
/// back this with a database; this binary exists to exercise the core.
fn demo_accounts() -> HashMap<&'static str, &'static str> {
    let mut accounts = HashMap::new();
    accounts.insert("testuser", "hunter2");
    accounts.insert("alice", "password1");
    accounts
}

struct StubServer {
    accounts: HashMap<&'static str, &'static str>,
    cookies: Mutex<HashMap<Vec<u8>, CrackedCookie>>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_cookie_id: AtomicU64,
}

impl StubServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: demo_accounts(),
            cookies: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_cookie_id: AtomicU64::new(1),
        })
    }

    fn issue_cookie(&self, screen_name: &str) -> Vec<u8> {
        let id = self.next_cookie_id.fetch_add(1, Ordering::SeqCst);
        let cookie = format!("cookie-{id}-{screen_name}").into_bytes();
        self.cookies.lock().insert(
            cookie.clone(),
            CrackedCookie {
                service: ServiceKind::Bos,
                screen_name: screen_name.to_string(),
                issued_at: SystemTime::now(),
            },
        );
        cookie
    }
}

#[async_trait]
impl AuthService for StubServer {
    fn crack_cookie(&self, cookie: &LoginCookie) -> Result<CrackedCookie, ErrorKind> {
        self.cookies
            .lock()
            .get(&cookie.0)
            .cloned()
            .ok_or_else(|| ErrorKind::Unauthenticated("unrecognized login cookie".into()))
    }

    async fn register_bos_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        let session = Arc::new(Session::new(
            uuid::Uuid::new_v4().to_string(),
            cookie.screen_name.clone(),
            cookie.screen_name.clone(),
        ));
        let mut sessions = self.sessions.lock();
        if let Some(previous) = sessions.insert(cookie.screen_name.clone(), session.clone()) {
            info!("{} logged in elsewhere; forcing the old session closed", cookie.screen_name);
            previous.signal_closed();
        }
        Ok(session)
    }

    async fn register_chat_session(&self, _cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        Err(ErrorKind::ProtocolViolation("this demo server does not implement chat".into()))
    }

    async fn retrieve_bos_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        self.sessions
            .lock()
            .get(&cookie.screen_name)
            .cloned()
            .ok_or_else(|| ErrorKind::Unauthenticated("no active BOS session".into()))
    }

    async fn flap_login(&self, signon: &oscar_core::FlapSignonFrame, advertised_host: &str) -> Result<TlvBlock, ErrorKind> {
        let screen_name = signon
            .tlvs
            .get(tag::SCREEN_NAME)
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        if self.accounts.contains_key(screen_name) {
            let cookie = self.issue_cookie(screen_name);
            Ok(TlvBlock::new()
                .push(Tlv::new(tag::LOGIN_COOKIE, cookie))
                .push(Tlv::string(tag::RECONNECT_HOST, advertised_host)))
        } else {
            Ok(TlvBlock::new().push(Tlv::u16(tag::ERROR_SUBCODE, subcode::INVALID_CREDENTIALS)))
        }
    }

    async fn bucp_challenge(&self, request: &SnacMessage) -> Result<SnacMessage, ErrorKind> {
        let screen_name = std::str::from_utf8(&request.body).unwrap_or_default();
        if self.accounts.contains_key(screen_name) {
            Ok(SnacMessage::new(
                SnacFrame::new(food_group::BUCP, bucp::CHALLENGE_RESPONSE, request.frame.request_id),
                vec![0u8; 32],
            ))
        } else {
            let tlvs = TlvBlock::new().push(Tlv::u16(tag::ERROR_SUBCODE, subcode::NO_SUCH_ACCOUNT));
            let mut body = Vec::new();
            tlvs.encode(&mut body).unwrap();
            Ok(SnacMessage::new(
                SnacFrame::new(food_group::BUCP, bucp::LOGIN_RESPONSE, request.frame.request_id),
                body,
            ))
        }
    }

    async fn bucp_login(&self, request: &SnacMessage, advertised_host: &str) -> Result<SnacMessage, ErrorKind> {
        let screen_name = std::str::from_utf8(&request.body).unwrap_or_default();
        let tlvs = if self.accounts.contains_key(screen_name) {
            let cookie = self.issue_cookie(screen_name);
            TlvBlock::new()
                .push(Tlv::new(tag::LOGIN_COOKIE, cookie))
                .push(Tlv::string(tag::RECONNECT_HOST, advertised_host))
        } else {
            TlvBlock::new().push(Tlv::u16(tag::ERROR_SUBCODE, subcode::INVALID_CREDENTIALS))
        };
        let mut body = Vec::new();
        tlvs.encode(&mut body).unwrap();
        Ok(SnacMessage::new(
            SnacFrame::new(food_group::BUCP, bucp::LOGIN_RESPONSE, request.frame.request_id),
            body,
        ))
    }

    async fn signout(&self, session: &Arc<Session>) {
        self.sessions.lock().remove(&session.ident_screen_name);
    }

    async fn signout_chat(&self, _session: &Arc<Session>) {}
}

#[async_trait]
impl BuddyListRegistry for StubServer {
    async fn register_buddy_list(&self, ident_screen_name: &str) -> Result<(), ErrorKind> {
        info!("{ident_screen_name} buddy list registered (no-op demo backend)");
        Ok(())
    }

    async fn unregister_buddy_list(&self, ident_screen_name: &str) -> Result<(), ErrorKind> {
        info!("{ident_screen_name} buddy list unregistered (no-op demo backend)");
        Ok(())
    }
}

#[async_trait]
impl ChatSessionManager for StubServer {
    async fn remove_user_from_all_chats(&self, _ident_screen_name: &str) {}
}

#[async_trait]
impl DepartureNotifier for StubServer {
    async fn broadcast_buddy_departed(&self, session: &Arc<Session>) {
        info!("{} departed (no buddies to notify in this demo)", session.ident_screen_name);
    }
}

impl OnlineNotifier for StubServer {
    fn host_online(&self, service: ServiceKind) -> SnacMessage {
        let _ = service;
        SnacMessage::new(SnacFrame::new(food_group::O_SERVICE, o_service::HOST_ONLINE, 0), Vec::new())
    }
}

#[async_trait]
impl RateLimitUpdater for StubServer {
    async fn rate_limit_updates(&self, _session: &Arc<Session>, _now: std::time::Instant) -> Vec<SnacMessage> {
        Vec::new()
    }
}

impl SnacRateLimits for StubServer {
    fn rate_class_lookup(&self, _food_group: u16, _sub_group: u16) -> Option<RateClassId> {
        None
    }
}

#[async_trait]
impl SnacHandler for StubServer {
    async fn handle(
        &self,
        _service: ServiceKind,
        session: &Arc<Session>,
        frame: SnacFrame,
        _body: &[u8],
        flap: &mut dyn FlapWriter,
        _remote_addr: std::net::SocketAddr,
    ) -> Result<(), ErrorKind> {
        warn!(
            "{} sent ({:#06x}, {:#06x}); this demo server has no business-logic handlers, echoing an ack",
            session.ident_screen_name, frame.food_group, frame.sub_group
        );
        flap.send_snac(SnacFrame::new(frame.food_group, frame.sub_group, frame.request_id), b"ack")
            .await
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig {
        listeners: vec![ListenerConfig {
            bos_listen_address: std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:5190".to_string()),
            bos_advertised_host_plain: "127.0.0.1:5190".to_string(),
            bos_advertised_host_ssl: None,
            has_ssl: false,
        }],
        rate_per_sec: 10.0,
        burst: 20.0,
        entry_ttl_secs: 60,
        initial_sequence_seed: oscar_types::flap::INITIAL_SEQUENCE,
    };
    if let Err(errors) = config.validate() {
        for error in errors {
            log::error!("invalid configuration: {error}");
        }
        std::process::exit(1);
    }

    let stub = StubServer::new();
    let collaborators = Arc::new(Collaborators {
        auth: stub.clone(),
        buddy_list: stub.clone(),
        chats: stub.clone(),
        departures: stub.clone(),
        online: stub.clone(),
        rate_limits: stub.clone(),
        rate_updater: stub.clone(),
        handler: stub,
        ip_rate_limiter: Arc::new(IpRateLimiter::new(config.rate_limiter_config())),
    });

    let handle: ServerHandle = match Server::new(config, collaborators).listen_and_serve().await {
        Ok(handle) => handle,
        Err(err) => {
            log::error!("failed to start server: {err}");
            std::process::exit(1);
        }
    };

    info!("stub-server listening; press Ctrl+C to shut down");
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install Ctrl+C handler; shutting down immediately");
    }

    info!("shutting down gracefully");
    handle.shutdown(Duration::from_secs(10)).await;
}
