//! End-to-end connection lifecycle tests, driving a real `handle_connection`
//! task over an in-memory duplex stream with a `FlapClient` playing the
//! part of the remote AIM/ICQ client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use oscar_core::{FlapClient, IpRateLimiter, RateLimiterConfig};
use oscar_server::{
    handle_connection, AuthService, BuddyListRegistry, ChatSessionManager, Collaborators, CrackedCookie,
    DepartureNotifier, LoginCookie, OnlineNotifier, RateClassId, RateLimitUpdater, ServiceKind, Session, SnacHandler,
    SnacRateLimits,
};
use oscar_types::snac::{bucp, food_group, o_service};
use oscar_types::tlv::{disconnect_reason, subcode, tag};
use oscar_types::{ErrorKind, SnacFrame, SnacMessage, Tlv, TlvBlock};

const BOS_COOKIE: &[u8] = b"bos-cookie-alice";

struct Stubs {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    signouts: AtomicU32,
    rate_classes: Mutex<HashMap<(u16, u16), RateClassId>>,
}

impl Stubs {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            signouts: AtomicU32::new(0),
            rate_classes: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl AuthService for Stubs {
    fn crack_cookie(&self, cookie: &LoginCookie) -> Result<CrackedCookie, ErrorKind> {
        if cookie.0 == BOS_COOKIE {
            Ok(CrackedCookie {
                service: ServiceKind::Bos,
                screen_name: "alice".into(),
                issued_at: std::time::SystemTime::now(),
            })
        } else {
            Err(ErrorKind::Unauthenticated("unrecognized cookie".into()))
        }
    }

    async fn register_bos_session(&self, cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        let session = Arc::new(Session::new("sess-1", cookie.screen_name.clone(), cookie.screen_name.clone()));
        self.sessions.lock().insert(cookie.screen_name.clone(), session.clone());
        Ok(session)
    }

    async fn register_chat_session(&self, _cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn retrieve_bos_session(&self, _cookie: &CrackedCookie) -> Result<Arc<Session>, ErrorKind> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn flap_login(&self, _signon: &oscar_core::FlapSignonFrame, _advertised_host: &str) -> Result<TlvBlock, ErrorKind> {
        unimplemented!("not exercised by these scenarios")
    }

    async fn bucp_challenge(&self, request: &SnacMessage) -> Result<SnacMessage, ErrorKind> {
        Ok(SnacMessage::new(
            SnacFrame::new(food_group::BUCP, bucp::CHALLENGE_RESPONSE, request.frame.request_id),
            vec![0u8; 16],
        ))
    }

    async fn bucp_login(&self, request: &SnacMessage, _advertised_host: &str) -> Result<SnacMessage, ErrorKind> {
        let tlvs = TlvBlock::new().push(Tlv::new(tag::LOGIN_COOKIE, BOS_COOKIE.to_vec()));
        let mut body = Vec::new();
        tlvs.encode(&mut body).unwrap();
        Ok(SnacMessage::new(
            SnacFrame::new(food_group::BUCP, bucp::LOGIN_RESPONSE, request.frame.request_id),
            body,
        ))
    }

    async fn signout(&self, _session: &Arc<Session>) {
        self.signouts.fetch_add(1, Ordering::SeqCst);
    }

    async fn signout_chat(&self, _session: &Arc<Session>) {
        self.signouts.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BuddyListRegistry for Stubs {
    async fn register_buddy_list(&self, _ident_screen_name: &str) -> Result<(), ErrorKind> {
        Ok(())
    }
    async fn unregister_buddy_list(&self, _ident_screen_name: &str) -> Result<(), ErrorKind> {
        Ok(())
    }
}

#[async_trait]
impl ChatSessionManager for Stubs {
    async fn remove_user_from_all_chats(&self, _ident_screen_name: &str) {}
}

#[async_trait]
impl DepartureNotifier for Stubs {
    async fn broadcast_buddy_departed(&self, _session: &Arc<Session>) {}
}

impl OnlineNotifier for Stubs {
    fn host_online(&self, _service: ServiceKind) -> SnacMessage {
        SnacMessage::new(SnacFrame::new(food_group::O_SERVICE, o_service::HOST_ONLINE, 0), Vec::new())
    }
}

#[async_trait]
impl RateLimitUpdater for Stubs {
    async fn rate_limit_updates(&self, _session: &Arc<Session>, _now: std::time::Instant) -> Vec<SnacMessage> {
        Vec::new()
    }
}

impl SnacRateLimits for Stubs {
    fn rate_class_lookup(&self, food_group: u16, sub_group: u16) -> Option<RateClassId> {
        self.rate_classes.lock().get(&(food_group, sub_group)).copied()
    }
}

#[async_trait]
impl SnacHandler for Stubs {
    async fn handle(
        &self,
        _service: ServiceKind,
        _session: &Arc<Session>,
        frame: SnacFrame,
        _body: &[u8],
        flap: &mut dyn oscar_server::FlapWriter,
        _remote_addr: SocketAddr,
    ) -> Result<(), ErrorKind> {
        flap.send_snac(SnacFrame::new(frame.food_group, frame.sub_group, frame.request_id), b"ack")
            .await
    }
}

fn remote_addr() -> SocketAddr {
    "203.0.113.7:40000".parse().unwrap()
}

fn collaborators_with(stubs: Arc<Stubs>, limiter: IpRateLimiter) -> Arc<Collaborators> {
    Arc::new(Collaborators {
        auth: stubs.clone(),
        buddy_list: stubs.clone(),
        chats: stubs.clone(),
        departures: stubs.clone(),
        online: stubs.clone(),
        rate_limits: stubs.clone(),
        rate_updater: stubs.clone(),
        handler: stubs,
        ip_rate_limiter: Arc::new(limiter),
    })
}

/// Spawn `handle_connection` over an in-memory duplex, returning a
/// `FlapClient` wired to the opposite end to drive it as the remote peer.
fn spawn_server(
    collaborators: Arc<Collaborators>,
) -> FlapClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let shutdown = CancellationToken::new();
    tokio::spawn(async move {
        let (read, write) = tokio::io::split(server_io);
        handle_connection(read, write, remote_addr(), "bos.example.com:5190", &collaborators, shutdown).await;
    });
    let (client_read, client_write) = tokio::io::split(client_io);
    FlapClient::new(client_read, client_write)
}

#[tokio::test]
async fn bucp_happy_path_yields_a_login_cookie() {
    let stubs = Stubs::new();
    let limiter = IpRateLimiter::new(RateLimiterConfig::default());
    let mut client = spawn_server(collaborators_with(stubs, limiter));

    client.receive_signon_frame().await.unwrap();
    client.send_signon_frame(Some(&TlvBlock::new())).await.unwrap();

    client
        .send_snac(SnacFrame::new(food_group::BUCP, bucp::CHALLENGE_REQUEST, 1), b"alice")
        .await
        .unwrap();
    let challenge_reply = client.receive_flap().await.unwrap().unwrap();
    let (snac, _) = SnacFrame::decode(&challenge_reply.payload).unwrap();
    assert_eq!(snac.sub_group, bucp::CHALLENGE_RESPONSE);

    client
        .send_snac(SnacFrame::new(food_group::BUCP, bucp::LOGIN_REQUEST, 2), b"hash")
        .await
        .unwrap();
    let login_reply = client.receive_flap().await.unwrap().unwrap();
    let (snac, body) = SnacFrame::decode(&login_reply.payload).unwrap();
    assert_eq!(snac.sub_group, bucp::LOGIN_RESPONSE);
    let tlvs = TlvBlock::decode_rest(&mut &body[..]).unwrap();
    assert_eq!(tlvs.get(tag::LOGIN_COOKIE).unwrap().value, BOS_COOKIE);
}

#[tokio::test]
async fn service_connect_then_im_round_trips_through_dispatch() {
    let stubs = Stubs::new();
    stubs.rate_classes.lock().insert((0x4242, 0x0001), RateClassId(1));
    let limiter = IpRateLimiter::new(RateLimiterConfig::default());
    let mut client = spawn_server(collaborators_with(stubs, limiter));

    client.receive_signon_frame().await.unwrap();
    let tlvs = TlvBlock::new().push(Tlv::new(tag::LOGIN_COOKIE, BOS_COOKIE.to_vec()));
    client.send_signon_frame(Some(&tlvs)).await.unwrap();

    let host_online = client.receive_flap().await.unwrap().unwrap();
    let (snac, _) = SnacFrame::decode(&host_online.payload).unwrap();
    assert_eq!(snac.sub_group, o_service::HOST_ONLINE);

    client.send_snac(SnacFrame::new(0x4242, 0x0001, 9), b"hello").await.unwrap();
    let ack = client.receive_flap().await.unwrap().unwrap();
    let (snac, body) = SnacFrame::decode(&ack.payload).unwrap();
    assert_eq!(snac.request_id, 9);
    assert_eq!(body, b"ack");

    client.send_signoff_frame(&TlvBlock::new()).await.unwrap();
}

#[tokio::test]
async fn ip_rate_limit_rejects_bucp_with_login_response_error() {
    let stubs = Stubs::new();
    let limiter = IpRateLimiter::new(RateLimiterConfig {
        rate_per_sec: 0.0,
        burst: 0.0,
        entry_ttl: Duration::from_secs(60),
    });
    limiter.set_bucp(remote_addr().ip());
    let mut client = spawn_server(collaborators_with(stubs, limiter));

    client.receive_signon_frame().await.unwrap();
    client.send_signon_frame(Some(&TlvBlock::new())).await.unwrap();

    let rejection = client.receive_flap().await.unwrap().unwrap();
    let (snac, body) = SnacFrame::decode(&rejection.payload).unwrap();
    assert_eq!(snac.sub_group, bucp::LOGIN_RESPONSE);
    let tlvs = TlvBlock::decode_rest(&mut &body[..]).unwrap();
    assert_eq!(tlvs.get(tag::ERROR_SUBCODE).unwrap().as_u16(), Some(subcode::RATE_LIMIT_EXCEEDED));
}

#[tokio::test]
async fn ip_rate_limit_rejects_flap_auth_with_signoff_error() {
    let stubs = Stubs::new();
    let limiter = IpRateLimiter::new(RateLimiterConfig {
        rate_per_sec: 0.0,
        burst: 0.0,
        entry_ttl: Duration::from_secs(60),
    });
    let mut client = spawn_server(collaborators_with(stubs, limiter));

    client.receive_signon_frame().await.unwrap();
    let tlvs = TlvBlock::new().push(Tlv::string(tag::SCREEN_NAME, "alice"));
    client.send_signon_frame(Some(&tlvs)).await.unwrap();

    let rejection = client.receive_flap().await.unwrap().unwrap();
    assert!(matches!(rejection.frame_type, oscar_types::flap::FlapFrameType::Signoff));
    let tlvs = TlvBlock::decode_rest(&mut &rejection.payload[..]).unwrap();
    assert_eq!(tlvs.get(tag::ERROR_SUBCODE).unwrap().as_u16(), Some(subcode::RATE_LIMIT_EXCEEDED));
}

#[tokio::test]
async fn per_session_rate_limit_drops_excess_snacs_silently() {
    let stubs = Stubs::new();
    stubs.rate_classes.lock().insert((0x4242, 0x0001), RateClassId(1));
    stubs.rate_classes.lock().insert((0x4242, 0x0002), RateClassId(2));
    let limiter = IpRateLimiter::new(RateLimiterConfig::default());
    let mut client = spawn_server(collaborators_with(stubs.clone(), limiter));

    client.receive_signon_frame().await.unwrap();
    let tlvs = TlvBlock::new().push(Tlv::new(tag::LOGIN_COOKIE, BOS_COOKIE.to_vec()));
    client.send_signon_frame(Some(&tlvs)).await.unwrap();
    client.receive_flap().await.unwrap().unwrap(); // HostOnline

    // Exhaust the session's bucket for rate class 1 via the session directly,
    // then send two SNACs on that route: both silently dropped by the
    // dispatcher, no reply for either.
    let session = stubs.sessions.lock().get("alice").cloned().unwrap();
    let now = std::time::Instant::now();
    // Burst defaults to 40 tokens; drain them all first.
    for _ in 0..40 {
        session.evaluate_rate_limit(now, RateClassId(1));
    }

    client.send_snac(SnacFrame::new(0x4242, 0x0001, 10), b"one").await.unwrap();
    // A second SNAC on an unrelated, unlimited route proves the dispatch
    // loop is still alive and simply dropped the rate-limited one above.
    client.send_snac(SnacFrame::new(0x4242, 0x0002, 11), b"two").await.unwrap();

    let reply = client.receive_flap().await.unwrap().unwrap();
    let (snac, _) = SnacFrame::decode(&reply.payload).unwrap();
    assert_eq!(snac.request_id, 11, "the rate-limited SNAC (request_id 10) must not have produced a reply");
}

#[tokio::test]
async fn forced_logout_relays_a_signoff_with_new_login_reason() {
    let stubs = Stubs::new();
    let limiter = IpRateLimiter::new(RateLimiterConfig::default());
    let mut client = spawn_server(collaborators_with(stubs.clone(), limiter));

    client.receive_signon_frame().await.unwrap();
    let tlvs = TlvBlock::new().push(Tlv::new(tag::LOGIN_COOKIE, BOS_COOKIE.to_vec()));
    client.send_signon_frame(Some(&tlvs)).await.unwrap();
    client.receive_flap().await.unwrap().unwrap(); // HostOnline

    // Give the dispatch loop a moment to start awaiting `session.closed()`.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let session = stubs.sessions.lock().get("alice").cloned().unwrap();
    session.signal_closed();

    let signoff = client.receive_flap().await.unwrap().unwrap();
    assert!(matches!(signoff.frame_type, oscar_types::flap::FlapFrameType::Signoff));
    let tlvs = TlvBlock::decode_rest(&mut &signoff.payload[..]).unwrap();
    assert_eq!(
        tlvs.get(tag::DISCONNECT_REASON).unwrap().as_u16(),
        Some(disconnect_reason::NEW_LOGIN)
    );

    // Give the connection task a moment to run its teardown before asserting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(stubs.signouts.load(Ordering::SeqCst) >= 1);
}
