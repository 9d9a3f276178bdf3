//! Ties the signon state machine (§4.5), the service-entry dispatcher
//! (§4.6), and the dispatch loop (§4.7) together as the single per-connection
//! task the supervisor (§4.8) spawns for every accepted socket.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use oscar_core::{FlapClient, IpRateLimiter};
use oscar_types::ErrorKind;

use crate::capabilities::{AuthService, BuddyListRegistry, ChatSessionManager, DepartureNotifier, OnlineNotifier, RateLimitUpdater, SnacHandler, SnacRateLimits};
use crate::dispatch::run_dispatch;
use crate::service_entry::{enter_service, run_teardown};
use crate::signon::{run_signon, SignonOutcome};

/// Every collaborator a connection needs, shared across all connections on
/// a server. Bundled so `handle_connection`'s signature doesn't grow a new
/// parameter every time a capability is added.
pub struct Collaborators {
    pub auth: Arc<dyn AuthService>,
    pub buddy_list: Arc<dyn BuddyListRegistry>,
    pub chats: Arc<dyn ChatSessionManager>,
    pub departures: Arc<dyn DepartureNotifier>,
    pub online: Arc<dyn OnlineNotifier>,
    pub rate_limits: Arc<dyn SnacRateLimits>,
    pub rate_updater: Arc<dyn RateLimitUpdater>,
    pub handler: Arc<dyn SnacHandler>,
    pub ip_rate_limiter: Arc<IpRateLimiter>,
}

/// Drive one accepted connection through its whole lifecycle: initial
/// signon exchange, the state machine in §4.5, service entry (§4.6) if
/// applicable, then the dispatch loop (§4.7) until the connection ends.
///
/// Every exit path — clean close, protocol error, I/O failure, or shutdown —
/// funnels through here so `run_teardown` always runs exactly once for
/// sessions that were registered.
pub async fn handle_connection<R, W>(
    read: R,
    write: W,
    remote_addr: SocketAddr,
    advertised_host: &str,
    collaborators: &Collaborators,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut flap = FlapClient::new(read, write);

    if let Err(err) = flap.send_signon_frame(None).await {
        warn!("failed to send initial signon frame to {remote_addr}: {err}");
        return;
    }

    let client_signon = match flap.receive_signon_frame().await {
        Ok(signon) => signon,
        Err(err) => {
            warn!("failed to read client signon frame from {remote_addr}: {err}");
            return;
        }
    };

    let outcome = run_signon(
        &mut flap,
        remote_addr.ip(),
        &client_signon.tlvs,
        &collaborators.ip_rate_limiter,
        collaborators.auth.as_ref(),
        advertised_host,
    )
    .await;

    let cracked = match outcome {
        Ok(SignonOutcome::Closed) => {
            debug!("connection from {remote_addr} ended during signon");
            return;
        }
        Ok(SignonOutcome::ServiceEntry(cracked)) => cracked,
        Err(err) => {
            warn!("signon failed for {remote_addr}: {err}");
            return;
        }
    };

    let service = cracked.service;
    let entry = match enter_service(&cracked, collaborators.auth.as_ref(), collaborators.buddy_list.as_ref()).await {
        Ok(entry) => entry,
        Err(err) => {
            warn!("service entry failed for {remote_addr} ({:?}): {err}", service);
            return;
        }
    };

    let session = entry.session;
    session.set_remote_addr(remote_addr);
    let receive_rx = session.take_receiver();

    info!(
        "session {} ({}) entered service for {remote_addr}",
        session.id, session.ident_screen_name
    );

    let host_online = collaborators.online.host_online(service);
    if let Err(err) = flap.send_snac(host_online.frame, &host_online.body).await {
        warn!("failed to send HostOnline to {remote_addr}: {err}");
        run_teardown(
            entry.teardown,
            &session,
            collaborators.auth.as_ref(),
            collaborators.buddy_list.as_ref(),
            collaborators.chats.as_ref(),
            collaborators.departures.as_ref(),
        )
        .await;
        return;
    }

    let result = run_dispatch(
        &mut flap,
        service,
        &session,
        receive_rx,
        remote_addr,
        collaborators.rate_limits.as_ref(),
        collaborators.rate_updater.as_ref(),
        collaborators.handler.as_ref(),
        shutdown,
    )
    .await;

    match result {
        Ok(()) => info!("session {} ({remote_addr}) closed cleanly", session.id),
        Err(ErrorKind::IoError(err)) => {
            info!("session {} ({remote_addr}) closed: {err}", session.id);
        }
        Err(err) => warn!("session {} ({remote_addr}) terminated: {err}", session.id),
    }

    run_teardown(
        entry.teardown,
        &session,
        collaborators.auth.as_ref(),
        collaborators.buddy_list.as_ref(),
        collaborators.chats.as_ref(),
        collaborators.departures.as_ref(),
    )
    .await;

    let _ = flap.disconnect().await;
}
