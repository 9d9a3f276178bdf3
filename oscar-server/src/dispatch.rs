//! The per-connection dispatch loop (§4.7): the heart of the core. Owns the
//! FLAP client's writer; nothing else is allowed to write to the socket
//! once this loop is running.
//!
//! `FramedRead::next()` (what `FlapClient::receive_flap` polls) is
//! cancel-safe, so the loop reads frames directly inside `tokio::select!`
//! rather than routing them through a separate reader task and inbox
//! channel — one task is both the connection's sole reader and sole writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use oscar_core::FlapClient;
use oscar_types::flap::FlapFrameType;
use oscar_types::tlv::{disconnect_reason, tag};
use oscar_types::{ErrorKind, SnacFrame, SnacMessage, Tlv, TlvBlock};

use crate::capabilities::{FlapWriter, RateLimitUpdater, ServiceKind, SnacHandler, SnacRateLimits};
use crate::session::Session;

/// How often `RateLimitUpdater::rate_limit_updates` is polled (§4.7).
const RATE_LIMIT_TICK: Duration = Duration::from_secs(1);

/// Drive one connection's dispatch loop to completion. Returns once the
/// connection should be torn down; errors other than clean exits are
/// logged by the caller, not retried.
#[allow(clippy::too_many_arguments)]
pub async fn run_dispatch<R, W>(
    flap: &mut FlapClient<R, W>,
    service: ServiceKind,
    session: &Arc<Session>,
    mut receive_rx: mpsc::Receiver<SnacMessage>,
    remote_addr: SocketAddr,
    rate_limits: &dyn SnacRateLimits,
    rate_updater: &dyn RateLimitUpdater,
    handler: &dyn SnacHandler,
    shutdown: CancellationToken,
) -> Result<(), ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut tick = tokio::time::interval(RATE_LIMIT_TICK);
    tick.tick().await; // first tick fires immediately; consume it up front

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                flap.send_signoff_frame(&TlvBlock::new()).await.ok();
                return Ok(());
            }

            _ = session.closed() => {
                let tlvs = TlvBlock::new()
                    .push(Tlv::u16(tag::DISCONNECT_REASON, disconnect_reason::NEW_LOGIN))
                    .push(Tlv::string(tag::DISCONNECT_URL, "http://www.aim.com/errors/newlogin"));
                flap.send_signoff_frame(&tlvs).await?;
                return Ok(());
            }

            outbound = receive_rx.recv() => {
                match outbound {
                    Some(msg) => {
                        flap.send_snac(msg.frame, &msg.body).await?;
                    }
                    None => {
                        // All senders (the session handle) dropped; nothing more
                        // will ever arrive on this queue, but the connection stays
                        // open until one of the other arms fires.
                    }
                }
            }

            _ = tick.tick() => {
                let now = std::time::Instant::now();
                for update in rate_updater.rate_limit_updates(session, now).await {
                    flap.send_snac(update.frame, &update.body).await?;
                }
            }

            frame = flap.receive_flap() => {
                let frame = match frame? {
                    Some(frame) => frame,
                    None => return Ok(()),
                };

                match frame.frame_type {
                    FlapFrameType::Data => {
                        handle_data_frame(&frame.payload, service, session, remote_addr, rate_limits, handler, flap).await?;
                    }
                    FlapFrameType::Signoff => return Ok(()),
                    FlapFrameType::Keepalive => {
                        debug!("ignoring keepalive on session {}", session.id);
                    }
                    FlapFrameType::Error => {
                        error!("received error frame on session {}", session.id);
                        return Err(ErrorKind::ProtocolViolation("peer sent an error frame".into()));
                    }
                    FlapFrameType::Signon => {
                        return Err(ErrorKind::ProtocolViolation("signon frame after handshake".into()));
                    }
                }
            }
        }
    }
}

async fn handle_data_frame<W>(
    payload: &[u8],
    service: ServiceKind,
    session: &Arc<Session>,
    remote_addr: SocketAddr,
    rate_limits: &dyn SnacRateLimits,
    handler: &dyn SnacHandler,
    flap: &mut W,
) -> Result<(), ErrorKind>
where
    W: FlapWriter,
{
    let (snac, body) = SnacFrame::decode(payload)?;

    let now = std::time::Instant::now();
    match rate_limits.rate_class_lookup(snac.food_group, snac.sub_group) {
        Some(class) => {
            if session.evaluate_rate_limit(now, class) == crate::session::RateLimitOutcome::Limited {
                debug!(
                    "dropping rate-limited SNAC ({:#06x}, {:#06x}) on session {}",
                    snac.food_group, snac.sub_group, session.id
                );
                return Ok(());
            }
        }
        None => {
            error!(
                "no rate class for ({:#06x}, {:#06x}); letting it through",
                snac.food_group, snac.sub_group
            );
        }
    }

    let result = handler.handle(service, session, snac, body, flap, remote_addr).await;
    match result {
        Ok(()) => Ok(()),
        Err(ErrorKind::RouteNotFound { food_group, sub_group }) => {
            warn!("no route for ({food_group:#06x}, {sub_group:#06x}) on session {}", session.id);
            let reply = SnacMessage::route_not_found(&SnacFrame::new(food_group, sub_group, snac.request_id));
            flap.send_snac(reply.frame, &reply.body).await
        }
        Err(other) => Err(other),
    }
}
