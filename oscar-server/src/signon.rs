//! The signon / authentication state machine (§4.5): the first thing run on
//! every accepted connection, before any dispatch loop exists. Branches on
//! which TLVs rode along with the client's signon frame, and for the
//! BUCP-auth branch runs a small deadline-and-frame-count-bounded sub-loop.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use oscar_core::{FlapClient, IpRateLimiter};
use oscar_types::flap::FlapFrameType;
use oscar_types::tlv::{subcode, tag};
use oscar_types::{ErrorKind, SnacFrame, SnacMessage, Tlv, TlvBlock};

use crate::capabilities::{AuthService, CrackedCookie, LoginCookie};

/// Wall-clock budget for a connection to complete BUCP-auth before it's
/// treated as misbehaving (§4.5).
const BUCP_DEADLINE: Duration = Duration::from_secs(30);

/// Frame budget for the BUCP-auth sub-loop; a connection that exceeds this
/// without completing login is closed as a protocol error (§4.5).
const BUCP_MAX_FRAMES: u32 = 10;

/// What running the signon state machine produced.
pub enum SignonOutcome {
    /// A `LOGIN_COOKIE` was presented; the caller should proceed to the
    /// service-entry dispatcher (§4.6).
    ServiceEntry(CrackedCookie),
    /// The connection was fully handled here (FLAP-auth, a completed or
    /// failed BUCP-auth exchange, IP rate-limiting, or a protocol error)
    /// and should now be closed.
    Closed,
}

/// Run the signon state machine to completion on `flap`, which must already
/// have exchanged the initial signon frames by the time this is called.
pub async fn run_signon<R, W>(
    flap: &mut FlapClient<R, W>,
    remote_ip: IpAddr,
    client_signon_tlvs: &TlvBlock,
    rate_limiter: &IpRateLimiter,
    auth: &dyn AuthService,
    advertised_host: &str,
) -> Result<SignonOutcome, ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if let Some(cookie_tlv) = client_signon_tlvs.get(tag::LOGIN_COOKIE) {
        let (allowed, is_bucp) = rate_limiter.allow(remote_ip);
        if !allowed {
            reject_rate_limited(flap, is_bucp).await?;
            return Ok(SignonOutcome::Closed);
        }
        let cookie = LoginCookie(cookie_tlv.value.clone());
        let cracked = auth.crack_cookie(&cookie)?;
        return Ok(SignonOutcome::ServiceEntry(cracked));
    }

    let (allowed, is_bucp) = rate_limiter.allow(remote_ip);
    if !allowed {
        reject_rate_limited(flap, is_bucp).await?;
        return Ok(SignonOutcome::Closed);
    }

    if client_signon_tlvs.has(tag::SCREEN_NAME) {
        return run_flap_auth(flap, client_signon_tlvs, auth, advertised_host).await;
    }

    rate_limiter.set_bucp(remote_ip);
    run_bucp_auth(flap, auth, advertised_host).await
}

async fn reject_rate_limited<R, W>(flap: &mut FlapClient<R, W>, is_bucp: bool) -> Result<(), ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if is_bucp {
        let tlvs = TlvBlock::new().push(Tlv::u16(tag::ERROR_SUBCODE, subcode::RATE_LIMIT_EXCEEDED));
        let mut body = Vec::with_capacity(tlvs.byte_len());
        tlvs.encode(&mut body).expect("encoding into a Vec cannot fail");
        let frame = SnacFrame::new(
            oscar_types::snac::food_group::BUCP,
            oscar_types::snac::bucp::LOGIN_RESPONSE,
            0,
        );
        flap.send_snac(frame, &body).await?;
    } else {
        let tlvs = TlvBlock::new().push(Tlv::u16(tag::ERROR_SUBCODE, subcode::RATE_LIMIT_EXCEEDED));
        flap.send_signoff_frame(&tlvs).await?;
    }
    Ok(())
}

async fn run_flap_auth<R, W>(
    flap: &mut FlapClient<R, W>,
    client_signon_tlvs: &TlvBlock,
    auth: &dyn AuthService,
    advertised_host: &str,
) -> Result<SignonOutcome, ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let signon = oscar_core::FlapSignonFrame {
        version: oscar_core::FLAP_VERSION,
        tlvs: client_signon_tlvs.clone(),
    };
    let result_tlvs = auth.flap_login(&signon, advertised_host).await?;
    flap.send_signoff_frame(&result_tlvs).await?;
    Ok(SignonOutcome::Closed)
}

async fn run_bucp_auth<R, W>(
    flap: &mut FlapClient<R, W>,
    auth: &dyn AuthService,
    advertised_host: &str,
) -> Result<SignonOutcome, ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let deadline = timeout(BUCP_DEADLINE, bucp_sub_loop(flap, auth, advertised_host)).await;
    match deadline {
        Ok(result) => result,
        Err(_) => Err(ErrorKind::ProtocolViolation(
            "BUCP-auth exceeded its 30s deadline".into(),
        )),
    }
}

async fn bucp_sub_loop<R, W>(
    flap: &mut FlapClient<R, W>,
    auth: &dyn AuthService,
    advertised_host: &str,
) -> Result<SignonOutcome, ErrorKind>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    for _ in 0..BUCP_MAX_FRAMES {
        let frame = match flap.receive_flap().await? {
            Some(frame) => frame,
            None => return Ok(SignonOutcome::Closed),
        };

        match frame.frame_type {
            FlapFrameType::Signoff => return Ok(SignonOutcome::Closed),
            FlapFrameType::Keepalive => {
                debug!("ignoring keepalive during BUCP-auth");
                continue;
            }
            FlapFrameType::Data => {
                let (snac, body) = SnacFrame::decode(&frame.payload)?;
                match (snac.food_group, snac.sub_group) {
                    (oscar_types::snac::food_group::BUCP, oscar_types::snac::bucp::CHALLENGE_REQUEST) => {
                        let request = SnacMessage::new(snac, body.to_vec());
                        let reply = auth.bucp_challenge(&request).await?;
                        let is_terminal = reply.frame.sub_group == oscar_types::snac::bucp::LOGIN_RESPONSE;
                        flap.send_snac(reply.frame, &reply.body).await?;
                        if is_terminal {
                            return Ok(SignonOutcome::Closed);
                        }
                    }
                    (oscar_types::snac::food_group::BUCP, oscar_types::snac::bucp::LOGIN_REQUEST) => {
                        let request = SnacMessage::new(snac, body.to_vec());
                        let reply = auth.bucp_login(&request, advertised_host).await?;
                        flap.send_snac(reply.frame, &reply.body).await?;
                        return Ok(SignonOutcome::Closed);
                    }
                    _ => {
                        return Err(ErrorKind::ProtocolViolation(format!(
                            "unexpected SNAC ({:#06x}, {:#06x}) during BUCP-auth",
                            snac.food_group, snac.sub_group
                        )))
                    }
                }
            }
            other => {
                return Err(ErrorKind::ProtocolViolation(format!(
                    "unexpected FLAP frame type {other:?} during BUCP-auth"
                )))
            }
        }
    }

    warn!("BUCP-auth exceeded {BUCP_MAX_FRAMES} frames without completing");
    Err(ErrorKind::ProtocolViolation(format!(
        "BUCP-auth exceeded {BUCP_MAX_FRAMES} frames"
    )))
}
