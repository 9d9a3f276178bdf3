//! The SNAC (Simple Network Atomic Communication) inner message frame.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ErrorKind;

/// Size in bytes of a SNAC frame header (everything but the body).
pub const HEADER_LEN: usize = 10;

/// Food groups the connection lifecycle itself references by name. Every
/// other food group is opaque routing data as far as this crate is
/// concerned; business-logic food groups are addressed purely by the
/// `(food_group, sub_group)` pair the external `SnacHandler` capability
/// switches on.
pub mod food_group {
    /// Bootstrap/service-management group: `ClientOnline`, `HostOnline`, …
    pub const O_SERVICE: u16 = 0x0001;
    /// Legacy challenge/response authentication group.
    pub const BUCP: u16 = 0x0017;
}

/// Sub-groups within [`food_group::O_SERVICE`].
pub mod o_service {
    /// Client announces it has finished service-specific setup.
    pub const CLIENT_ONLINE: u16 = 0x0002;
    /// Server announces the service is ready to receive traffic.
    pub const HOST_ONLINE: u16 = 0x0003;
}

/// Sub-groups within [`food_group::BUCP`].
pub mod bucp {
    /// Client requests an authentication challenge for a screen name.
    pub const CHALLENGE_REQUEST: u16 = 0x0006;
    /// Server's reply to a challenge request.
    pub const CHALLENGE_RESPONSE: u16 = 0x0007;
    /// Client submits its password hash for verification.
    pub const LOGIN_REQUEST: u16 = 0x0002;
    /// Server's reply to a login request (cookie or error subcode).
    pub const LOGIN_RESPONSE: u16 = 0x0003;
}

/// Generic error sub-group, used by any food group to report an unknown
/// route (§6.1): `sub_group = 0x0001`, body `{error_code: u16}`.
pub const ERROR_SUB_GROUP: u16 = 0x0001;

/// Body payload for a generic SNAC error response.
pub mod error_code {
    /// Returned when no handler exists for `(food_group, sub_group)`.
    pub const INVALID_SNAC: u16 = 0x0001;
}

/// `{ food_group, sub_group, flags, request_id }`, all big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnacFrame {
    pub food_group: u16,
    pub sub_group: u16,
    pub flags: u16,
    pub request_id: u32,
}

impl SnacFrame {
    pub fn new(food_group: u16, sub_group: u16, request_id: u32) -> Self {
        Self {
            food_group,
            sub_group,
            flags: 0,
            request_id,
        }
    }

    /// Build the frame for a generic "route not found" reply to `self`
    /// (§4.7 step 4): same food group, `sub_group = ERROR_SUB_GROUP`, same
    /// request id.
    pub fn error_reply(&self) -> Self {
        Self {
            food_group: self.food_group,
            sub_group: ERROR_SUB_GROUP,
            flags: 0,
            request_id: self.request_id,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.food_group).unwrap();
        out.write_u16::<BigEndian>(self.sub_group).unwrap();
        out.write_u16::<BigEndian>(self.flags).unwrap();
        out.write_u32::<BigEndian>(self.request_id).unwrap();
    }

    /// Parse a SNAC frame from the front of `payload`, returning the frame
    /// and the remaining body bytes (§4.2).
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8]), ErrorKind> {
        if payload.len() < HEADER_LEN {
            return Err(ErrorKind::MalformedFrame(format!(
                "SNAC frame needs {HEADER_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let mut cursor = &payload[..HEADER_LEN];
        let food_group = cursor.read_u16::<BigEndian>().unwrap();
        let sub_group = cursor.read_u16::<BigEndian>().unwrap();
        let flags = cursor.read_u16::<BigEndian>().unwrap();
        let request_id = cursor.read_u32::<BigEndian>().unwrap();
        Ok((
            SnacFrame {
                food_group,
                sub_group,
                flags,
                request_id,
            },
            &payload[HEADER_LEN..],
        ))
    }
}

/// A fully-formed outbound SNAC: frame plus already-encoded body bytes.
/// This is what producers enqueue onto `Session::receive_queue` (§3) and
/// what `RateLimitUpdater`/`OnlineNotifier` hand back to the core.
#[derive(Debug, Clone)]
pub struct SnacMessage {
    pub frame: SnacFrame,
    pub body: Vec<u8>,
}

impl SnacMessage {
    pub fn new(frame: SnacFrame, body: Vec<u8>) -> Self {
        Self { frame, body }
    }

    /// Encode `food_group/sub_group=ERROR_SUB_GROUP` + `{error_code}` used
    /// for the "no route" reply (§6.1).
    pub fn route_not_found(original: &SnacFrame) -> Self {
        let mut body = Vec::with_capacity(2);
        body.write_u16::<BigEndian>(error_code::INVALID_SNAC).unwrap();
        Self {
            frame: original.error_reply(),
            body,
        }
    }

    pub fn flap_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        self.frame.encode(&mut out);
        out.extend_from_slice(&self.body);
        out
    }
}
