//! The FLAP stream-framing envelope (§4.1 / §6.1).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ErrorKind;

/// The fixed first byte of every FLAP header.
pub const START_MARKER: u8 = 0x2A;

/// Maximum payload length a single FLAP frame may declare. Frames claiming
/// more are rejected as malformed rather than silently truncated further.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// The initial sequence number each side of a connection starts counting
/// from (§6.3).
pub const INITIAL_SEQUENCE: u16 = 100;

/// The four FLAP frame types the core distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlapFrameType {
    Signon,
    Data,
    Error,
    Signoff,
    Keepalive,
}

impl FlapFrameType {
    fn to_wire(self) -> u8 {
        match self {
            FlapFrameType::Signon => 1,
            FlapFrameType::Data => 2,
            FlapFrameType::Error => 3,
            FlapFrameType::Signoff => 4,
            FlapFrameType::Keepalive => 5,
        }
    }

    fn from_wire(v: u8) -> Result<Self, ErrorKind> {
        Ok(match v {
            1 => FlapFrameType::Signon,
            2 => FlapFrameType::Data,
            3 => FlapFrameType::Error,
            4 => FlapFrameType::Signoff,
            5 => FlapFrameType::Keepalive,
            other => {
                return Err(ErrorKind::MalformedFrame(format!(
                    "unknown FLAP frame type {other}"
                )))
            }
        })
    }
}

/// A fully decoded FLAP header, `{start_marker, frame_type, sequence, payload_len}`.
#[derive(Debug, Clone, Copy)]
pub struct FlapHeader {
    pub frame_type: FlapFrameType,
    pub sequence: u16,
    pub payload_len: u16,
}

/// Size in bytes of a FLAP header on the wire.
pub const HEADER_LEN: usize = 6;

impl FlapHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(START_MARKER);
        out.push(self.frame_type.to_wire());
        // ReadBytesExt/WriteBytesExt work over `Write`/`Read`, but writing a
        // fixed two-byte BE integer directly is simpler here.
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.payload_len.to_be_bytes());
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ErrorKind> {
        let mut cursor = &buf[..];
        let marker = cursor
            .read_u8()
            .map_err(|e| ErrorKind::MalformedFrame(e.to_string()))?;
        if marker != START_MARKER {
            return Err(ErrorKind::MalformedFrame(format!(
                "bad start marker {marker:#04x}"
            )));
        }
        let frame_type = FlapFrameType::from_wire(
            cursor
                .read_u8()
                .map_err(|e| ErrorKind::MalformedFrame(e.to_string()))?,
        )?;
        let sequence = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| ErrorKind::MalformedFrame(e.to_string()))?;
        let payload_len = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| ErrorKind::MalformedFrame(e.to_string()))?;
        Ok(FlapHeader {
            frame_type,
            sequence,
            payload_len,
        })
    }
}

/// A complete FLAP frame: header plus opaque payload bytes.
#[derive(Debug, Clone)]
pub struct FlapFrame {
    pub frame_type: FlapFrameType,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl FlapFrame {
    pub fn new(frame_type: FlapFrameType, sequence: u16, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            sequence,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        FlapHeader {
            frame_type: self.frame_type,
            sequence: self.sequence,
            payload_len: self.payload.len() as u16,
        }
        .encode(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Increment a FLAP sequence number modulo 2^16 (wraps 65535 -> 0, §8).
pub fn next_sequence(current: u16) -> u16 {
    current.wrapping_add(1)
}
