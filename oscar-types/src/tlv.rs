//! TLV (tag-length-value) primitives, the protocol's attribute-carrying unit.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ErrorKind;

/// Well-known TLV tags referenced directly by the connection lifecycle.
/// Other tags are opaque to the core; sub-service handlers interpret them.
pub mod tag {
    /// Screen name presented during the legacy FLAP-auth signon.
    pub const SCREEN_NAME: u16 = 0x0001;
    /// MD5-"roasted" password, present alongside `SCREEN_NAME` in FLAP-auth.
    pub const ROASTED_PASSWORD: u16 = 0x0002;
    /// Opaque login cookie, present on service (non-BOS-login) connections.
    pub const LOGIN_COOKIE: u16 = 0x0006;
    /// Numeric login-failure subcode, carried in rejection signoffs/SNACs.
    pub const ERROR_SUBCODE: u16 = 0x0008;
    /// Disconnect reason code, sent with a forced-logout signoff.
    pub const DISCONNECT_REASON: u16 = 0x0009;
    /// Informational URL accompanying a disconnect reason.
    pub const DISCONNECT_URL: u16 = 0x000B;
    /// Hostname:port of the BOS (or other service) endpoint the client
    /// should reconnect to, carried alongside a login cookie.
    pub const RECONNECT_HOST: u16 = 0x0005;
}

/// Numeric subcodes carried by the `ERROR_SUBCODE` TLV.
pub mod subcode {
    /// Login was rejected because the source IP has exhausted its admission
    /// budget (see the IP rate limiter).
    pub const RATE_LIMIT_EXCEEDED: u16 = 0x0018;
    /// Login was rejected because the screen name/password pair was invalid.
    pub const INVALID_CREDENTIALS: u16 = 0x0004;
    /// The account referenced by a BUCP challenge does not exist.
    pub const NO_SUCH_ACCOUNT: u16 = 0x0001;
}

/// Numeric reason codes carried by the `DISCONNECT_REASON` TLV.
pub mod disconnect_reason {
    /// Sent when a session is forced closed because the same user logged in
    /// again elsewhere.
    pub const NEW_LOGIN: u16 = 0x0001;
}

/// A single tag-length-value triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Build a TLV carrying a big-endian `u16` value, as used for
    /// `ERROR_SUBCODE` and `DISCONNECT_REASON`.
    pub fn u16(tag: u16, value: u16) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }

    /// Build a TLV carrying a raw string value (not null-terminated).
    pub fn string(tag: u16, value: impl AsRef<str>) -> Self {
        Self::new(tag, value.as_ref().as_bytes().to_vec())
    }

    pub fn as_u16(&self) -> Option<u16> {
        if self.value.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    fn byte_len(&self) -> usize {
        4 + self.value.len()
    }

    fn encode<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u16::<BigEndian>(self.tag)?;
        w.write_u16::<BigEndian>(self.value.len() as u16)?;
        w.write_all(&self.value)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self, ErrorKind> {
        let tag = r
            .read_u16::<BigEndian>()
            .map_err(|e| ErrorKind::MalformedFrame(format!("TLV tag: {e}")))?;
        let len = r
            .read_u16::<BigEndian>()
            .map_err(|e| ErrorKind::MalformedFrame(format!("TLV length: {e}")))?;
        let mut value = vec![0u8; len as usize];
        r.read_exact(&mut value)
            .map_err(|e| ErrorKind::MalformedFrame(format!("TLV value: {e}")))?;
        Ok(Tlv { tag, value })
    }
}

/// An ordered sequence of TLVs. Duplicate tags are preserved; lookups return
/// the first match, matching the wire protocol's "last writer doesn't
/// special-case earlier tags" behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvBlock(pub Vec<Tlv>);

impl TlvBlock {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(mut self, tlv: Tlv) -> Self {
        self.0.push(tlv);
        self
    }

    pub fn get(&self, tag: u16) -> Option<&Tlv> {
        self.0.iter().find(|t| t.tag == tag)
    }

    pub fn has(&self, tag: u16) -> bool {
        self.get(tag).is_some()
    }

    pub fn byte_len(&self) -> usize {
        self.0.iter().map(Tlv::byte_len).sum()
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for tlv in &self.0 {
            tlv.encode(w)?;
        }
        Ok(())
    }

    /// Decode a TLV rest-block: TLVs back to back until the reader is
    /// exhausted. There is no leading count; the caller supplies a reader
    /// bounded to the remaining payload bytes.
    pub fn decode_rest<R: Read>(r: &mut R) -> Result<Self, ErrorKind> {
        let mut tlvs = Vec::new();
        loop {
            match Tlv::decode(r) {
                Ok(tlv) => tlvs.push(tlv),
                Err(ErrorKind::MalformedFrame(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(TlvBlock(tlvs))
    }
}
