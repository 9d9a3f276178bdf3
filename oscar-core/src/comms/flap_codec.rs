//! A [`tokio_util::codec::Decoder`]/[`Encoder`] pair for FLAP frames,
//! mirroring the teacher's `FramedRead<_, TcpCodec>` usage: the dispatcher
//! never parses header bytes itself, it just pulls `FlapFrame`s off a
//! `Framed` stream.

use bytes::{Buf, BufMut, BytesMut};
use oscar_types::flap::{FlapFrame, FlapHeader, HEADER_LEN, MAX_PAYLOAD_LEN};
use oscar_types::ErrorKind;
use tokio_util::codec::{Decoder, Encoder};

/// Decodes/encodes the FLAP envelope. Carries no state beyond what
/// `tokio_util::codec::Framed` needs to buffer partial frames.
#[derive(Debug, Default)]
pub struct FlapCodec {
    /// Cached header once we've seen enough bytes for it, so we don't
    /// re-parse it while waiting for the rest of the payload to arrive.
    pending_header: Option<FlapHeader>,
}

impl Decoder for FlapCodec {
    type Item = FlapFrame;
    type Error = ErrorKind;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header {
            Some(header) => header,
            None => {
                if src.len() < HEADER_LEN {
                    src.reserve(HEADER_LEN - src.len());
                    return Ok(None);
                }
                let mut raw = [0u8; HEADER_LEN];
                raw.copy_from_slice(&src[..HEADER_LEN]);
                let header = FlapHeader::decode(&raw)?;
                if header.payload_len as usize > MAX_PAYLOAD_LEN {
                    return Err(ErrorKind::MalformedFrame(format!(
                        "payload length {} exceeds maximum",
                        header.payload_len
                    )));
                }
                src.advance(HEADER_LEN);
                self.pending_header = Some(header);
                header
            }
        };

        let payload_len = header.payload_len as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len).to_vec();
        self.pending_header = None;
        Ok(Some(FlapFrame::new(header.frame_type, header.sequence, payload)))
    }
}

impl Encoder<FlapFrame> for FlapCodec {
    type Error = ErrorKind;

    fn encode(&mut self, item: FlapFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.encode();
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}
