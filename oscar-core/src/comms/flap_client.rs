//! The per-connection FLAP client (§4.3): the single writer for a socket,
//! owning the monotonic sequence counter. Not safe for concurrent writers —
//! callers serialize through one dispatcher, exactly as the teacher's
//! `TcpTransport` is the sole writer driven from its connection's select loop.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use futures::StreamExt;
use oscar_types::flap::{next_sequence, FlapFrameType, INITIAL_SEQUENCE};
use oscar_types::{ErrorKind, FlapFrame, SnacFrame, TlvBlock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

use super::flap_codec::FlapCodec;

/// The FLAP version advertised in signon frames. The protocol has only ever
/// shipped version 1.
pub const FLAP_VERSION: u32 = 1;

/// A parsed signon frame: the client/server's advertised FLAP version plus
/// whatever TLVs rode along with it.
#[derive(Debug, Clone)]
pub struct FlapSignonFrame {
    pub version: u32,
    pub tlvs: TlvBlock,
}

/// Wraps one read-half and one write-half of a connection. `next_sequence`
/// is incremented on every emitted frame regardless of type, matching the
/// per-direction counter in §3.
pub struct FlapClient<R, W> {
    read: FramedRead<R, FlapCodec>,
    write: W,
    next_sequence: u16,
}

impl<R, W> FlapClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(read: R, write: W) -> Self {
        Self {
            read: FramedRead::new(read, FlapCodec::default()),
            write,
            next_sequence: INITIAL_SEQUENCE,
        }
    }

    fn take_sequence(&mut self) -> u16 {
        let seq = self.next_sequence;
        self.next_sequence = next_sequence(self.next_sequence);
        seq
    }

    async fn write_frame(&mut self, frame: FlapFrame) -> Result<(), ErrorKind> {
        let bytes = frame.encode();
        self.write.write_all(&bytes).await?;
        self.write.flush().await?;
        Ok(())
    }

    /// Write a `signon` frame whose payload is `FLAP_VERSION` followed by an
    /// optional TLV block.
    pub async fn send_signon_frame(&mut self, tlvs: Option<&TlvBlock>) -> Result<(), ErrorKind> {
        let mut payload = Vec::with_capacity(4);
        payload.write_u32::<BigEndian>(FLAP_VERSION).unwrap();
        if let Some(tlvs) = tlvs {
            tlvs.encode(&mut payload).expect("encoding into a Vec cannot fail");
        }
        let sequence = self.take_sequence();
        self.write_frame(FlapFrame::new(FlapFrameType::Signon, sequence, payload))
            .await
    }

    /// Read one frame, asserting it is a `signon` frame, and parse its
    /// `FLAP_VERSION` plus trailing TLV block.
    pub async fn receive_signon_frame(&mut self) -> Result<FlapSignonFrame, ErrorKind> {
        let frame = self.receive_flap_required().await?;
        if !matches!(frame.frame_type, FlapFrameType::Signon) {
            return Err(ErrorKind::ProtocolViolation(format!(
                "expected signon frame, got {:?}",
                frame.frame_type
            )));
        }
        if frame.payload.len() < 4 {
            return Err(ErrorKind::MalformedFrame(
                "signon payload missing FLAP_VERSION".into(),
            ));
        }
        let mut cursor = &frame.payload[..4];
        let version = cursor.read_u32::<BigEndian>().unwrap();
        let tlvs = TlvBlock::decode_rest(&mut &frame.payload[4..])?;
        Ok(FlapSignonFrame { version, tlvs })
    }

    /// Marshal a SNAC frame + body into a `data` frame payload and write it.
    pub async fn send_snac(&mut self, frame: SnacFrame, body: &[u8]) -> Result<(), ErrorKind> {
        let mut payload = Vec::with_capacity(oscar_types::snac::HEADER_LEN + body.len());
        frame.encode(&mut payload);
        payload.extend_from_slice(body);
        let sequence = self.take_sequence();
        self.write_frame(FlapFrame::new(FlapFrameType::Data, sequence, payload))
            .await
    }

    /// Write a `signoff` frame carrying a TLV block (used to deliver a
    /// termination reason, or sent empty on graceful shutdown).
    pub async fn send_signoff_frame(&mut self, tlvs: &TlvBlock) -> Result<(), ErrorKind> {
        let mut payload = Vec::with_capacity(tlvs.byte_len());
        tlvs.encode(&mut payload).expect("encoding into a Vec cannot fail");
        let sequence = self.take_sequence();
        self.write_frame(FlapFrame::new(FlapFrameType::Signoff, sequence, payload))
            .await
    }

    /// Read the next frame of any type. Returns `Ok(None)` on a clean EOF.
    pub async fn receive_flap(&mut self) -> Result<Option<FlapFrame>, ErrorKind> {
        match self.read.next().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    async fn receive_flap_required(&mut self) -> Result<FlapFrame, ErrorKind> {
        self.receive_flap()
            .await?
            .ok_or_else(|| ErrorKind::IoError(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))
    }

    /// Close the write half. Read side is left to the caller (dropping the
    /// whole client closes both on a typical split socket).
    pub async fn disconnect(&mut self) -> Result<(), ErrorKind> {
        self.write.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscar_types::tlv::{tag, Tlv};

    #[tokio::test]
    async fn sequence_increments_on_every_send() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, _server_write) = tokio::io::split(server_io);
        let mut client = FlapClient::new(client_read, client_write);
        let mut server_read = FramedRead::new(server_read, FlapCodec::default());

        client.send_signon_frame(None).await.unwrap();
        client
            .send_snac(SnacFrame::new(1, 2, 3), b"body")
            .await
            .unwrap();

        let first = server_read.next().await.unwrap().unwrap();
        let second = server_read.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, INITIAL_SEQUENCE);
        assert_eq!(second.sequence, next_sequence(INITIAL_SEQUENCE));
    }

    #[tokio::test]
    async fn signon_round_trips_tlvs() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut client = FlapClient::new(client_read, client_write);
        let mut server = FlapClient::new(server_read, server_write);

        let tlvs = TlvBlock::new().push(Tlv::string(tag::SCREEN_NAME, "alice"));
        client.send_signon_frame(Some(&tlvs)).await.unwrap();

        let signon = server.receive_signon_frame().await.unwrap();
        assert_eq!(signon.version, FLAP_VERSION);
        assert_eq!(signon.tlvs.get(tag::SCREEN_NAME).unwrap().as_str(), Some("alice"));
    }
}
