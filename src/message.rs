//! The wire-protocol codec: handshake, keep-alive, and the ten BitTorrent
//! peer messages, plus the framer that turns an accumulating byte stream
//! into a sequence of complete frames.
//!
//! All multi-byte integers are big-endian. Every message except the
//! handshake shares the `<length:u32><id:u8><payload>` framing; the
//! handshake has no length prefix and is always exactly
//! [`HANDSHAKE_LEN`] bytes, and a keep-alive is the 4 zero length-prefix
//! bytes with no id.

use bit_vec::BitVec;
use byteorder::{BigEndian, ByteOrder};

use crate::{PeerId, Sha1Hash};

pub const PROTOCOL_STRING: &str = "BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message id {0} is not a recognized wire message")]
    WrongMessageId(u8),
    #[error("message payload length disagrees with its id")]
    MalformedMessage,
    #[error("handshake protocol string mismatch")]
    InvalidHandshake,
}

/// The fixed 68 byte greeting exchanged before any other message, in both
/// directions, on every peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STRING.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STRING.as_bytes());
        // bytes 20..28 are the 8 reserved bytes, left zero: no extensions
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Decodes a handshake from exactly [`HANDSHAKE_LEN`] bytes. The caller
    /// (the framer) is responsible for not calling this until that many
    /// bytes are actually available.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        debug_assert_eq!(buf.len(), HANDSHAKE_LEN);
        if buf[0] as usize != PROTOCOL_STRING.len() || &buf[1..20] != PROTOCOL_STRING.as_bytes() {
            return Err(DecodeError::InvalidHandshake);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { info_hash, peer_id })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

/// One decoded peer wire message (everything but the handshake and
/// keep-alive, which are represented separately as [`Frame`] variants since
/// they don't carry a message id).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield(Bitfield),
    Request { piece_index: u32, block_offset: u32, block_length: u32 },
    Piece { piece_index: u32, block_offset: u32, block: Vec<u8> },
    Cancel { piece_index: u32, block_offset: u32, block_length: u32 },
    Port { listen_port: u32 },
}

/// Alias kept separate from [`crate::Bitfield`] so the type this module
/// round-trips is named for what it is here: the raw, byte-aligned wire
/// representation (as opposed to the logical, exactly-`number_of_pieces`-bit
/// vector a [`crate::peer_session::PeerSession`] trims it down to).
pub type Bitfield = BitVec;

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
            Message::Cancel { .. } => MessageId::Cancel,
            Message::Port { .. } => MessageId::Port,
        }
    }

    /// Encodes this message with its `<length><id><payload>` framing.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::Have { piece_index } => {
                payload.extend_from_slice(&piece_index.to_be_bytes());
            }
            Message::Bitfield(bits) => {
                payload.extend(bits.to_bytes());
            }
            Message::Request { piece_index, block_offset, block_length }
            | Message::Cancel { piece_index, block_offset, block_length } => {
                payload.extend_from_slice(&piece_index.to_be_bytes());
                payload.extend_from_slice(&block_offset.to_be_bytes());
                payload.extend_from_slice(&block_length.to_be_bytes());
            }
            Message::Piece { piece_index, block_offset, block } => {
                payload.extend_from_slice(&piece_index.to_be_bytes());
                payload.extend_from_slice(&block_offset.to_be_bytes());
                payload.extend_from_slice(block);
            }
            Message::Port { listen_port } => {
                payload.extend_from_slice(&listen_port.to_be_bytes());
            }
        }

        let len = 1 + payload.len() as u32;
        let mut out = Vec::with_capacity(4 + payload.len() + 1);
        out.extend_from_slice(&len.to_be_bytes());
        out.push(self.id() as u8);
        out.extend(payload);
        out
    }

    /// Decodes a single message frame: the id byte followed by that
    /// message's fields (i.e. everything the framer peeled off after the
    /// 4 byte length prefix).
    pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
        if frame.is_empty() {
            return Err(DecodeError::MalformedMessage);
        }
        let id = frame[0];
        let payload = &frame[1..];
        match id {
            0 => expect_empty(payload).map(|_| Message::Choke),
            1 => expect_empty(payload).map(|_| Message::Unchoke),
            2 => expect_empty(payload).map(|_| Message::Interested),
            3 => expect_empty(payload).map(|_| Message::NotInterested),
            4 => {
                expect_len(payload, 4)?;
                Ok(Message::Have { piece_index: read_u32(payload, 0)? })
            }
            5 => Ok(Message::Bitfield(BitVec::from_bytes(payload))),
            6 => {
                expect_len(payload, 12)?;
                Ok(Message::Request {
                    piece_index: read_u32(payload, 0)?,
                    block_offset: read_u32(payload, 4)?,
                    block_length: read_u32(payload, 8)?,
                })
            }
            7 => {
                if payload.len() < 8 {
                    return Err(DecodeError::MalformedMessage);
                }
                Ok(Message::Piece {
                    piece_index: read_u32(payload, 0)?,
                    block_offset: read_u32(payload, 4)?,
                    block: payload[8..].to_vec(),
                })
            }
            8 => {
                expect_len(payload, 12)?;
                Ok(Message::Cancel {
                    piece_index: read_u32(payload, 0)?,
                    block_offset: read_u32(payload, 4)?,
                    block_length: read_u32(payload, 8)?,
                })
            }
            9 => {
                expect_len(payload, 4)?;
                Ok(Message::Port { listen_port: read_u32(payload, 0)? })
            }
            other => Err(DecodeError::WrongMessageId(other)),
        }
    }
}

fn expect_empty(payload: &[u8]) -> Result<(), DecodeError> {
    expect_len(payload, 0)
}

fn expect_len(payload: &[u8], len: usize) -> Result<(), DecodeError> {
    if payload.len() != len {
        Err(DecodeError::MalformedMessage)
    } else {
        Ok(())
    }
}

fn read_u32(payload: &[u8], offset: usize) -> Result<u32, DecodeError> {
    if payload.len() < offset + 4 {
        return Err(DecodeError::MalformedMessage);
    }
    Ok(BigEndian::read_u32(&payload[offset..offset + 4]))
}

/// A decoded unit from the read buffer: either the once-per-connection
/// handshake, a keep-alive, or an ordinary message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    KeepAlive,
    Message(Message),
}

/// Drains as many complete frames as `buf` currently holds, in order,
/// leaving any trailing partial frame untouched.
///
/// `has_handshaked` is read and, on a successful handshake decode, flipped
/// to `true`. Mirrors the framer contract: a handshake is only attempted
/// until the first one is seen; after that only keep-alives and tagged
/// messages are parsed.
///
/// Returns the frames decoded before any error, plus the error itself if
/// parsing had to stop because of a malformed message or handshake. The
/// caller (the peer session) is expected to process the returned frames and
/// then, if an error is present, mark the session unhealthy.
pub fn parse_frames(
    buf: &mut Vec<u8>,
    has_handshaked: &mut bool,
) -> (Vec<Frame>, Option<DecodeError>) {
    let mut frames = Vec::new();

    while buf.len() > 4 {
        if !*has_handshaked {
            if buf.len() < HANDSHAKE_LEN {
                // not enough bytes yet to know; wait for more without
                // consuming anything
                break;
            }
            match Handshake::decode(&buf[..HANDSHAKE_LEN]) {
                Ok(handshake) => {
                    buf.drain(..HANDSHAKE_LEN);
                    *has_handshaked = true;
                    frames.push(Frame::Handshake(handshake));
                    continue;
                }
                Err(e) => return (frames, Some(e)),
            }
        }

        if buf[0..4] == [0, 0, 0, 0] {
            buf.drain(..4);
            frames.push(Frame::KeepAlive);
            continue;
        }

        let length = BigEndian::read_u32(&buf[0..4]) as usize;
        let total = length + 4;
        if buf.len() < total {
            break;
        }

        let frame_bytes = buf[4..total].to_vec();
        buf.drain(..total);
        match Message::decode(&frame_bytes) {
            Ok(message) => frames.push(Frame::Message(message)),
            Err(e) => return (frames, Some(e)),
        }
    }

    (frames, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitfield_of_pieces(piece_count: usize, pad_aware_set_bits: &[usize]) -> Bitfield {
        let byte_len = (piece_count + 7) / 8 * 8;
        let mut bits = BitVec::from_elem(byte_len, false);
        for &i in pad_aware_set_bits {
            bits.set(i, true);
        }
        bits
    }

    #[test]
    fn handshake_round_trip() {
        let hs = Handshake::new([7u8; 20], [9u8; 20]);
        let encoded = hs.encode();
        assert_eq!(encoded.len(), HANDSHAKE_LEN);
        let decoded = Handshake::decode(&encoded).unwrap();
        assert_eq!(decoded, hs);
    }

    #[test]
    fn handshake_rejects_bad_protocol_string() {
        let mut encoded = Handshake::new([0; 20], [0; 20]).encode();
        encoded[1] = b'X';
        assert_eq!(Handshake::decode(&encoded), Err(DecodeError::InvalidHandshake));
    }

    #[test]
    fn simple_messages_round_trip() {
        for msg in [
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
        ] {
            let encoded = msg.encode();
            let frame = &encoded[4..];
            assert_eq!(Message::decode(frame).unwrap(), msg);
        }
    }

    #[test]
    fn have_round_trip() {
        let msg = Message::Have { piece_index: 42 };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 9); // 4 len + 1 id + 4 piece index
        assert_eq!(Message::decode(&encoded[4..]).unwrap(), msg);
    }

    #[test]
    fn bitfield_round_trip_for_various_piece_counts() {
        for piece_count in [0usize, 1, 8, 9, 17] {
            let set: Vec<usize> = (0..piece_count).collect();
            let bits = bitfield_of_pieces(piece_count, &set);
            let msg = Message::Bitfield(bits.clone());
            let encoded = msg.encode();
            let expected_payload_len = (piece_count + 7) / 8;
            assert_eq!(encoded.len(), 4 + 1 + expected_payload_len);
            let decoded = Message::decode(&encoded[4..]).unwrap();
            assert_eq!(decoded, Message::Bitfield(bits));
        }
    }

    #[test]
    fn request_and_cancel_round_trip() {
        let req = Message::Request { piece_index: 1, block_offset: 16384, block_length: 16384 };
        let encoded = req.encode();
        assert_eq!(encoded.len(), 4 + 13);
        assert_eq!(Message::decode(&encoded[4..]).unwrap(), req);

        let cancel = Message::Cancel { piece_index: 1, block_offset: 16384, block_length: 16384 };
        let encoded = cancel.encode();
        assert_eq!(Message::decode(&encoded[4..]).unwrap(), cancel);
    }

    #[test]
    fn piece_round_trip_for_various_block_sizes() {
        for block_len in [0usize, 1, 16384] {
            let msg = Message::Piece {
                piece_index: 3,
                block_offset: 0,
                block: vec![0xAB; block_len],
            };
            let encoded = msg.encode();
            assert_eq!(encoded.len(), 4 + 9 + block_len);
            assert_eq!(Message::decode(&encoded[4..]).unwrap(), msg);
        }
    }

    #[test]
    fn port_round_trip() {
        let msg = Message::Port { listen_port: 6881 };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 4 + 5);
        assert_eq!(Message::decode(&encoded[4..]).unwrap(), msg);
    }

    #[test]
    fn encode_is_byte_stable_with_no_extra_padding() {
        let msg = Message::Bitfield(bitfield_of_pieces(9, &[0, 8]));
        let encoded = msg.encode();
        // 9 bits -> 2 bytes payload, no third byte of padding
        assert_eq!(encoded.len(), 4 + 1 + 2);
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        assert_eq!(Message::decode(&[200]), Err(DecodeError::WrongMessageId(200)));
    }

    #[test]
    fn malformed_length_is_rejected() {
        // Have requires exactly 4 bytes of payload
        assert_eq!(Message::decode(&[4, 0, 0]), Err(DecodeError::MalformedMessage));
    }

    #[test]
    fn framer_extracts_keep_alive() {
        let mut buf = vec![0, 0, 0, 0, 0]; // keep-alive, plus one extra byte to pass the `> 4` gate
        let mut handshaked = true;
        let (frames, err) = parse_frames(&mut buf, &mut handshaked);
        assert_eq!(frames, vec![Frame::KeepAlive]);
        assert!(err.is_none());
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn framer_waits_for_partial_handshake() {
        let mut buf = vec![19, b'B', b'i', b't']; // far short of 68 bytes
        let mut handshaked = false;
        let (frames, err) = parse_frames(&mut buf, &mut handshaked);
        assert!(frames.is_empty());
        assert!(err.is_none());
        assert_eq!(buf.len(), 4, "partial handshake bytes must not be consumed");
        assert!(!handshaked);
    }

    #[test]
    fn framer_handles_split_reads_across_handshake_and_message() {
        let hs = Handshake::new([1; 20], [2; 20]);
        let mut full = hs.encode().to_vec();
        full.extend(Message::Unchoke.encode());

        let mut buf = Vec::new();
        let mut handshaked = false;
        let mut all_frames = Vec::new();

        for chunk in [&full[0..30], &full[30..60], &full[60..73]] {
            buf.extend_from_slice(chunk);
            let (frames, err) = parse_frames(&mut buf, &mut handshaked);
            assert!(err.is_none());
            all_frames.extend(frames);
        }

        assert_eq!(
            all_frames,
            vec![Frame::Handshake(hs), Frame::Message(Message::Unchoke)]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn framer_rejects_bad_handshake_and_stops() {
        let mut bogus = vec![18u8; HANDSHAKE_LEN];
        bogus[0] = 19;
        let mut handshaked = false;
        let (frames, err) = parse_frames(&mut bogus, &mut handshaked);
        assert!(frames.is_empty());
        assert_eq!(err, Some(DecodeError::InvalidHandshake));
    }
}
