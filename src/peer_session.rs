//! The peer session (component C): one TCP connection to a remote peer,
//! its handshake state, remote bitfield, and choke/interest flags.
//!
//! Adapted from the teacher's `peer.rs`, rebuilt around a non-blocking
//! socket and a framing buffer so the single I/O thread (component D) can
//! multiplex many sessions instead of one thread per peer blocking in
//! `read_exact`.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config;
use crate::message::{self, Frame, Handshake, Message};
use crate::pieces_manager::BlockSink;
use crate::tracker::PeerAddr;
use crate::{Bitfield, PeerId, PieceIndex};

#[derive(Debug, Default, Clone, Copy)]
struct ChokeState {
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
}

impl ChokeState {
    fn initial() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

struct Inner {
    stream: TcpStream,
    healthy: bool,
    has_handshaked: bool,
    read_buffer: Vec<u8>,
    bit_field: Bitfield,
    last_send_time: Instant,
    state: ChokeState,
}

/// One peer connection. Identity is `(addr.ip, addr.port)`; two sessions
/// for the same address are never simultaneously live in a
/// [`crate::peer_pool::PeerPool`].
pub struct PeerSession {
    pub addr: PeerAddr,
    inner: Mutex<Inner>,
    sink: Arc<dyn BlockSink>,
}

impl PeerSession {
    /// Connects with a bounded timeout, sends the handshake immediately
    /// (the wire contract requires the handshake be the first bytes on a
    /// fresh connection), and puts the socket in non-blocking mode for the
    /// I/O loop to poll.
    pub fn connect(
        addr: PeerAddr,
        info_hash: [u8; 20],
        peer_id: PeerId,
        number_of_pieces: usize,
        sink: Arc<dyn BlockSink>,
    ) -> std::io::Result<Arc<Self>> {
        let socket_addr = std::net::SocketAddr::new(addr.ip, addr.port);
        let stream = TcpStream::connect_timeout(&socket_addr, config::PEER_CONNECT_TIMEOUT)?;
        stream.set_nodelay(true).ok();

        let mut handshake_stream = stream.try_clone()?;
        handshake_stream.write_all(&Handshake::new(info_hash, peer_id).encode())?;

        stream.set_nonblocking(true)?;

        Ok(Arc::new(Self {
            addr,
            inner: Mutex::new(Inner {
                stream,
                healthy: true,
                has_handshaked: false,
                read_buffer: Vec::new(),
                bit_field: Bitfield::from_elem(number_of_pieces, false),
                last_send_time: Instant::now(),
                state: ChokeState::initial(),
            }),
            sink,
        }))
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.lock().unwrap().healthy
    }

    /// True iff the peer has most recently told us `Unchoke`. Distinct from
    /// [`Self::is_healthy`]: a peer can be connected and healthy while still
    /// choking us.
    pub fn is_unchoked(&self) -> bool {
        !self.inner.lock().unwrap().state.peer_choking
    }

    /// Per §4.3: ready for a new request iff the per-peer spacing has
    /// elapsed, the peer isn't choking us, we're interested, and the peer
    /// has declared the piece.
    pub fn is_ready(&self, piece_index: PieceIndex) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.healthy
            && inner.last_send_time.elapsed() > config::REQUEST_SPACING
            && !inner.state.peer_choking
            && inner.state.am_interested
            && inner.bit_field.get(piece_index).unwrap_or(false)
    }

    fn send_locked(inner: &mut Inner, message: &Message) -> bool {
        match inner.stream.write_all(&message.encode()) {
            Ok(()) => {
                inner.last_send_time = Instant::now();
                true
            }
            Err(e) => {
                log::warn!("send to peer failed: {}", e);
                inner.healthy = false;
                false
            }
        }
    }

    pub fn send(&self, message: &Message) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::send_locked(&mut inner, message)
    }

    pub fn send_request(&self, piece_index: PieceIndex, block_offset: u32, block_length: u32) -> bool {
        self.send(&Message::Request {
            piece_index: piece_index as u32,
            block_offset,
            block_length,
        })
    }

    /// Reads everything currently available without blocking, appends to
    /// the session's read buffer, and drives the framer over it, invoking
    /// handlers for every complete frame. Called only from the I/O context.
    ///
    /// Returns `false` once the session should be dropped from the pool
    /// (a hard I/O error, a graceful close, or a framing failure).
    pub fn poll_read(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.healthy {
            return false;
        }

        let mut buf = [0u8; 4096];
        loop {
            match inner.stream.read(&mut buf) {
                Ok(0) => {
                    inner.healthy = false;
                    return false;
                }
                Ok(n) => inner.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("read from peer failed: {}", e);
                    inner.healthy = false;
                    return false;
                }
            }
        }

        let mut read_buffer = std::mem::take(&mut inner.read_buffer);
        let mut has_handshaked = inner.has_handshaked;
        let (frames, error) = message::parse_frames(&mut read_buffer, &mut has_handshaked);
        inner.read_buffer = read_buffer;
        inner.has_handshaked = has_handshaked;

        for frame in frames {
            self.handle_frame(&mut inner, frame);
        }

        if let Some(e) = error {
            log::warn!("peer {} sent a malformed frame: {}", self.addr, e);
            inner.healthy = false;
            return false;
        }

        inner.healthy
    }

    fn handle_frame(&self, inner: &mut Inner, frame: Frame) {
        match frame {
            Frame::Handshake(_) => {
                log::error!("peer {} sent a second handshake, ignoring", self.addr);
            }
            Frame::KeepAlive => {}
            Frame::Message(message) => self.handle_message(inner, message),
        }
    }

    fn handle_message(&self, inner: &mut Inner, message: Message) {
        match message {
            Message::Choke => inner.state.peer_choking = true,
            Message::Unchoke => inner.state.peer_choking = false,
            Message::Interested => {
                inner.state.peer_interested = true;
                if inner.state.am_choking {
                    Self::send_locked(inner, &Message::Unchoke);
                    inner.state.am_choking = false;
                }
            }
            Message::NotInterested => inner.state.peer_interested = false,
            Message::Have { piece_index } => {
                inner.bit_field.set(piece_index as usize, true);
                self.declare_interest_if_needed(inner);
            }
            Message::Bitfield(bits) => {
                let mut bitfield = bits;
                bitfield.truncate(inner.bit_field.len());
                bitfield.grow(inner.bit_field.len(), false);
                inner.bit_field = bitfield;
                self.declare_interest_if_needed(inner);
            }
            Message::Request { .. } => {
                // Seeding isn't driven by this client; log and drop per §4.3.
                log::debug!("peer {} requested a block (seeding not implemented)", self.addr);
            }
            Message::Piece { piece_index, block_offset, block } => {
                self.sink.on_block(piece_index as usize, block_offset, block);
            }
            Message::Cancel { .. } | Message::Port { .. } => {
                log::debug!("peer {} sent {:?}, no state change", self.addr, message);
            }
        }
    }

    /// A peer's Have/Bitfield may reveal a piece we still need. Per §4.3,
    /// this only fires while the peer is still choking us and we haven't
    /// already declared interest — ported 1:1 from the gate
    /// `original_source/lab3/models/peer.py`'s `handle_have`/
    /// `handle_bitfield` apply, quirk and all: a peer that unchoked us
    /// before sending Have/Bitfield does not get a fresh Interested.
    fn declare_interest_if_needed(&self, inner: &mut Inner) {
        if inner.state.peer_choking && !inner.state.am_interested {
            inner.state.am_interested = true;
            Self::send_locked(inner, &Message::Interested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    struct NullSink;
    impl BlockSink for NullSink {
        fn on_block(&self, _piece_index: PieceIndex, _block_offset: u32, _data: Vec<u8>) {}
    }

    fn accept_and_read_handshake(listener: TcpListener) -> Vec<u8> {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buf = [0u8; message::HANDSHAKE_LEN];
        socket.read_exact(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn connect_sends_handshake_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || accept_and_read_handshake(listener));

        let peer_addr = PeerAddr { ip: addr.ip(), port: addr.port() };
        let session = PeerSession::connect(peer_addr, [9u8; 20], [1u8; 20], 1, Arc::new(NullSink))
            .expect("connect should succeed against a local listener");
        assert!(session.is_healthy());

        let received = server.join().unwrap();
        let decoded = Handshake::decode(&received).unwrap();
        assert_eq!(decoded.info_hash, [9u8; 20]);
        assert_eq!(decoded.peer_id, [1u8; 20]);
    }

    #[test]
    fn is_ready_false_until_unchoked_and_interested_and_has_piece() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });
        let peer_addr = PeerAddr { ip: addr.ip(), port: addr.port() };
        let session = PeerSession::connect(peer_addr, [0u8; 20], [0u8; 20], 4, Arc::new(NullSink)).unwrap();
        server.join().unwrap();

        assert!(!session.is_ready(0));

        {
            let mut inner = session.inner.lock().unwrap();
            inner.state.peer_choking = false;
            inner.state.am_interested = true;
            inner.bit_field.set(0, true);
            inner.last_send_time = Instant::now() - Duration::from_secs(1);
        }
        assert!(session.is_ready(0));
        assert!(!session.is_ready(1));
    }

    #[test]
    fn is_unchoked_tracks_peer_choking_flag_only() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });
        let peer_addr = PeerAddr { ip: addr.ip(), port: addr.port() };
        let session = PeerSession::connect(peer_addr, [0u8; 20], [0u8; 20], 1, Arc::new(NullSink)).unwrap();
        server.join().unwrap();

        assert!(!session.is_unchoked(), "starts choked per the initial state");

        session.inner.lock().unwrap().state.peer_choking = false;
        assert!(session.is_unchoked());

        session.inner.lock().unwrap().state.peer_choking = true;
        assert!(!session.is_unchoked());
    }
}
