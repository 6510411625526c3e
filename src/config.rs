//! Constants and small config knobs shared by every part of the engine.
//!
//! Centralizing these here means the timing and sizing rules in the design
//! (block size, lease duration, per-peer request spacing, ...) have exactly
//! one definition instead of being sprinkled as magic numbers.

use std::time::Duration;

/// The only block length we deal with, except possibly for the last block of
/// the last piece. 16 KiB, the value every BitTorrent client in the wild
/// agrees on.
pub const BLOCK_SIZE: u32 = 0x4000;

/// How long we wait for a TCP connect to a peer before giving up on it.
pub const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for a single tracker HTTP announce.
pub const TRACKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between two requests sent to the same peer. This is the
/// gate `PeerSession::is_ready` enforces to avoid flooding a single peer with
/// requests faster than it (or the wire) can service them.
pub const REQUEST_SPACING: Duration = Duration::from_millis(200);

/// How long a block may sit in the `Pending` state before its lease expires
/// and it is returned to `Free` for some other peer to pick up.
pub const BLOCK_LEASE: Duration = Duration::from_secs(5);

/// The application loop's scheduling cadence: how long it sleeps between
/// sweeps of the piece table when there is work to do.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// How long the application loop sleeps when no peer is currently unchoked.
pub const NO_PEERS_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound on how long the I/O context waits, idle, between sweeps of the
/// peer socket list before checking for new readable data again.
pub const IO_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// At most this many peer endpoints are kept from a tracker response.
pub const MAX_PEERS_TRY_CONNECT: usize = 200;

/// At most this many peers are actually connected to at once.
pub const MAX_PEERS_CONNECTED: usize = 50;

/// The port advertised to the tracker in the `port` announce parameter.
/// This client never listens for inbound connections (no seeding, per the
/// spec's non-goals), so the value is advisory only.
pub const ANNOUNCE_PORT: u16 = 6881;

/// Seed for the peer pool's request-selection RNG when the caller has no
/// more specific seed to inject (e.g. a real, non-test run).
pub const DEFAULT_RNG_SEED: u64 = 0xC0FFEE;

/// Default prefix for the locally generated peer id. The remaining bytes are
/// zero padded; a real client would mix in a random or version-derived
/// suffix, but a fixed id keeps test fixtures deterministic.
pub const PEER_ID_PREFIX: &[u8] = b"-LC0001-";

/// Builds this client's 20 byte peer id announced in the handshake and to
/// trackers.
pub fn peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    let prefix_len = PEER_ID_PREFIX.len().min(20);
    id[..prefix_len].copy_from_slice(&PEER_ID_PREFIX[..prefix_len]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_fixed_prefix() {
        let id = peer_id();
        assert_eq!(&id[..PEER_ID_PREFIX.len()], PEER_ID_PREFIX);
    }
}
