//! The application loop (component F): the top-level scheduler that pairs
//! empty blocks with ready peers and emits request messages, plus progress
//! reporting.
//!
//! Grounded in the teacher's synchronous `download_piece` polling loop in
//! `peer.rs`, generalized from one peer into the swarm-wide scheduler the
//! design calls for, and moved off that peer's own thread onto a single
//! dedicated scheduler thread per §5.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config;
use crate::peer_pool::PeerPool;
use crate::pieces_manager::PiecesManager;

/// Runs until every piece is complete. Intended to be called from `main`
/// after the tracker announce and initial `add_peers` call have already
/// populated the pool; it does not itself talk to the tracker.
pub fn run(pool: Arc<PeerPool>, pieces: Arc<PiecesManager>) {
    let total_pieces = pieces.number_of_pieces();
    let mut last_reported_bytes = 0u64;

    while !pieces.all_pieces_completed() {
        if !pool.has_unchoked_peers() {
            thread::sleep(config::NO_PEERS_BACKOFF);
            continue;
        }

        for piece_index in 0..total_pieces {
            if pieces.is_piece_full(piece_index) {
                continue;
            }

            let Some(peer) = pool.get_random_peer_having_piece(piece_index) else {
                continue;
            };

            let Some((_, block_offset, block_length)) =
                pieces.get_empty_block(piece_index, Instant::now(), config::BLOCK_LEASE)
            else {
                continue;
            };

            peer.send_request(piece_index, block_offset, block_length);
        }

        report_progress(&pieces, total_pieces, &mut last_reported_bytes);
        thread::sleep(config::SCHEDULER_TICK);
    }

    log::info!(
        "download complete: {} pieces, {} bytes",
        total_pieces,
        pieces.total_bytes_complete()
    );
    pool.set_inactive();
}

/// Logs a progress line only when the completed-byte total actually
/// changed since the last tick, mirroring the original client's
/// re-summing `display_progression` rather than tracking a running delta
/// that could drift from the authoritative per-piece state.
fn report_progress(pieces: &PiecesManager, total_pieces: usize, last_reported_bytes: &mut u64) {
    let bytes = pieces.total_bytes_complete();
    if bytes != *last_reported_bytes {
        log::info!(
            "progress: {}/{} pieces, {} bytes",
            pieces.complete_pieces(),
            total_pieces,
            bytes
        );
        *last_reported_bytes = bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::FileRecord;
    use crate::pieces_manager::BlockSink;
    use sha1_smol::Sha1;

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.digest().bytes()
    }

    #[test]
    fn run_exits_immediately_when_already_complete() {
        let data = vec![b'A'; config::BLOCK_SIZE as usize];
        let hash = sha1_of(&data);
        let dir = std::env::temp_dir().join("leech-core-test-application-complete");
        let files = vec![FileRecord { path: "f".into(), length: config::BLOCK_SIZE as u64 }];
        let pieces = Arc::new(PiecesManager::new(&[hash], config::BLOCK_SIZE, config::BLOCK_SIZE as u64, &files, &dir));
        pieces.on_block(0, 0, data);
        assert!(pieces.all_pieces_completed());

        let pool = Arc::new(PeerPool::new([0; 20], [0; 20], 1, pieces.clone(), 1));
        // should return immediately without needing any peers
        run(pool, pieces);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
