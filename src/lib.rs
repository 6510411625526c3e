pub mod application;
pub mod block;
pub mod config;
pub mod error;
pub mod message;
pub mod metainfo;
pub mod peer_pool;
pub mod peer_session;
pub mod piece;
pub mod pieces_manager;
pub mod storage;
pub mod tracker;

use bit_vec::BitVec;

/// The type of a piece's index within a torrent.
pub type PieceIndex = usize;

/// The type of a file's index within a torrent's file list.
pub type FileIndex = usize;

/// A BitTorrent peer id: an arbitrary 20 byte string (see BEP 20).
pub type PeerId = [u8; 20];

/// A SHA-1 digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// Piece availability as a compact bit vector, most significant bit first:
/// the first (highest) bit of the first byte represents piece 0, and so on.
/// A set bit means the peer has the piece. Trailing pad bits (when the piece
/// count isn't a multiple of 8) are always zero.
pub type Bitfield = BitVec;

/// Returns the length, in bytes, of the block at `index` within a piece of
/// length `piece_len`.
///
/// All blocks are [`config::BLOCK_SIZE`] long except possibly the last one in
/// the piece, which may be shorter.
///
/// # Panics
///
/// Panics if `index` would start past the end of the piece.
pub(crate) fn block_len(piece_len: u32, index: usize) -> u32 {
    let offset = index as u32 * config::BLOCK_SIZE;
    assert!(piece_len > offset, "block index out of bounds for piece");
    std::cmp::min(piece_len - offset, config::BLOCK_SIZE)
}

/// Returns the number of blocks a piece of length `piece_len` is subdivided
/// into.
///
/// This uses real (non-integer-truncating) division rounded up: a piece
/// whose length is an exact multiple of the block size divides evenly, and
/// any remainder gets its own, shorter, final block.
pub(crate) fn block_count(piece_len: u32) -> usize {
    ((piece_len as usize) + (config::BLOCK_SIZE as usize - 1)) / config::BLOCK_SIZE as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;

    const TWO_BLOCKS: u32 = 2 * BLOCK_SIZE;
    const OVERLAP: u32 = 1234;
    const UNEVEN: u32 = 2 * BLOCK_SIZE + OVERLAP;

    #[test]
    fn block_len_exact_multiple() {
        assert_eq!(block_len(TWO_BLOCKS, 0), BLOCK_SIZE);
        assert_eq!(block_len(TWO_BLOCKS, 1), BLOCK_SIZE);
    }

    #[test]
    fn block_len_short_last_block() {
        assert_eq!(block_len(UNEVEN, 0), BLOCK_SIZE);
        assert_eq!(block_len(UNEVEN, 1), BLOCK_SIZE);
        assert_eq!(block_len(UNEVEN, 2), OVERLAP);
    }

    #[test]
    #[should_panic]
    fn block_len_out_of_bounds_panics() {
        block_len(TWO_BLOCKS, 2);
    }

    #[test]
    fn block_count_exact_and_uneven() {
        assert_eq!(block_count(TWO_BLOCKS), 2);
        assert_eq!(block_count(UNEVEN), 3);
        // single short piece still gets exactly one block
        assert_eq!(block_count(1), 1);
    }
}
