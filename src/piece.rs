//! The piece model: a fixed-size chunk of the payload, subdivided into
//! blocks, that becomes immutable once its SHA-1 hash has been verified.
//!
//! Also home to the file/piece geometry computation ([`FileMap`]): the
//! mapping from a torrent's (possibly multi-file) payload onto the fixed
//! piece grid, computed once at startup.

use std::path::PathBuf;
use std::time::Instant;

use sha1_smol::Sha1;

use crate::block::{Block, BlockState};
use crate::config::BLOCK_SIZE;
use crate::{block_count, block_len, FileIndex, PieceIndex, Sha1Hash};

/// A piece of the torrent's payload: `piece_length` bytes except possibly
/// the last piece, which may be shorter.
pub struct Piece {
    pub index: PieceIndex,
    pub size: u32,
    pub hash: Sha1Hash,
    pub is_full: bool,
    pub blocks: Vec<Block>,
    pub raw_data: Vec<u8>,
    /// Indices into the owning [`crate::pieces_manager::PiecesManager`]'s
    /// file-slice arena (see [`FileSlice`]) for the file ranges this piece
    /// contains. Kept as indices rather than owned slices so the
    /// piece/file cross-reference doesn't need a cyclic structure (see
    /// DESIGN.md's "piece <-> file cycle" note).
    pub file_slices: Vec<usize>,
}

impl Piece {
    pub fn new(index: PieceIndex, size: u32, hash: Sha1Hash) -> Self {
        let mut blocks = Vec::with_capacity(block_count(size));
        for i in 0..block_count(size) {
            blocks.push(Block::new(block_len(size, i)));
        }
        Self {
            index,
            size,
            hash,
            is_full: false,
            blocks,
            raw_data: Vec::new(),
            file_slices: Vec::new(),
        }
    }

    /// Resets every `Pending` block whose lease has expired back to `Free`.
    /// A no-op for blocks that are `Free`, `Full`, or still within their
    /// lease window.
    pub fn update_block_status(&mut self, now: Instant, lease: std::time::Duration) {
        for block in self.blocks.iter_mut() {
            if block.state == BlockState::Pending && now.saturating_duration_since(block.last_seen) > lease {
                block.reset();
            }
        }
    }

    /// Hands out the first `Free` block, transitioning it to `Pending` and
    /// stamping its lease start time. Returns `(piece_index, block_offset,
    /// block_size)`, or `None` if the piece is already full or has no free
    /// block right now.
    pub fn get_empty_block(&mut self, now: Instant) -> Option<(PieceIndex, u32, u32)> {
        if self.is_full {
            return None;
        }
        for (i, block) in self.blocks.iter_mut().enumerate() {
            if block.state == BlockState::Free {
                block.state = BlockState::Pending;
                block.last_seen = now;
                let offset = i as u32 * BLOCK_SIZE;
                return Some((self.index, offset, block.size));
            }
        }
        None
    }

    /// Stores a received block's bytes at `offset`. Late or duplicate
    /// deliveries for an already-`Full` block (or an already-`Full` piece)
    /// are silently ignored, making this idempotent on offset.
    pub fn set_block(&mut self, offset: u32, data: Vec<u8>) {
        let index = (offset / BLOCK_SIZE) as usize;
        if self.is_full {
            return;
        }
        if let Some(block) = self.blocks.get_mut(index) {
            if block.state != BlockState::Full {
                block.data = data;
                block.state = BlockState::Full;
            }
        }
    }

    /// Returns a slice of this piece's assembled data. Only meaningful once
    /// `is_full` is true.
    pub fn get_block(&self, block_offset: u32, block_length: u32) -> &[u8] {
        let start = block_offset as usize;
        let end = start + block_length as usize;
        &self.raw_data[start..end]
    }

    /// True iff no block is `Free` or `Pending`, i.e. every block has either
    /// arrived or the piece is already verified.
    pub fn are_all_blocks_full(&self) -> bool {
        !self
            .blocks
            .iter()
            .any(|b| matches!(b.state, BlockState::Free | BlockState::Pending))
    }

    /// Concatenates all blocks and checks the result against the piece's
    /// declared hash. On a match, marks the piece full and stores the
    /// assembled data; on a mismatch, resets every block back to `Free` so
    /// the piece can be re-requested from scratch.
    ///
    /// Returns whether verification succeeded.
    pub fn set_to_full(&mut self) -> bool {
        let mut data = Vec::with_capacity(self.size as usize);
        for block in &self.blocks {
            data.extend_from_slice(&block.data);
        }

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest = hasher.digest().bytes();

        if digest != self.hash {
            log::warn!("piece {} failed hash check, resetting", self.index);
            for block in self.blocks.iter_mut() {
                block.reset();
            }
            return false;
        }

        self.is_full = true;
        self.raw_data = data;
        true
    }
}

/// A file as declared in the metainfo: a path relative to the download
/// directory and its length in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub length: u64,
}

/// A maximal contiguous byte range wholly contained within one piece and one
/// file. The union of every `FileSlice` in a [`crate::pieces_manager::PiecesManager`]'s
/// arena covers the payload exactly and in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSlice {
    pub piece_index: PieceIndex,
    pub file_index: FileIndex,
    pub file_offset: u64,
    pub piece_offset: u32,
    pub length: u32,
}

/// Computes the file/piece geometry: walks `files` in order, splitting each
/// file's byte range at piece boundaries, producing one [`FileSlice`] per
/// maximal contiguous run that stays within a single piece and a single
/// file.
///
/// Grounded in `original_source/lab3/controllers/pieces_manager.py`'s
/// `_load_files`, generalized into a pure function instead of a
/// side-effecting loop that mutates piece objects directly.
pub fn build_file_map(files: &[FileRecord], piece_length: u32) -> Vec<FileSlice> {
    let mut slices = Vec::new();
    let mut torrent_offset: u64 = 0;

    for (file_index, file) in files.iter().enumerate() {
        let mut remaining = file.length;
        let mut file_offset: u64 = 0;

        while remaining > 0 {
            let piece_index = (torrent_offset / piece_length as u64) as PieceIndex;
            let piece_offset = (torrent_offset % piece_length as u64) as u32;
            let room_in_piece = piece_length - piece_offset;
            let slice_len = remaining.min(room_in_piece as u64) as u32;

            slices.push(FileSlice {
                piece_index,
                file_index,
                file_offset,
                piece_offset,
                length: slice_len,
            });

            torrent_offset += slice_len as u64;
            file_offset += slice_len as u64;
            remaining -= slice_len as u64;
        }
    }

    slices
}
