//! The pieces manager (component E): owns every [`Piece`], the file-slice
//! arena that maps them onto on-disk files, and the completed-pieces
//! bitfield. It is the sink that peer sessions feed arriving blocks into.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::piece::{build_file_map, FileRecord, FileSlice, Piece};
use crate::storage;
use crate::{Bitfield, PieceIndex};

/// Decouples [`crate::peer_session::PeerSession`] from the pieces manager
/// per the design note in the spec (§9, option b): rather than threading a
/// topic-addressed event bus through the session, the session is handed a
/// `BlockSink` trait object at construction and calls it directly when a
/// `Piece` message arrives. No cyclic peer↔manager reference is needed.
pub trait BlockSink: Send + Sync {
    /// A data block arrived for `piece_index` at `block_offset`. Implementors
    /// must be non-blocking: this is called directly from the I/O context.
    fn on_block(&self, piece_index: PieceIndex, block_offset: u32, data: Vec<u8>);
}

struct Inner {
    pieces: Vec<Piece>,
    file_slices: Vec<FileSlice>,
    files: Vec<FileRecord>,
    completed: Bitfield,
    complete_pieces: usize,
    output_dir: std::path::PathBuf,
}

/// Owns all pieces and the completed-pieces bitfield behind a single mutex.
/// Short critical sections only: every public method locks, mutates, and
/// unlocks without blocking on I/O other than the piece-verification file
/// write, matching the "short critical section per domain" contract in
/// the design's concurrency model.
pub struct PiecesManager {
    inner: Mutex<Inner>,
}

impl PiecesManager {
    /// Builds every piece from `hashes`/`piece_length`/`total_length`, then
    /// computes the file-slice arena once and attaches each slice's index to
    /// its owning piece.
    pub fn new(
        hashes: &[[u8; 20]],
        piece_length: u32,
        total_length: u64,
        files: &[FileRecord],
        output_dir: impl AsRef<Path>,
    ) -> Self {
        let number_of_pieces = hashes.len();
        let mut pieces = Vec::with_capacity(number_of_pieces);
        for (index, hash) in hashes.iter().enumerate() {
            let size = if index == number_of_pieces - 1 {
                (total_length - (number_of_pieces as u64 - 1) * piece_length as u64) as u32
            } else {
                piece_length
            };
            pieces.push(Piece::new(index, size, *hash));
        }

        let file_slices = build_file_map(files, piece_length);
        for (slice_index, slice) in file_slices.iter().enumerate() {
            pieces[slice.piece_index].file_slices.push(slice_index);
        }

        let completed = Bitfield::from_elem(number_of_pieces, false);

        Self {
            inner: Mutex::new(Inner {
                pieces,
                file_slices,
                files: files.to_vec(),
                completed,
                complete_pieces: 0,
                output_dir: output_dir.as_ref().to_path_buf(),
            }),
        }
    }

    pub fn number_of_pieces(&self) -> usize {
        self.inner.lock().unwrap().pieces.len()
    }

    /// True iff `piece_index` is already verified. Used by the scheduler to
    /// skip full pieces without taking a lock per block.
    pub fn is_piece_full(&self, piece_index: PieceIndex) -> bool {
        self.inner.lock().unwrap().pieces[piece_index].is_full
    }

    /// Reaps expired leases, then hands out the first free block, all under
    /// one lock acquisition so no other context can observe the piece
    /// between the reap and the grant.
    pub fn get_empty_block(&self, piece_index: PieceIndex, now: Instant, lease: Duration) -> Option<(PieceIndex, u32, u32)> {
        let mut inner = self.inner.lock().unwrap();
        let piece = &mut inner.pieces[piece_index];
        piece.update_block_status(now, lease);
        piece.get_empty_block(now)
    }

    pub fn all_pieces_completed(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.complete_pieces == inner.pieces.len()
    }

    pub fn complete_pieces(&self) -> usize {
        self.inner.lock().unwrap().complete_pieces
    }

    pub fn total_bytes_complete(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner
            .pieces
            .iter()
            .filter(|p| p.is_full)
            .map(|p| p.size as u64)
            .sum()
    }

    /// Persists a completed piece's file slices to disk, per the §4.2
    /// write-contract. Failures are logged, not propagated: the piece
    /// remains `is_full` regardless of whether every slice made it to disk.
    fn persist(inner: &mut Inner, piece_index: PieceIndex) {
        let slice_indices = inner.pieces[piece_index].file_slices.clone();
        let raw_data = inner.pieces[piece_index].raw_data.clone();
        for slice_index in slice_indices {
            let slice = inner.file_slices[slice_index];
            let path = inner.output_dir.join(&inner.files[slice.file_index].path);
            let chunk = &raw_data[slice.piece_offset as usize..(slice.piece_offset + slice.length) as usize];
            if let Err(e) = storage::write_slice(&path, slice.file_offset, chunk) {
                log::warn!(
                    "failed to persist piece {} file slice {}: {}",
                    piece_index, slice_index, e
                );
            }
        }
    }
}

impl BlockSink for PiecesManager {
    fn on_block(&self, piece_index: PieceIndex, block_offset: u32, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();

        let piece = &mut inner.pieces[piece_index];
        if piece.is_full {
            return;
        }
        piece.set_block(block_offset, data);

        if !piece.are_all_blocks_full() {
            return;
        }
        if piece.set_to_full() {
            inner.completed.set(piece_index, true);
            inner.complete_pieces += 1;
            Self::persist(&mut inner, piece_index);
        }
    }
}
