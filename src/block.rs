//! A block: the unit of a single request/piece exchange, and the smallest
//! granularity at which download progress is tracked.

use std::time::Instant;

use crate::config::BLOCK_SIZE;

/// The lifecycle state of a single block within a piece.
///
/// Transitions are `Free -> Pending -> Full` on the happy path, and
/// `Pending -> Free` when a lease expires without the block arriving.
/// `Full` is terminal until the whole piece fails hash verification, at
/// which point every block in the piece resets to `Free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Pending,
    Full,
}

/// A fixed-size chunk of a piece.
///
/// Invariant: `state == Full` implies `data.len() == size`; `state == Free`
/// implies `data` is empty; `state == Pending` implies `last_seen` reflects
/// the time the block was handed out.
#[derive(Clone, Debug)]
pub struct Block {
    pub state: BlockState,
    pub size: u32,
    pub data: Vec<u8>,
    pub last_seen: Instant,
}

impl Block {
    /// Creates a new, empty, `Free` block of the given size (always
    /// [`BLOCK_SIZE`] except possibly the last block of a piece).
    pub fn new(size: u32) -> Self {
        Self {
            state: BlockState::Free,
            size,
            data: Vec::new(),
            last_seen: Instant::now(),
        }
    }

    /// Resets the block back to `Free` with no data, discarding whatever
    /// partial progress it had. Used both for lease expiry and for a whole
    /// piece's reset after a failed hash check.
    pub fn reset(&mut self) {
        self.state = BlockState::Free;
        self.data.clear();
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new(BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_is_free_and_empty() {
        let block = Block::new(1234);
        assert_eq!(block.state, BlockState::Free);
        assert_eq!(block.size, 1234);
        assert!(block.data.is_empty());
    }

    #[test]
    fn reset_clears_data_and_returns_to_free() {
        let mut block = Block::new(BLOCK_SIZE);
        block.state = BlockState::Full;
        block.data = vec![1, 2, 3];
        block.reset();
        assert_eq!(block.state, BlockState::Free);
        assert!(block.data.is_empty());
    }
}
