// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::arena::Arena;
use crate::block::Block;
use core::ptr::NonNull;

/// Walks the block directory in address order, starting from the arena start.
#[derive(Clone, Debug)]
pub(crate) struct Blocks {
    next: Option<Block>,
}

impl Blocks {
    pub(crate) fn new(arena: &Arena) -> Self {
        Self { next: arena.head() }
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next.take()?;
        self.next = block.next();
        if let Some(next) = &self.next {
            debug_assert_eq!(next.prev_offset(), Some(block.offset()), "broken back link");
            debug_assert_eq!(next.offset(), block.end(), "blocks are not adjacent");
        }
        Some(block)
    }
}

/// Snapshot of a block in the directory, as reported by
/// [`Malloc::for_each_block`](crate::Malloc::for_each_block).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BlockInfo {
    /// Offset of the block header from the arena start.
    pub offset: usize,
    /// Address of the payload.
    pub payload: NonNull<u8>,
    /// Size of the payload in bytes.
    pub size: usize,
    /// Whether the block is handed out to a caller.
    pub in_use: bool,
}

impl From<&Block> for BlockInfo {
    #[inline]
    fn from(block: &Block) -> Self {
        Self {
            offset: block.offset(),
            payload: block.payload(),
            size: block.size(),
            in_use: block.is_in_use(),
        }
    }
}
