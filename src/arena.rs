// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::block::Block;
use crate::config::Config;
use crate::config::ALIGN;
use crate::config::HEADER_SIZE;
use crate::error::Error;
use crate::heap::Heap;
use crate::iter::Blocks;
use crate::ptr::PayloadPtr;
use core::ptr::NonNull;

/// Result of a first-fit search.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Placement {
    /// The arena has no blocks yet.
    Empty,
    /// A free block large enough for the request.
    Found(Block),
    /// No free block fits; `last` is the final block visited, after which a new block can be
    /// appended.
    NotFound { last: Block },
}

/// The memory obtained from the heap, and the block directory that covers it.
///
/// An arena starts out empty (no memory, no blocks). The first call to [`init()`](Self::init)
/// obtains memory and creates the first block at offset 0; from then on the arena always
/// contains at least one block.
#[derive(Debug)]
pub(crate) struct Arena {
    base: Option<NonNull<u8>>,
    last_offset: usize,
    frontier: usize,
}

// SAFETY: the arena is the unique owner of the memory obtained from its heap.
unsafe impl Send for Arena {}

impl Arena {
    #[inline]
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            base: None,
            last_offset: 0,
            frontier: 0,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) const fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// Bytes obtained from the heap so far; the growth frontier as an offset from the arena start.
    #[inline]
    #[must_use]
    pub(crate) const fn frontier(&self) -> usize {
        self.frontier
    }

    #[inline]
    #[must_use]
    pub(crate) fn start(&self) -> Option<NonNull<u8>> {
        self.base
    }

    pub(crate) fn head(&self) -> Option<Block> {
        self.base.map(|base| unsafe { Block::read(base, 0) })
    }

    pub(crate) fn last(&self) -> Option<Block> {
        self.base
            .map(|base| unsafe { Block::read(base, self.last_offset) })
    }

    #[inline]
    pub(crate) fn blocks(&self) -> Blocks {
        Blocks::new(self)
    }

    /// Creates the arena with a first in-use block of `size` payload bytes.
    pub(crate) fn init<H: Heap>(
        &mut self,
        heap: &mut H,
        config: &Config,
        size: usize,
    ) -> Result<Block, Error> {
        debug_assert!(self.is_empty(), "arena is already initialized");

        let amount = config.growth_for(size).ok_or(Error::OutOfMemory)?;
        check_increment(amount)?;

        if let Some(frontier) = heap.frontier() {
            let pad = frontier.align_offset(ALIGN);
            if pad != 0 {
                heap.extend(pad).ok_or(Error::OutOfMemory)?;
            }
        }

        let start = heap.extend(amount).ok_or(Error::OutOfMemory)?;
        if start.align_offset(ALIGN) != 0 {
            return Err(Error::NonContiguous);
        }

        self.base = Some(start);
        self.frontier = amount;
        self.last_offset = 0;

        // SAFETY: `amount >= HEADER_SIZE + size` bytes were just obtained at `start`
        let mut block = unsafe { Block::new_at(start, 0, size) };
        block.set_in_use(true);
        block.write();
        Ok(block)
    }

    /// Obtains `amount` more bytes from the heap, right at the frontier.
    pub(crate) fn extend<H: Heap>(&mut self, heap: &mut H, amount: usize) -> Result<(), Error> {
        let base = self.base.ok_or(Error::OutOfMemory)?;
        let new_frontier = self
            .frontier
            .checked_add(amount)
            .ok_or(Error::OutOfMemory)?;
        check_increment(new_frontier)?;

        let expected = unsafe { base.byte_add(self.frontier) };
        let region = heap.extend(amount).ok_or(Error::OutOfMemory)?;
        if region != expected {
            return Err(Error::NonContiguous);
        }

        self.frontier = new_frontier;
        Ok(())
    }

    /// Appends a new in-use block of `size` payload bytes after `last`, growing the heap if the
    /// slack past `last` is not enough.
    pub(crate) fn append<H: Heap>(
        &mut self,
        heap: &mut H,
        config: &Config,
        mut last: Block,
        size: usize,
    ) -> Result<Block, Error> {
        debug_assert_eq!(last.offset(), self.last_offset, "`last` is not the last block");
        debug_assert_eq!(last.next_offset(), None, "`last` has a successor");

        let base = self.base.ok_or(Error::OutOfMemory)?;
        let needed = HEADER_SIZE.checked_add(size).ok_or(Error::OutOfMemory)?;
        let offset = last.end();

        if self.frontier - offset < needed {
            let amount = config.growth_for(size).ok_or(Error::OutOfMemory)?;
            self.extend(heap, amount)?;
        }

        // SAFETY: the memory between `offset` and the frontier belongs to no block, and holds at
        // least `needed` bytes
        let mut block = unsafe { Block::new_at(base, offset, size) };
        block.set_in_use(true);
        Block::connect(&mut last, &mut block);
        self.last_offset = block.offset();
        Ok(block)
    }

    /// Slack between the end of the last block and the frontier.
    pub(crate) fn slack(&self) -> usize {
        self.last()
            .map(|last| self.frontier - last.end())
            .unwrap_or(self.frontier)
    }

    /// First-fit search for a free block of at least `size` bytes, from the arena start.
    pub(crate) fn find_free(&self, size: usize) -> Placement {
        let mut placement = Placement::Empty;
        for block in self.blocks() {
            if !block.is_in_use() && block.size() >= size {
                return Placement::Found(block);
            }
            placement = Placement::NotFound { last: block };
        }
        placement
    }

    /// Splits `block` at `size` if the excess is large enough to form a block of its own.
    ///
    /// The free remainder is merged with its successor if that is free too. Returns `true` if the
    /// block was split.
    pub(crate) fn split(&mut self, block: &mut Block, size: usize) -> bool {
        if !block.can_split(size) {
            return false;
        }
        let mut remainder = block.split_off(size);
        if let Some(next) = remainder.free_next() {
            self.merge(&mut remainder, next);
        }
        if remainder.next_offset().is_none() {
            self.last_offset = remainder.offset();
        }
        true
    }

    /// Merges `next` into `block`. `next` must be the successor of `block`.
    pub(crate) fn merge(&mut self, block: &mut Block, next: Block) {
        block.merge(next);
        if block.next_offset().is_none() {
            self.last_offset = block.offset();
        }
    }

    /// Finds the block whose payload starts at `payload`.
    ///
    /// Addresses outside the arena or with the wrong alignment are rejected without scanning.
    /// Everything else is compared against every block in the directory.
    pub(crate) fn validate(&self, payload: PayloadPtr) -> Option<Block> {
        let base = self.base?;
        let header_addr = payload.candidate_header_addr()?;
        let offset = header_addr.checked_sub(base.as_ptr() as usize)?;
        if offset % ALIGN != 0 || offset.checked_add(HEADER_SIZE)? > self.frontier {
            return None;
        }

        for block in self.blocks() {
            if block.offset() == offset {
                return Some(block);
            }
            if block.offset() > offset {
                break;
            }
        }
        None
    }
}

/// Rejects sizes that pointer arithmetic cannot express.
#[inline]
fn check_increment(amount: usize) -> Result<(), Error> {
    if amount > isize::MAX as usize {
        Err(Error::OutOfMemory)
    } else {
        Ok(())
    }
}
