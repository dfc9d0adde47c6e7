// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::config::HEADER_SIZE;
use crate::config::MIN_BLOCK;
use crate::ptr::HeaderPtr;
use core::ptr::NonNull;

/// In-memory layout of a block header.
///
/// Links are stored as byte offsets from the start of the arena, with `NO_LINK` marking the ends
/// of the chain.
#[repr(C, align(16))]
#[derive(Copy, Clone, Debug)]
pub(crate) struct BlockHeaderRepr {
    size: usize,
    prev_offset: usize,
    next_offset: usize,
    flags: usize,
}

const NO_LINK: usize = usize::MAX;
const IN_USE: usize = 1;

#[inline]
const fn encode_link(offset: Option<usize>) -> usize {
    match offset {
        Some(offset) => offset,
        None => NO_LINK,
    }
}

#[inline]
const fn decode_link(raw: usize) -> Option<usize> {
    if raw == NO_LINK {
        None
    } else {
        Some(raw)
    }
}

/// Decoded copy of a block header.
///
/// Changes to a `Block` are not visible in memory until [`write()`](Self::write) is called.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Block {
    base: NonNull<u8>,
    offset: usize,
    size: usize,
    in_use: bool,
    prev_offset: Option<usize>,
    next_offset: Option<usize>,
}

impl Block {
    /// Creates a free, unlinked block at `offset` bytes from `base`, with a payload of `size`
    /// bytes.
    ///
    /// Call [`write()`](Self::write) to actually store the header.
    ///
    /// # Safety
    ///
    /// `base + offset .. base + offset + HEADER_SIZE + size` must be memory owned by the arena
    /// starting at `base`, and `base + offset` must be aligned for `BlockHeaderRepr`.
    #[inline]
    #[must_use]
    pub(crate) const unsafe fn new_at(base: NonNull<u8>, offset: usize, size: usize) -> Self {
        Self {
            base,
            offset,
            size,
            in_use: false,
            prev_offset: None,
            next_offset: None,
        }
    }

    /// Reads the header stored at `offset` bytes from `base`.
    ///
    /// # Safety
    ///
    /// A header must have been written at that location, and the memory it describes must still
    /// belong to the arena.
    #[inline]
    #[must_use]
    pub(crate) unsafe fn read(base: NonNull<u8>, offset: usize) -> Self {
        let header_ptr = base.byte_add(offset).cast::<BlockHeaderRepr>();
        debug_assert!(header_ptr.is_aligned(), "pointer is not aligned");

        let repr = header_ptr.read();
        Self {
            base,
            offset,
            size: repr.size,
            in_use: repr.flags & IN_USE != 0,
            prev_offset: decode_link(repr.prev_offset),
            next_offset: decode_link(repr.next_offset),
        }
    }

    #[inline]
    pub(crate) fn write(&self) {
        let repr = BlockHeaderRepr {
            size: self.size,
            prev_offset: encode_link(self.prev_offset),
            next_offset: encode_link(self.next_offset),
            flags: if self.in_use { IN_USE } else { 0 },
        };
        // SAFETY: `new_at()` and `read()` require the header location to be owned by the arena
        // and aligned
        unsafe { self.ptr().as_nonnull().cast::<BlockHeaderRepr>().write(repr) }
    }

    #[inline]
    pub(crate) fn ptr(&self) -> HeaderPtr {
        HeaderPtr::new(unsafe { self.base.byte_add(self.offset) })
    }

    #[inline]
    pub(crate) fn payload(&self) -> NonNull<u8> {
        unsafe { self.ptr().to_payload_ptr().as_nonnull() }
    }

    #[inline]
    pub(crate) const fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Offset of the first byte past the payload.
    #[inline]
    pub(crate) const fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }

    #[inline]
    pub(crate) const fn is_in_use(&self) -> bool {
        self.in_use
    }

    #[inline]
    pub(crate) fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    #[inline]
    pub(crate) const fn prev_offset(&self) -> Option<usize> {
        self.prev_offset
    }

    #[inline]
    pub(crate) const fn next_offset(&self) -> Option<usize> {
        self.next_offset
    }

    pub(crate) fn prev(&self) -> Option<Self> {
        self.prev_offset
            .map(|offset| unsafe { Self::read(self.base, offset) })
    }

    pub(crate) fn next(&self) -> Option<Self> {
        self.next_offset
            .map(|offset| unsafe { Self::read(self.base, offset) })
    }

    /// Returns the previous block if it is free.
    #[inline]
    pub(crate) fn free_prev(&self) -> Option<Self> {
        self.prev().filter(|prev| !prev.in_use)
    }

    /// Returns the next block if it is free.
    #[inline]
    pub(crate) fn free_next(&self) -> Option<Self> {
        self.next().filter(|next| !next.in_use)
    }

    /// Links `right` directly after `left` and writes both headers.
    pub(crate) fn connect(left: &mut Self, right: &mut Self) {
        debug_assert_eq!(left.base, right.base, "blocks do not belong to the same arena");
        debug_assert_eq!(left.end(), right.offset, "blocks are not adjacent");
        left.next_offset = Some(right.offset);
        right.prev_offset = Some(left.offset);
        left.write();
        right.write();
    }

    /// Returns `true` if splitting this block at `size` leaves a remainder of at least one
    /// minimum block.
    #[inline]
    #[must_use]
    pub(crate) const fn can_split(&self, size: usize) -> bool {
        size <= self.size && self.size - size >= MIN_BLOCK
    }

    /// Shrinks this block to `size` and turns the excess into a new free block linked right after
    /// it. Both headers (and the header of the old successor, if any) are written.
    ///
    /// Returns the new block.
    pub(crate) fn split_off(&mut self, size: usize) -> Self {
        debug_assert!(self.can_split(size), "block too small to be split");

        let offset = self.offset + HEADER_SIZE + size;
        let remainder_size = self.size - size - HEADER_SIZE;
        // SAFETY: the remainder lies entirely within the memory previously described by `self`
        let mut remainder = unsafe { Self::new_at(self.base, offset, remainder_size) };
        remainder.next_offset = self.next_offset;

        if let Some(mut next) = self.next() {
            next.prev_offset = Some(remainder.offset);
            next.write();
        }

        self.size = size;
        Self::connect(self, &mut remainder);
        remainder
    }

    /// Absorbs `next`, which must directly follow this block, and writes the updated headers.
    ///
    /// The header of the absorbed block becomes part of this block's payload.
    pub(crate) fn merge(&mut self, next: Self) {
        debug_assert_eq!(self.next_offset, Some(next.offset), "blocks are not linked");
        debug_assert_eq!(self.end(), next.offset, "blocks are not adjacent");

        self.size += HEADER_SIZE + next.size;
        self.next_offset = next.next_offset;
        self.write();

        if let Some(mut after) = next.next() {
            after.prev_offset = Some(self.offset);
            after.write();
        }
    }
}

impl PartialEq for Block {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.offset == other.offset
    }
}

impl Eq for Block {}
