// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Sources of memory for the arena.
//!
//! The allocator needs exactly one primitive from its environment: "extend the heap by `n`
//! bytes, contiguously with the previous extension". [`Heap`] describes that primitive;
//! [`Sbrk`] implements it with `sbrk(2)`, and [`SliceHeap`] hands out a caller-provided buffer
//! piece by piece.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// The heap-growth primitive used by [`Malloc`](crate::Malloc).
///
/// # Safety
///
/// Implementations must guarantee that a region returned by [`extend`](Heap::extend) is valid for
/// reads and writes of `increment` bytes, stays valid for as long as the heap is alive, and is not
/// aliased by any other reference or pointer.
pub unsafe trait Heap {
    /// Extends the heap by `increment` bytes and returns the start of the new region (the
    /// previous frontier), or `None` if the heap cannot grow.
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>>;

    /// Returns the current frontier without growing, if the heap can tell.
    ///
    /// This is used once, before the first extension, to align the start of the arena.
    #[inline]
    fn frontier(&mut self) -> Option<NonNull<u8>> {
        None
    }
}

/// Heap backed by the process data segment, grown with `sbrk(2)`.
///
/// Other code in the process that moves the program break (for example, the system `malloc`)
/// breaks the contiguity of the arena. When that happens, growth fails with
/// [`Error::NonContiguous`](crate::Error::NonContiguous).
#[cfg(unix)]
#[derive(Copy, Clone, Default, Debug)]
pub struct Sbrk;

#[cfg(unix)]
unsafe impl Heap for Sbrk {
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
        let increment = libc::intptr_t::try_from(increment).ok()?;
        // SAFETY: a positive increment never releases memory owned by someone else
        let prev = unsafe { libc::sbrk(increment) };
        if prev as usize == usize::MAX {
            return None;
        }
        NonNull::new(prev.cast())
    }

    fn frontier(&mut self) -> Option<NonNull<u8>> {
        let brk = unsafe { libc::sbrk(0) };
        if brk as usize == usize::MAX {
            return None;
        }
        NonNull::new(brk.cast())
    }
}

/// Heap carved out of a fixed buffer.
///
/// Each extension hands out the next `increment` bytes of the buffer, and fails once the buffer
/// is exhausted.
///
/// # Examples
///
/// ```
/// use firstfit::Heap;
/// use firstfit::SliceHeap;
///
/// let mut memory = [0u8; 64];
/// let start = memory.as_mut_ptr();
/// let mut heap = SliceHeap::from(&mut memory);
///
/// assert_eq!(heap.extend(48).map(|ptr| ptr.as_ptr()), Some(start));
/// assert_eq!(heap.extend(16).map(|ptr| ptr.as_ptr()), Some(start.wrapping_add(48)));
/// assert_eq!(heap.extend(1), None);
/// ```
pub struct SliceHeap<'a> {
    slice: NonNull<[u8]>,
    brk: usize,
    phantom: PhantomData<&'a mut [u8]>,
}

// SAFETY: `SliceHeap` is the unique owner of the buffer for `'a`, just like `&'a mut [u8]`.
unsafe impl<'a> Send for SliceHeap<'a> where &'a mut [u8]: Send {}

impl<'a> SliceHeap<'a> {
    /// Constructs a heap that hands out the bytes of `slice`.
    #[inline]
    #[must_use]
    pub fn from_slice(slice: &'a mut [u8]) -> Self {
        let len = slice.len();
        // SAFETY: slices are never null
        let start = unsafe { NonNull::new_unchecked(slice.as_mut_ptr()) };
        Self {
            slice: NonNull::slice_from_raw_parts(start, len),
            brk: 0,
            phantom: PhantomData,
        }
    }

    /// Total size of the underlying buffer.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slice.len()
    }

    /// Number of bytes handed out so far.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.brk
    }
}

unsafe impl<'a> Heap for SliceHeap<'a> {
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
        let new_brk = self.brk.checked_add(increment)?;
        if new_brk > self.capacity() {
            return None;
        }
        // SAFETY: `self.brk <= self.capacity()`, so the offset is in bounds of the buffer
        let prev = unsafe { self.slice.cast::<u8>().byte_add(self.brk) };
        self.brk = new_brk;
        Some(prev)
    }

    fn frontier(&mut self) -> Option<NonNull<u8>> {
        // SAFETY: `self.brk <= self.capacity()`
        Some(unsafe { self.slice.cast::<u8>().byte_add(self.brk) })
    }
}

impl<'a> From<&'a mut [u8]> for SliceHeap<'a> {
    #[inline]
    fn from(slice: &'a mut [u8]) -> Self {
        Self::from_slice(slice)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for SliceHeap<'a> {
    #[inline]
    fn from(array: &'a mut [u8; N]) -> Self {
        Self::from(array.as_mut_slice())
    }
}

impl<'a> fmt::Debug for SliceHeap<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceHeap")
            .field("start", &self.slice.cast::<u8>())
            .field("capacity", &self.capacity())
            .field("used", &self.brk)
            .finish()
    }
}
