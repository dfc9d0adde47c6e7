// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Firstfit: a first-fit `malloc` replacement over a single growable arena.
//!
//! Firstfit implements the classic allocate / release / reallocate / allocate-zeroed family on
//! top of one contiguous memory arena. The arena is grown on demand through a single primitive,
//! "extend the heap by `n` bytes", which on Unix is `sbrk(2)`.
//!
//! This is a no-`std` and no-`alloc` crate. It never issues any system call other than the heap
//! growth primitive.
//!
//! # Quick start & examples
//!
//! A [`Malloc`] is constructed from a [`Heap`]. [`Sbrk`] grows the process data segment, while
//! [`SliceHeap`] hands out the bytes of a buffer you already own:
//!
//! ```
//! use firstfit::Config;
//! use firstfit::Malloc;
//! use firstfit::SliceHeap;
//!
//! let mut memory = [0u8; 4096];
//! let config = Config::DEFAULT.with_growth_increment(1024);
//! let malloc = Malloc::with_config(SliceHeap::from(&mut memory), config);
//!
//! let ptr = malloc.allocate(100).expect("allocation failed");
//! unsafe { ptr.as_ptr().write_bytes(0xaa, 100) };
//!
//! let ptr = unsafe { malloc.reallocate(ptr.as_ptr(), 200) }
//!     .expect("reallocation failed")
//!     .expect("reallocation to a non-zero size returns a pointer");
//! assert_eq!(unsafe { ptr.as_ptr().read() }, 0xaa);
//!
//! unsafe { malloc.release(ptr.as_ptr()) };
//! ```
//!
//! ## Using as a global allocator
//!
//! [`Malloc::new`] is a `const fn`, and the arena is created lazily on the first allocation, so a
//! `Malloc` can be used directly in a `#[global_allocator]` static:
//!
//! ```no_run
//! use firstfit::Malloc;
//! use firstfit::Sbrk;
//!
//! #[global_allocator]
//! static MALLOC: Malloc<Sbrk> = Malloc::new(Sbrk);
//! ```
//!
//! Layouts with an alignment greater than [`ALIGN`] are not supported, and allocating them
//! through [`GlobalAlloc`] returns a null pointer.
//!
//! The crate emits records through the [`log`] facade, always after the allocator lock has been
//! released. When `Malloc` is the global allocator, a logger that allocates re-enters it on every
//! record, and should filter out the records of this crate.
//!
//! # Internal details
//!
//! The arena is covered, without gaps, by a chain of blocks. Every block is a header (of
//! [`HEADER_SIZE`] bytes) followed by the payload handed out to callers. Headers hold the payload
//! size, an in-use flag, and the offsets of the previous and next blocks, which makes the chain an
//! address-ordered doubly-linked list living inside the arena itself.
//!
//! * Allocation is first-fit: the chain is scanned from the start, and the first free block large
//!   enough is used, splitting off the excess as a new free block when it can hold at least
//!   [`MIN_BLOCK`] bytes. If no free block fits, a new block is appended at the end, growing the
//!   heap by the configured [growth increment](Config::with_growth_increment) (or by exactly the
//!   requested amount, for larger requests).
//! * Releasing a block merges it with its free neighbours, so that no two adjacent blocks are ever
//!   both free.
//! * Reallocation shrinks in place, grows the last block in place (extending the heap if needed),
//!   and tries merging with free neighbours before falling back to allocate-copy-release.
//! * Pointers passed to [`release`](Malloc::release) and [`reallocate`](Malloc::reallocate) are
//!   checked against the chain, so that pointers that do not belong to the allocator are ignored.
//!
//! The allocator state is protected by a [spin lock](https://en.wikipedia.org/wiki/Spinlock).
//!
//! # Errors
//!
//! Operations that cannot produce a pointer return an [`Error`]. Out-of-memory conditions
//! additionally set `errno` to `ENOMEM`, like `malloc(3)`.
//!
//! # Cargo feature flags
//!
//! * `allocator-api`: enables the implementation of the [`core::alloc::Allocator`] trait (requires
//!   a nightly compiler).
//! * `ffi`: exports `malloc`, `free`, `realloc` and `calloc` with the C ABI, backed by a static
//!   `Malloc<Sbrk>` (Unix only).

#![no_std]
#![cfg_attr(feature = "allocator-api", feature(allocator_api))]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stderr)]
#![warn(clippy::print_stdout)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(unused_crate_dependencies)]
#![warn(unused_macro_rules)]
#![warn(unused_qualifications)]
#![doc(test(attr(deny(warnings))))]

mod arena;
mod block;
mod config;
mod errno;
mod error;
mod heap;
mod iter;
mod ptr;
mod usage;

#[cfg(all(feature = "ffi", unix))]
pub mod ffi;


use crate::arena::Arena;
use crate::arena::Placement;
use crate::block::Block;
use crate::ptr::PayloadPtr;
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::ptr::NonNull;
use spin::Mutex;

#[cfg(feature = "allocator-api")]
use core::alloc::AllocError;
#[cfg(feature = "allocator-api")]
use core::alloc::Allocator;

pub use crate::config::align;
pub use crate::config::Config;
pub use crate::config::ALIGN;
pub use crate::config::HEADER_SIZE;
pub use crate::config::MIN_BLOCK;
pub use crate::error::Error;
pub use crate::heap::Heap;
#[cfg(unix)]
pub use crate::heap::Sbrk;
pub use crate::heap::SliceHeap;
pub use crate::iter::BlockInfo;
pub use crate::usage::Usage;

/// The Firstfit allocator.
///
/// `Malloc` owns a [`Heap`] and the arena grown from it. The arena is created on the first
/// allocation. See the [module-level documentation](crate) for details and examples.
#[derive(Debug)]
pub struct Malloc<H: Heap> {
    inner: Mutex<MallocInner<H>>,
}

impl<H: Heap> Malloc<H> {
    /// Constructs an allocator that grows `heap` using the default [`Config`].
    #[inline]
    #[must_use]
    pub const fn new(heap: H) -> Self {
        Self::with_config(heap, Config::DEFAULT)
    }

    /// Constructs an allocator that grows `heap` as specified by `config`.
    #[inline]
    #[must_use]
    pub const fn with_config(heap: H, config: Config) -> Self {
        Self {
            inner: Mutex::new(MallocInner {
                arena: Arena::new(),
                heap,
                config,
            }),
        }
    }

    /// Allocates `size` bytes and returns a pointer to the payload.
    ///
    /// The payload is aligned to [`ALIGN`] and is at least `size` bytes long (rounded up to a
    /// multiple of [`ALIGN`]). Its contents are unspecified.
    ///
    /// # Errors
    ///
    /// * [`Error::ZeroSize`] if `size` is zero.
    /// * [`Error::OutOfMemory`] or [`Error::NonContiguous`] if the heap cannot grow; `errno` is set
    ///   to `ENOMEM`.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, Error> {
        let result = self.locked(|inner| inner.allocate(size));
        warn_non_contiguous(&result);
        log::trace!("allocate({size}) -> {result:?}");
        result.map_err(errno::report)
    }

    /// Releases the block whose payload starts at `ptr`.
    ///
    /// Null pointers, pointers that were not returned by this allocator, and pointers that were
    /// already released are ignored.
    ///
    /// # Safety
    ///
    /// The payload must not be accessed after this call.
    pub unsafe fn release(&self, ptr: *mut u8) {
        let Some(payload) = PayloadPtr::from_raw(ptr) else {
            return;
        };
        let released = self.inner.lock().release(payload);
        match released {
            Released::Block => log::trace!("release({ptr:p})"),
            Released::AlreadyFree => log::warn!("release({ptr:p}): block already released"),
            Released::Foreign => {
                log::warn!("release({ptr:p}): pointer does not belong to the arena")
            }
        }
    }

    /// Resizes the block whose payload starts at `ptr` to hold `size` bytes.
    ///
    /// * If `size` is zero, this is [`release(ptr)`](Self::release) and returns `Ok(None)`, even
    ///   when `ptr` is null.
    /// * Otherwise, if `ptr` is null, this is [`allocate(size)`](Self::allocate).
    /// * Otherwise the returned pointer may equal `ptr` (the block was resized in place) or not
    ///   (the payload was moved). The first `min(old size, size)` bytes are preserved.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidPointer`] if `ptr` is not an in-use block of this allocator.
    /// * [`Error::OutOfMemory`] or [`Error::NonContiguous`] if the heap cannot grow; `errno` is set
    ///   to `ENOMEM`. The original block is left untouched.
    ///
    /// # Safety
    ///
    /// If the call succeeds, the old payload must not be accessed anymore unless the returned
    /// pointer equals `ptr`.
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> Result<Option<NonNull<u8>>, Error> {
        if size == 0 {
            self.release(ptr);
            return Ok(None);
        }
        let result = self.locked(|inner| inner.reallocate(ptr, size));
        warn_non_contiguous(&result);
        log::trace!("reallocate({ptr:p}, {size}) -> {result:?}");
        result.map(Some).map_err(errno::report)
    }

    /// Allocates room for `count` objects of `size` bytes each, filled with zeros.
    ///
    /// # Errors
    ///
    /// * [`Error::ZeroSize`] if `count` or `size` is zero.
    /// * [`Error::OutOfMemory`] if `count * size` overflows, or if the heap cannot grow; `errno`
    ///   is set to `ENOMEM`.
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Result<NonNull<u8>, Error> {
        let result = self.locked(|inner| inner.allocate_zeroed(count, size));
        warn_non_contiguous(&result);
        log::trace!("allocate_zeroed({count}, {size}) -> {result:?}");
        result.map_err(errno::report)
    }

    /// Returns memory usage information for this allocator.
    ///
    /// The computation visits every block, so this is a linear-time operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use firstfit::Config;
    /// use firstfit::Malloc;
    /// use firstfit::SliceHeap;
    /// use firstfit::Usage;
    /// use firstfit::HEADER_SIZE;
    ///
    /// let mut memory = [0u8; 4096];
    /// let config = Config::DEFAULT.with_growth_increment(1024);
    /// let malloc = Malloc::with_config(SliceHeap::from(&mut memory), config);
    ///
    /// assert_eq!(malloc.usage(), Usage::default());
    ///
    /// let _ = malloc.allocate(100);
    ///
    /// assert_eq!(
    ///     malloc.usage(),
    ///     Usage {
    ///         total: 1024,
    ///         used: 112,
    ///         free: 1024 - 112 - HEADER_SIZE,
    ///         overhead: HEADER_SIZE,
    ///         objects: 1,
    ///         blocks: 1,
    ///     }
    /// );
    /// ```
    #[inline]
    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage::get(&self.inner.lock().arena)
    }

    /// Bytes obtained from the heap so far.
    #[inline]
    #[must_use]
    pub fn frontier(&self) -> usize {
        self.inner.lock().arena.frontier()
    }

    /// Start of the arena, or `None` if nothing was allocated yet.
    #[inline]
    #[must_use]
    pub fn arena_start(&self) -> Option<NonNull<u8>> {
        self.inner.lock().arena.start()
    }

    /// Runs `f` with the allocator locked, then logs any growth of the arena.
    ///
    /// Records are emitted only after the lock is released, so a logger may allocate.
    fn locked<T>(&self, f: impl FnOnce(&mut MallocInner<H>) -> T) -> T {
        let mut inner = self.inner.lock();
        let before = inner.arena.frontier();
        let result = f(&mut inner);
        let after = inner.arena.frontier();
        let start = inner.arena.start();
        drop(inner);

        if after != before {
            match start {
                Some(start) if before == 0 => {
                    log::debug!("arena created at {start:p} with {after} bytes")
                }
                _ => log::debug!("arena grown by {} bytes to {after}", after - before),
            }
        }
        result
    }

    /// Calls `f` for every block in the directory, in address order.
    ///
    /// The allocator is locked while `f` runs: `f` must not call back into this allocator.
    pub fn for_each_block<F: FnMut(&BlockInfo)>(&self, mut f: F) {
        let inner = self.inner.lock();
        for block in inner.arena.blocks() {
            f(&BlockInfo::from(&block));
        }
    }
}

unsafe impl<H: Heap> GlobalAlloc for Malloc<H> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        self.allocate(layout.size())
            .map(NonNull::as_ptr)
            .unwrap_or_else(|_| core::ptr::null_mut())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        self.allocate_zeroed(1, layout.size())
            .map(NonNull::as_ptr)
            .unwrap_or_else(|_| core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.release(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGN {
            return core::ptr::null_mut();
        }
        match self.reallocate(ptr, new_size) {
            Ok(Some(new_ptr)) => new_ptr.as_ptr(),
            Ok(None) | Err(_) => core::ptr::null_mut(),
        }
    }
}

#[cfg(feature = "allocator-api")]
impl<H: Heap> Malloc<H> {
    #[inline]
    fn dangling(layout: Layout) -> NonNull<[u8]> {
        // SAFETY: `Layout` guarantees that `align` is non-zero
        let dangling = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
        NonNull::slice_from_raw_parts(dangling, 0)
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        if old_layout.size() == 0 {
            // `ptr` is dangling and has no block
            return Allocator::allocate(self, new_layout);
        }
        if new_layout.align() > ALIGN {
            return Err(AllocError);
        }
        match self.reallocate(ptr.as_ptr(), new_layout.size()) {
            Ok(Some(new_ptr)) => Ok(NonNull::slice_from_raw_parts(new_ptr, new_layout.size())),
            Ok(None) => Ok(Self::dangling(new_layout)),
            Err(_) => Err(AllocError),
        }
    }
}

#[cfg(feature = "allocator-api")]
unsafe impl<H: Heap> Allocator for Malloc<H> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(Self::dangling(layout));
        }
        if layout.align() > ALIGN {
            return Err(AllocError);
        }
        Malloc::allocate(self, layout.size())
            .map(|ptr| NonNull::slice_from_raw_parts(ptr, layout.size()))
            .map_err(|_| AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.release(ptr.as_ptr())
        }
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(
            new_layout.size() >= old_layout.size(),
            "`new_layout` must be bigger than or equal to `old_layout`"
        );
        self.resize(ptr, old_layout, new_layout)
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(
            new_layout.size() <= old_layout.size(),
            "`new_layout` must be smaller than or equal to `old_layout`"
        );
        self.resize(ptr, old_layout, new_layout)
    }
}

#[inline]
fn warn_non_contiguous<T>(result: &Result<T, Error>) {
    if let Err(Error::NonContiguous) = result {
        log::warn!("heap grew non-contiguously; arena not extended");
    }
}

/// What happened to a pointer passed to [`MallocInner::release`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Released {
    Block,
    AlreadyFree,
    Foreign,
}

#[derive(Debug)]
struct MallocInner<H: Heap> {
    arena: Arena,
    heap: H,
    config: Config,
}

impl<H: Heap> MallocInner<H> {
    fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        let size = align(size).ok_or(Error::OutOfMemory)?;

        let block = match self.arena.find_free(size) {
            Placement::Empty => self.arena.init(&mut self.heap, &self.config, size)?,
            Placement::Found(mut block) => {
                self.arena.split(&mut block, size);
                block.set_in_use(true);
                block.write();
                block
            }
            Placement::NotFound { last } => {
                self.arena
                    .append(&mut self.heap, &self.config, last, size)?
            }
        };

        debug_assert!(block.size() >= size, "allocation returned fewer bytes than requested");
        debug_assert!(
            block.payload().align_offset(ALIGN) == 0,
            "allocation returned data with wrong alignment"
        );

        Ok(block.payload())
    }

    fn release(&mut self, payload: PayloadPtr) -> Released {
        match self.arena.validate(payload) {
            Some(block) if block.is_in_use() => {
                self.release_block(block);
                Released::Block
            }
            Some(_) => Released::AlreadyFree,
            None => Released::Foreign,
        }
    }

    fn release_block(&mut self, mut block: Block) {
        block.set_in_use(false);
        block.write();

        if let Some(mut prev) = block.free_prev() {
            self.arena.merge(&mut prev, block);
            block = prev;
        }
        if let Some(next) = block.free_next() {
            self.arena.merge(&mut block, next);
        }
    }

    fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, Error> {
        debug_assert_ne!(size, 0, "zero-sized reallocation is a release");
        let Some(payload) = PayloadPtr::from_raw(ptr) else {
            return self.allocate(size);
        };

        let mut block = match self.arena.validate(payload) {
            Some(block) if block.is_in_use() => block,
            _ => return Err(Error::InvalidPointer),
        };
        let new_size = align(size).ok_or(Error::OutOfMemory)?;

        if new_size <= block.size() {
            self.arena.split(&mut block, new_size);
            return Ok(block.payload());
        }

        if block.next_offset().is_none() {
            return self.grow_last(block, new_size);
        }

        if let Some(new_ptr) = self.grow_into_neighbours(block, new_size) {
            return Ok(new_ptr);
        }

        self.relocate(block, new_size)
    }

    /// Grows the last block in place, extending the heap if the new end is past the frontier.
    fn grow_last(&mut self, mut block: Block, new_size: usize) -> Result<NonNull<u8>, Error> {
        let end = block
            .offset()
            .checked_add(HEADER_SIZE)
            .and_then(|payload| payload.checked_add(new_size))
            .ok_or(Error::OutOfMemory)?;

        if end > self.arena.frontier() {
            let amount = self
                .config
                .growth_for(new_size)
                .ok_or(Error::OutOfMemory)?;
            self.arena.extend(&mut self.heap, amount)?;
        }

        block.set_size(new_size);
        block.write();
        Ok(block.payload())
    }

    /// Grows an interior block by absorbing its free neighbours.
    ///
    /// Tried in order: previous alone, next alone, both. Returns `None` (and changes nothing) if
    /// none of them gives enough room.
    fn grow_into_neighbours(&mut self, mut block: Block, new_size: usize) -> Option<NonNull<u8>> {
        let old_size = block.size();
        let old_payload = block.payload();
        let fits = |extra: usize| old_size + extra >= new_size;

        let prev = block.free_prev();
        let next = block.free_next();

        if let Some(mut prev) = prev.filter(|prev| fits(HEADER_SIZE + prev.size())) {
            self.arena.merge(&mut prev, block);
            return Some(self.settle_moved(prev, old_payload, old_size, new_size));
        }

        if let Some(next) = next.filter(|next| fits(HEADER_SIZE + next.size())) {
            self.arena.merge(&mut block, next);
            self.arena.split(&mut block, new_size);
            return Some(block.payload());
        }

        if let (Some(mut prev), Some(next)) = (prev, next) {
            if fits(2 * HEADER_SIZE + prev.size() + next.size()) {
                self.arena.merge(&mut prev, block);
                if let Some(next) = prev.free_next() {
                    self.arena.merge(&mut prev, next);
                }
                return Some(self.settle_moved(prev, old_payload, old_size, new_size));
            }
        }

        None
    }

    /// Marks a block that absorbed an in-use block as in use, moves the payload of the absorbed
    /// block to its start, and trims it to `new_size`.
    fn settle_moved(
        &mut self,
        mut block: Block,
        old_payload: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> NonNull<u8> {
        block.set_in_use(true);
        block.write();
        // SAFETY: both ranges lie within `block`; they may overlap
        unsafe { core::ptr::copy(old_payload.as_ptr(), block.payload().as_ptr(), old_size) };
        self.arena.split(&mut block, new_size);
        block.payload()
    }

    /// Moves the payload of `block` to a newly allocated block of `new_size` bytes.
    fn relocate(&mut self, block: Block, new_size: usize) -> Result<NonNull<u8>, Error> {
        let old_payload = block.payload();
        let new_payload = self.allocate(new_size)?;
        // SAFETY: the new block is distinct from `block`, and at least as large
        unsafe {
            core::ptr::copy_nonoverlapping(
                old_payload.as_ptr(),
                new_payload.as_ptr(),
                block.size(),
            )
        };
        let released = self.release(PayloadPtr::new(old_payload));
        debug_assert_eq!(released, Released::Block, "relocated block was not in use");
        Ok(new_payload)
    }

    fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, Error> {
        if count == 0 || size == 0 {
            return Err(Error::ZeroSize);
        }
        let total = count.checked_mul(size).ok_or(Error::OutOfMemory)?;
        let aligned = align(total).ok_or(Error::OutOfMemory)?;
        let ptr = self.allocate(aligned)?;
        // SAFETY: the payload is at least `aligned` bytes long
        unsafe { ptr.as_ptr().write_bytes(0, aligned) };
        Ok(ptr)
    }
}
