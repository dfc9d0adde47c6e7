// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! `malloc(3)` family with the C ABI.
//!
//! Linking a binary with the `ffi` feature enabled replaces the system allocator for the whole
//! process, C code included. All four functions share one static [`Malloc<Sbrk>`](Malloc), and
//! set `errno` to `ENOMEM` when they run out of memory.
//!
//! Only those four functions are replaced. `posix_memalign`, `aligned_alloc`, `memalign`,
//! `valloc` and `malloc_usable_size` still resolve to the system C library, and the pointers they
//! return are not known to this allocator: passing one to [`free`] or [`realloc`] is ignored
//! (`free` leaks it, `realloc` returns null). In particular, Rust's `std::alloc::System` uses
//! `posix_memalign` for layouts aligned to more than 16 bytes, so such allocations leak in a
//! process linked with this module.

use crate::heap::Sbrk;
use crate::Malloc;
use core::ffi::c_void;
use core::ptr;
use core::ptr::NonNull;
use libc::size_t;

static MALLOC: Malloc<Sbrk> = Malloc::new(Sbrk);

#[inline]
fn to_c(result: Result<NonNull<u8>, crate::Error>) -> *mut c_void {
    result.map_or(ptr::null_mut(), |ptr| ptr.as_ptr().cast())
}

/// Allocates `size` bytes. Returns null if `size` is zero or memory is exhausted.
///
/// # Safety
///
/// See `malloc(3)`.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    to_c(MALLOC.allocate(size))
}

/// Releases memory returned by [`malloc`], [`calloc`] or [`realloc`]. Null and unknown pointers
/// are ignored.
///
/// # Safety
///
/// See `free(3)`.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    MALLOC.release(ptr.cast())
}

/// Allocates `count * size` zeroed bytes. Returns null if either is zero, if the product
/// overflows, or if memory is exhausted.
///
/// # Safety
///
/// See `calloc(3)`.
#[no_mangle]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    to_c(MALLOC.allocate_zeroed(count, size))
}

/// Resizes the allocation at `ptr` to `size` bytes. A zero `size` releases `ptr` and returns
/// null; a null `ptr` behaves like [`malloc`].
///
/// # Safety
///
/// See `realloc(3)`.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    match MALLOC.reallocate(ptr.cast(), size) {
        Ok(Some(new_ptr)) => new_ptr.as_ptr().cast(),
        Ok(None) | Err(_) => ptr::null_mut(),
    }
}
