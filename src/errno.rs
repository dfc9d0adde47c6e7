// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Process-visible error indicator, set the way `malloc(3)` does on failure.

use crate::error::Error;
use libc::c_int;

#[cfg(any(target_os = "linux", target_os = "emscripten", target_os = "redox"))]
#[inline]
fn location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
#[inline]
fn location() -> *mut c_int {
    unsafe { libc::__errno() }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
#[inline]
fn location() -> *mut c_int {
    unsafe { libc::__error() }
}

// No known errno on this target; the indicator is silently unavailable.
#[cfg(not(any(
    target_os = "linux",
    target_os = "emscripten",
    target_os = "redox",
    target_os = "android",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
#[inline]
fn location() -> *mut c_int {
    core::ptr::null_mut()
}

#[inline]
pub(crate) fn set(value: c_int) {
    let errno = location();
    if !errno.is_null() {
        // SAFETY: a non-null errno location is thread-local and valid for writes
        unsafe { errno.write(value) }
    }
}

#[cfg(test)]
pub(crate) fn get() -> c_int {
    let errno = location();
    if errno.is_null() {
        0
    } else {
        unsafe { errno.read() }
    }
}

/// Sets `errno = ENOMEM` if `err` is an out-of-memory condition, and passes `err` through.
#[inline]
pub(crate) fn report(err: Error) -> Error {
    if err.is_out_of_memory() {
        set(libc::ENOMEM);
    }
    err
}
