// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use core::fmt;

/// Reasons why an allocator operation did not produce a pointer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Error {
    /// A zero-byte allocation was requested. No payload is ever handed out for those.
    ZeroSize,
    /// The pointer was not returned by this allocator, or its block no longer exists.
    InvalidPointer,
    /// The heap refused to grow, or the request does not fit in the address space.
    OutOfMemory,
    /// The heap grew, but not contiguously with the arena.
    NonContiguous,
}

impl Error {
    /// Returns `true` for the errors that set the out-of-memory indicator (`errno = ENOMEM`).
    #[inline]
    #[must_use]
    pub const fn is_out_of_memory(self) -> bool {
        matches!(self, Self::OutOfMemory | Self::NonContiguous)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ZeroSize => "zero-sized allocation",
            Self::InvalidPointer => "pointer does not belong to the arena",
            Self::OutOfMemory => "out of memory",
            Self::NonContiguous => "heap grew non-contiguously",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
