// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::config::HEADER_SIZE;
use core::fmt;
use core::ptr::NonNull;

/// Pointer to the start of a block header.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct HeaderPtr {
    header_ptr: NonNull<u8>,
}

impl HeaderPtr {
    #[inline]
    pub(crate) const fn new(header_ptr: NonNull<u8>) -> Self {
        Self { header_ptr }
    }

    #[inline]
    pub(crate) const fn as_nonnull(self) -> NonNull<u8> {
        self.header_ptr
    }

    /// Returns the payload that follows this header.
    ///
    /// # Safety
    ///
    /// The header must be part of an allocated object that extends at least `HEADER_SIZE` bytes
    /// past it.
    #[inline]
    pub(crate) unsafe fn to_payload_ptr(self) -> PayloadPtr {
        PayloadPtr::new(self.header_ptr.byte_add(HEADER_SIZE))
    }
}

impl fmt::Pointer for HeaderPtr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.header_ptr.fmt(f)
    }
}

impl fmt::Debug for HeaderPtr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeaderPtr({:p})", self)
    }
}

/// Pointer to a payload, as handed out to callers.
///
/// A `PayloadPtr` may come from anywhere: converting it to a [`HeaderPtr`] does not prove that a
/// block exists there. Only [`Arena::validate`](crate::arena::Arena::validate) does.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct PayloadPtr {
    data_ptr: NonNull<u8>,
}

impl PayloadPtr {
    #[inline]
    pub(crate) const fn new(data_ptr: NonNull<u8>) -> Self {
        Self { data_ptr }
    }

    #[inline]
    pub(crate) fn from_raw(data_ptr: *mut u8) -> Option<Self> {
        NonNull::new(data_ptr).map(Self::new)
    }

    #[inline]
    pub(crate) const fn as_nonnull(self) -> NonNull<u8> {
        self.data_ptr
    }

    /// Address where the header of this payload would be, if this payload belongs to a block.
    ///
    /// Returns `None` if the address would wrap around.
    #[inline]
    pub(crate) fn candidate_header_addr(self) -> Option<usize> {
        (self.data_ptr.as_ptr() as usize).checked_sub(HEADER_SIZE)
    }
}

impl fmt::Pointer for PayloadPtr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.data_ptr.fmt(f)
    }
}

impl fmt::Debug for PayloadPtr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadPtr({:p})", self)
    }
}
