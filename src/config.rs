// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::block::BlockHeaderRepr;

macro_rules! const_assert {
    ( $( $tt:tt )* ) => {
        const _: () = assert!($($tt)*);
    }
}

/// Alignment of every payload size and address returned by the allocator.
pub const ALIGN: usize = 16;

/// Bytes of bookkeeping that precede every payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeaderRepr>();

/// Smallest block (header plus minimum payload) that can be carved off by a split.
pub const MIN_BLOCK: usize = HEADER_SIZE + ALIGN;

const_assert!(ALIGN.is_power_of_two());
const_assert!(HEADER_SIZE % ALIGN == 0);
const_assert!(align_of::<BlockHeaderRepr>() <= ALIGN);

/// Rounds `size` up to the next multiple of [`ALIGN`].
///
/// Returns `None` on overflow. Note that `align(0)` is `Some(0)`; callers reject zero-sized
/// requests before aligning.
#[inline]
#[must_use]
pub const fn align(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(ALIGN)
}

/// Tunables for a [`Malloc`](crate::Malloc) instance.
///
/// # Examples
///
/// ```
/// use firstfit::Config;
///
/// let config = Config::DEFAULT.with_growth_increment(4000);
/// assert_eq!(config.growth_increment(), 4000);
///
/// // increments are rounded up to the alignment
/// let config = Config::DEFAULT.with_growth_increment(4001);
/// assert_eq!(config.growth_increment(), 4016);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Config {
    growth_increment: usize,
}

impl Config {
    /// Growth increment used when none is configured: room for 64,000 minimum-sized blocks.
    pub const DEFAULT_GROWTH_INCREMENT: usize = (ALIGN + HEADER_SIZE) * 64_000;

    /// The default configuration.
    pub const DEFAULT: Self = Self {
        growth_increment: Self::DEFAULT_GROWTH_INCREMENT,
    };

    /// Sets the number of bytes requested from the heap each time the arena runs out of space.
    ///
    /// Requests that need more than this amount are satisfied with an exact-fit growth instead.
    /// The value is rounded up to a multiple of [`ALIGN`], and to at least [`MIN_BLOCK`].
    #[inline]
    #[must_use]
    pub const fn with_growth_increment(self, increment: usize) -> Self {
        let increment = if increment < MIN_BLOCK {
            MIN_BLOCK
        } else {
            match align(increment) {
                Some(aligned) => aligned,
                None => usize::MAX - (ALIGN - 1),
            }
        };
        Self {
            growth_increment: increment,
        }
    }

    /// Number of bytes requested from the heap per ordinary growth.
    #[inline]
    #[must_use]
    pub const fn growth_increment(&self) -> usize {
        self.growth_increment
    }

    /// Number of bytes to request from the heap in order to host `size` more payload bytes.
    #[inline]
    #[must_use]
    pub(crate) const fn growth_for(&self, size: usize) -> Option<usize> {
        match size.checked_add(HEADER_SIZE) {
            Some(exact) if exact > self.growth_increment => Some(exact),
            Some(_) => Some(self.growth_increment),
            None => None,
        }
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}
