// Copyright © 2024 Andrea Corbellini and contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::arena::Arena;
use crate::config::HEADER_SIZE;

/// Memory usage information.
///
/// This structure is returned by [`Malloc::usage`](crate::Malloc::usage). See that method
/// documentation for information and examples.
#[derive(Default, Clone, PartialEq, Eq, Debug)]
pub struct Usage {
    /// Total memory obtained from the heap (the growth frontier).
    ///
    /// `total` always equals `used + free + overhead`.
    pub total: usize,
    /// Sum of the payload sizes of all the in-use blocks.
    pub used: usize,
    /// Sum of the payload sizes of all the free blocks, plus the slack between the last block and
    /// the frontier.
    ///
    /// Trying to allocate an object of size equal to (or close to) `free` may not succeed, due to
    /// header overhead and fragmentation.
    pub free: usize,
    /// Memory taken by block headers.
    pub overhead: usize,
    /// Number of in-use blocks.
    pub objects: usize,
    /// Number of blocks in the directory, both in use and free.
    pub blocks: usize,
}

impl Usage {
    pub(crate) fn get(arena: &Arena) -> Self {
        let mut usage = Self {
            total: arena.frontier(),
            free: arena.slack(),
            ..Self::default()
        };

        for block in arena.blocks() {
            usage.blocks += 1;
            usage.overhead += HEADER_SIZE;
            if block.is_in_use() {
                usage.used += block.size();
                usage.objects += 1;
            } else {
                usage.free += block.size();
            }
        }

        usage
    }
}
