// Copyright © 2024 The thimble contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::cell::CELL_SIZE;
use crate::cell::HEADER_SIZE;
use crate::heap::Heap;
use crate::iter::Chunk;
use crate::iter::Chunks;

/// Memory usage information.
///
/// This structure is returned by [`Heap::usage`] and
/// [`Thimble::usage`](crate::Thimble::usage). See those methods for
/// information and examples.
#[derive(Default, Copy, Clone, PartialEq, Eq, Debug)]
pub struct Usage {
    /// Total memory managed by the allocator, in bytes.
    ///
    /// This counts every cell, including the two sentinel cells, so `total`
    /// never equals `used + free`: the difference is the space taken by
    /// headers and sentinels.
    pub total: usize,
    /// Total payload capacity of allocated blocks, in bytes.
    ///
    /// Each block contributes its full capacity, which may be more than the
    /// size that was requested for it.
    pub used: usize,
    /// Total span of free runs, in bytes.
    ///
    /// Note that trying to allocate an object of size equal to (or close to)
    /// `free` may not succeed, due to header overhead and fragmentation.
    pub free: usize,
    /// Number of blocks currently allocated.
    ///
    /// Allocating increments this number; freeing decrements it; resizing
    /// does not alter it.
    pub objects: usize,
}

impl Usage {
    pub(crate) fn get(heap: &Heap<'_>) -> Self {
        let mut usage = Self {
            total: heap.size(),
            used: 0,
            free: 0,
            objects: 0,
        };

        for chunk in Chunks::new(heap) {
            match chunk {
                Chunk::Used(index) => {
                    usage.used += heap.size_in_cells(index) as usize * CELL_SIZE - HEADER_SIZE;
                    usage.objects += 1;
                }
                Chunk::Free(index) => {
                    usage.free += heap.size_in_cells(index) as usize * CELL_SIZE;
                }
            }
        }

        usage
    }
}
