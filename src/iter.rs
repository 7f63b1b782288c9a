// Copyright © 2024 The thimble contributors
// SPDX-License-Identifier: BSD-3-Clause

use crate::cell::CELL_SIZE;
use crate::cell::HEADER_SIZE;
use crate::heap::Heap;
use core::ptr::NonNull;

#[derive(Copy, Clone, Debug)]
pub(crate) enum Chunk {
    Used(u16),
    Free(u16),
}

/// Walk over every non-sentinel cell in physical order.
#[derive(Clone, Debug)]
pub(crate) struct Chunks<'h, 'a> {
    heap: &'h Heap<'a>,
    index: u16,
}

impl<'h, 'a> Chunks<'h, 'a> {
    pub(crate) fn new(heap: &'h Heap<'a>) -> Self {
        Self {
            heap,
            index: heap.next(0),
        }
    }
}

impl<'h, 'a> Iterator for Chunks<'h, 'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        // Terminate on the index, not on the tail's size-0 convention.
        if self.index == self.heap.tail_index() {
            return None;
        }

        let index = self.index;
        self.index = self.heap.next(index);

        Some(if self.heap.is_free(index) {
            Chunk::Free(index)
        } else {
            Chunk::Used(index)
        })
    }
}

/// Iterator over the payload of every allocated block, in physical order.
///
/// Returned by [`Heap::used`]. Each item is the block's full payload span,
/// which may be larger than the size originally requested.
#[derive(Clone, Debug)]
pub struct UsedBlocks<'h, 'a> {
    chunks: Chunks<'h, 'a>,
}

impl<'h, 'a> UsedBlocks<'h, 'a> {
    pub(crate) fn new(heap: &'h Heap<'a>) -> Self {
        Self {
            chunks: Chunks::new(heap),
        }
    }
}

impl<'h, 'a> Iterator for UsedBlocks<'h, 'a> {
    type Item = NonNull<[u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.chunks.next()? {
                Chunk::Used(index) => {
                    let heap = self.chunks.heap;
                    let size = heap.size_in_cells(index) as usize * CELL_SIZE - HEADER_SIZE;
                    let data = heap.payload_ptr(index);
                    return Some(NonNull::slice_from_raw_parts(data, size));
                }
                Chunk::Free(_) => continue,
            }
        }
    }
}
