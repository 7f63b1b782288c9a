// Copyright © 2024 The thimble contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Thimble: a fixed-arena allocator for when the heap has to fit in a
//! thimble.
//!
//! Thimble is a first-fit memory allocator that manages a single contiguous
//! byte region supplied by you at construction time. It never talks to the
//! operating system, never grows, and keeps its entire bookkeeping inside
//! the region it manages: 4 bytes of header per allocated block, 8 bytes
//! per free run.
//!
//! This is a no-`std` and no-`alloc` crate aimed at embedded and other
//! resource-constrained environments where a full system allocator is
//! unavailable or undesirable.
//!
//! # Features
//!
//! * Fixed arena: all memory comes from a byte region you provide
//! * Small overhead: 4 bytes per allocated block, two 8-byte sentinels
//! * In-place shrinking and opportunistic coalescing on free
//! * Compatible with `no_std` environments
//! * Support for the nightly [`Allocator`](core::alloc::Allocator) API
//!
//! # Quick start & examples
//!
//! ## Initialization
//!
//! The allocator comes in two layers. [`Heap`] is the single-threaded core:
//! every operation takes `&mut self` and no locks are involved. [`Thimble`]
//! wraps a `Heap` behind a spin lock and implements the standard allocator
//! traits, for use as a [global allocator](core::alloc::GlobalAlloc) or
//! through the [Allocator API](core::alloc::Allocator).
//!
//! Either layer can be constructed from a byte slice, for example an array
//! on the stack:
//!
//! ```
//! use thimble::Heap;
//!
//! let mut memory = [0u8; 1024];
//! let mut heap = Heap::from_slice(&mut memory);
//!
//! let block = heap.allocate(100).expect("allocation failed");
//! let bigger = unsafe { heap.resize(Some(block), 200) }.expect("resize failed");
//! unsafe { heap.free(Some(bigger)) };
//! ```
//!
//! If all you have is an address, use one of [`Thimble::from_ptr`],
//! [`Thimble::from_ptr_size`], [`Thimble::from_addr_size`]:
//!
//! ```no_run
//! use thimble::Thimble;
//! # #[allow(unused_variables)]
//! let thimble = unsafe { Thimble::<'static>::from_addr_size(0x2000_0000, 8192) };
//! ```
//!
//! ## Using as a global allocator
//!
//! Because `#[global_allocator]` requires a `static` item, lazy
//! initialization is needed; the `lazy` cargo feature provides a
//! [`LazyThimble`](lazy::LazyThimble) wrapper for this:
//!
//! `Cargo.toml`:
//!
//! ```toml
//! thimble = { version = "0.1", features = ["lazy"] }
//! ```
//!
//! `main.rs`:
//!
//! ```no_run
//! # #[allow(static_mut_refs)]
//! # #[cfg(feature = "lazy")]
//! # {
//! use thimble::lazy::LazyThimble;
//! use thimble::Thimble;
//!
//! #[global_allocator]
//! static HEAP: LazyThimble = LazyThimble::new(|| {
//!     static mut MEMORY: [u8; 8192] = [0u8; 8192];
//!     // SAFETY: This closure is called only once, therefore `MEMORY` is
//!     // entirely owned by this `Thimble`, and no other reference can be
//!     // created.
//!     Thimble::from(unsafe { &mut MEMORY })
//! });
//! # }
//! ```
//!
//! Note the alignment limit below before doing this: a program whose
//! allocations need alignment above 4 will see those allocations fail.
//!
//! ## Using via the Allocator API
//!
//! With the `allocator-api` cargo feature (nightly compiler only),
//! [`Thimble`] can be passed to the "`new_in`" methods of container types:
//!
//! ```ignore
//! #![feature(allocator_api)]
//!
//! # #[cfg(feature = "allocator-api")]
//! # {
//! use thimble::Thimble;
//!
//! let mut memory = [0u8; 1024];
//! let thimble = Thimble::from(&mut memory);
//!
//! let mut vec = Vec::<i32, _>::new_in(&thimble);
//! vec.push(1);
//! vec.push(2);
//! vec.push(3);
//! # }
//! ```
//!
//! # Allocator limits
//!
//! * **Granularity:** the arena is divided into 8-byte cells and every
//!   block occupies a whole number of cells. A 1-byte allocation takes one
//!   cell; allocation sizes are effectively rounded up to `8k − 4` bytes.
//! * **Alignment:** payload pointers are aligned to 4, never more.
//!   Requests with stronger alignment requirements are refused at the
//!   [`GlobalAlloc`]/[`Allocator`](core::alloc::Allocator) boundary.
//! * **Arena size:** at most 32768 cells (256 KiB). Anything beyond that
//!   limit is left unused.
//! * **Minimum arena:** 4 cells (32 bytes).
//!
//! # Internal details
//!
//! The arena is an array of 8-byte cells threaded by two intrusive
//! doubly-linked lists: a *physical* list visiting every block in address
//! order, and a *free* list visiting only the free runs. Both are encoded
//! with 16-bit cell indices, and the free flag lives in the high bit of the
//! physical back-link, so a free run's full header is just 8 bytes and a
//! used block's only 4.
//!
//! Allocation is first-fit over the free list. Freeing coalesces with
//! adjacent free runs immediately, so no two free runs are ever adjacent
//! and fragmentation stays local. Resizing shrinks in place, preferring to
//! donate the surplus to a free neighbor, and grows by moving to a fresh
//! first-fit run.
//!
//! # Cargo feature flags
//!
//! * `allocator-api`: enables the implementation of the
//!   [`core::alloc::Allocator`] trait (requires a nightly compiler).
//! * `lazy`: enables the [`LazyThimble`](lazy::LazyThimble) type.

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

mod cell;
mod heap;
mod iter;
mod usage;


#[cfg(feature = "lazy")]
pub mod lazy;

use crate::cell::PAYLOAD_ALIGN;
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::ptr::NonNull;
use spin::Mutex;

#[cfg(feature = "allocator-api")]
use core::alloc::AllocError;
#[cfg(feature = "allocator-api")]
use core::alloc::Allocator;

pub use crate::heap::Dump;
pub use crate::heap::Heap;
pub use crate::iter::UsedBlocks;
pub use crate::usage::Usage;

/// The allocate / resize / free capability.
///
/// Code that only needs the raw allocation triad can depend on this trait
/// instead of a concrete allocator; [`Heap`] is the arena-backed
/// implementation provided by this crate.
pub trait RawAlloc {
    /// Allocates a block of at least `size` bytes.
    ///
    /// Returns `None` when `size` is 0 or when the request cannot be
    /// satisfied. A failed allocation leaves the allocator unchanged.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Resizes the block at `ptr` to at least `new_size` bytes, moving it if
    /// necessary.
    ///
    /// `resize(None, n)` behaves like `allocate(n)`; `resize(ptr, 0)`
    /// behaves like `free(ptr)` and returns `None`. A failed resize returns
    /// `None` and leaves the block and its contents untouched.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by this allocator and not
    /// freed since.
    unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>>;

    /// Frees the block at `ptr`. Does nothing when `ptr` is `None`.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by this allocator and not
    /// freed since.
    unsafe fn free(&mut self, ptr: Option<NonNull<u8>>);
}

/// The Thimble allocator.
///
/// `Thimble` is a [`Heap`] behind a spin lock, giving the single-threaded
/// core the external serialization it needs to back the [`GlobalAlloc`] and
/// [`Allocator`](core::alloc::Allocator) traits.
///
/// It can be constructed from either a pointer (unsafe) or a slice. See the
/// [module-level documentation](crate#quick-start--examples) for details
/// and examples.
#[derive(Debug)]
pub struct Thimble<'a> {
    inner: Mutex<Heap<'a>>,
}

impl<'a> Thimble<'a> {
    /// Constructs a Thimble allocator from a slice.
    ///
    /// # Panics
    ///
    /// If the slice holds fewer than 4 cells (32 bytes) after alignment.
    ///
    /// # Examples
    ///
    /// ```
    /// use thimble::Thimble;
    ///
    /// let mut memory = [0u8; 1024];
    /// # #[allow(unused_variables)]
    /// let thimble = Thimble::from_slice(&mut memory);
    /// ```
    #[inline]
    #[must_use]
    pub fn from_slice(slice: &'a mut [u8]) -> Self {
        Self {
            inner: Mutex::new(Heap::from_slice(slice)),
        }
    }

    /// Constructs a Thimble allocator from a slice pointer.
    ///
    /// The pointer must be valid for both reads and writes, and must be
    /// alive for the lifetime of `'a`. Note that because there's no
    /// connection between the pointer and the lifetime `'a`, you must ensure
    /// that the pointer lives long enough; you cannot rely on the compiler
    /// to check that for you.
    ///
    /// # Panics
    ///
    /// If `ptr` is a null pointer, or if the region holds fewer than 4
    /// cells (32 bytes) after alignment.
    ///
    /// # Safety
    ///
    /// - `ptr` must be
    ///   ["dereferenceable"](https://doc.rust-lang.org/stable/std/ptr/index.html#safety).
    /// - `ptr` must be alive for the lifetime of `'a`.
    /// - `ptr` must not be an
    ///   [*alias*](https://doc.rust-lang.org/nomicon/aliasing.html) for
    ///   another reference or pointer (in other words, `ptr` is a *unique*
    ///   pointer).
    #[inline]
    #[must_use]
    pub unsafe fn from_ptr(ptr: *mut [u8]) -> Self {
        Self::from_ptr_size(ptr.cast(), ptr.len())
    }

    /// Constructs a Thimble allocator from a pointer and a size.
    ///
    /// The pointer must be valid for both reads and writes, and must be
    /// alive for the lifetime of `'a`. Note that because there's no
    /// connection between the pointer and the lifetime `'a`, you must ensure
    /// that the pointer lives long enough; you cannot rely on the compiler
    /// to check that for you.
    ///
    /// # Panics
    ///
    /// If `ptr` is a null pointer, or if the region holds fewer than 4
    /// cells (32 bytes) after alignment.
    ///
    /// # Safety
    ///
    /// - `ptr` must be
    ///   ["dereferenceable"](https://doc.rust-lang.org/stable/std/ptr/index.html#safety).
    /// - `ptr` must be alive for the lifetime of `'a`.
    /// - `ptr` must not be an
    ///   [*alias*](https://doc.rust-lang.org/nomicon/aliasing.html) for
    ///   another reference or pointer (in other words, `ptr` is a *unique*
    ///   pointer).
    #[inline]
    #[must_use]
    pub unsafe fn from_ptr_size(ptr: *mut u8, size: usize) -> Self {
        let ptr = NonNull::new(ptr).expect("expected non-null pointer");
        let slice = NonNull::slice_from_raw_parts(ptr, size);
        Self {
            inner: Mutex::new(Heap::new(slice)),
        }
    }

    /// Constructs a Thimble allocator from an address and a size.
    ///
    /// The memory pointed by address must be valid for both reads and
    /// writes, and must be alive for the lifetime of `'a`.
    ///
    /// # Panics
    ///
    /// If `addr` is 0, or if the region holds fewer than 4 cells (32 bytes)
    /// after alignment.
    ///
    /// # Safety
    ///
    /// - the memory pointed by `addr` must be
    ///   ["dereferenceable"](https://doc.rust-lang.org/stable/std/ptr/index.html#safety).
    /// - the memory pointed by `addr` must be alive for the lifetime of
    ///   `'a`.
    /// - the memory pointed by `addr` must not be an
    ///   [*alias*](https://doc.rust-lang.org/nomicon/aliasing.html) for
    ///   another reference or address (in other words, `addr` is a *unique*
    ///   address).
    #[inline]
    #[must_use]
    pub unsafe fn from_addr_size(addr: usize, size: usize) -> Self {
        Self::from_ptr_size(addr as *mut u8, size)
    }

    /// Resets the allocator to its initial state.
    ///
    /// All outstanding allocations are discarded; any pointer obtained
    /// earlier is invalid after this call.
    #[inline]
    pub fn init(&self) {
        self.inner.lock().init()
    }

    /// Returns memory usage information for this allocator.
    ///
    /// The usage computation walks all blocks, so this is a linear-time
    /// operation (`O(n)` in the number of blocks), not a constant-time one.
    ///
    /// # Examples
    ///
    /// ```
    /// use thimble::Thimble;
    ///
    /// let mut memory = [0u8; 1024];
    /// let thimble = Thimble::from(&mut memory);
    ///
    /// let usage = thimble.usage();
    /// assert_eq!(usage.used, 0);
    /// assert_eq!(usage.objects, 0);
    /// assert!(usage.free > 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.inner.lock().usage()
    }
}

impl<'a> From<&'a mut [u8]> for Thimble<'a> {
    #[inline]
    fn from(slice: &'a mut [u8]) -> Self {
        Self::from_slice(slice)
    }
}

impl<'a, const N: usize> From<&'a mut [u8; N]> for Thimble<'a> {
    #[inline]
    fn from(array: &'a mut [u8; N]) -> Self {
        Self::from(array.as_mut_slice())
    }
}

#[cfg(feature = "allocator-api")]
unsafe impl<'a> Allocator for Thimble<'a> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.align() > PAYLOAD_ALIGN {
            return Err(AllocError);
        }

        if layout.size() == 0 {
            // SAFETY: `Layout` guarantees that `align` is non-zero
            let dangling = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }

        let mut heap = self.inner.lock();
        let data = heap.allocate(layout.size()).ok_or(AllocError)?;
        // SAFETY: `data` was just returned by `allocate` on this heap.
        let size = unsafe { heap.capacity_of(data) };
        debug_assert!(
            size >= layout.size(),
            "allocation returned fewer bytes than requested"
        );
        Ok(NonNull::slice_from_raw_parts(data, size))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            // `ptr` is a dangling pointer previously returned by
            // `allocate()`; it doesn't have a corresponding block
            return;
        }
        self.inner.lock().free(Some(ptr))
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
        self.resize_impl(ptr, old_layout, new_layout)
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
        self.resize_impl(ptr, old_layout, new_layout)
    }
}

#[cfg(feature = "allocator-api")]
impl<'a> Thimble<'a> {
    unsafe fn resize_impl(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        if new_layout.align() > PAYLOAD_ALIGN {
            return Err(AllocError);
        }

        if old_layout.size() == 0 || new_layout.size() == 0 {
            // If `old_layout` is zero-sized, then `ptr` is a dangling
            // pointer without a corresponding block. If `new_layout` is
            // zero-sized, then we need to return a dangling pointer. Either
            // way the boundary operations handle it.
            self.deallocate(ptr, old_layout);
            return self.allocate(new_layout);
        }

        let mut heap = self.inner.lock();
        let data = heap.resize(Some(ptr), new_layout.size()).ok_or(AllocError)?;
        let size = heap.capacity_of(data);
        Ok(NonNull::slice_from_raw_parts(data, size))
    }
}

unsafe impl<'a> GlobalAlloc for Thimble<'a> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            return core::ptr::null_mut();
        }
        self.inner
            .lock()
            .allocate(layout.size())
            .map(NonNull::as_ptr)
            .unwrap_or_else(core::ptr::null_mut)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.inner.lock().free(NonNull::new(ptr))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > PAYLOAD_ALIGN {
            return core::ptr::null_mut();
        }
        self.inner
            .lock()
            .resize(NonNull::new(ptr), new_size)
            .map(NonNull::as_ptr)
            .unwrap_or_else(core::ptr::null_mut)
    }
}
