// Copyright © 2024 The thimble contributors
// SPDX-License-Identifier: BSD-3-Clause

//! Wrappers for lazy-initialization of the Thimble allocator.
//!
//! See [`LazyThimble`] for information and examples.

use crate::Thimble;
use core::alloc::GlobalAlloc;
use core::alloc::Layout;
use core::ops::Deref;
use spin::Lazy;

#[cfg(feature = "allocator-api")]
use core::alloc::AllocError;
#[cfg(feature = "allocator-api")]
use core::alloc::Allocator;
#[cfg(feature = "allocator-api")]
use core::ptr::NonNull;

/// Lazy-initialized version of [`Thimble`].
///
/// This allows constructing a [`Thimble`] allocator *lazily*, which means:
/// the allocator is not constructed when `LazyThimble` is constructed, but
/// when `LazyThimble` is first accessed.
///
/// `LazyThimble` implements [`GlobalAlloc`] and [`Allocator`], so it can be
/// used in all places where `Thimble` would be accepted.
///
/// The main purpose of `LazyThimble` is to be used in `static` items. This
/// is particularly useful when you want to use the Thimble allocator as a
/// [global
/// allocator](https://doc.rust-lang.org/stable/std/alloc/index.html#the-global_allocator-attribute).
///
/// # Examples
///
/// ```no_run
/// # #![allow(static_mut_refs)]
/// use thimble::lazy::LazyThimble;
/// use thimble::Thimble;
///
/// #[global_allocator]
/// static HEAP: LazyThimble = LazyThimble::new(|| {
///     static mut MEMORY: [u8; 8192] = [0u8; 8192];
///     // SAFETY: This closure is called only once, therefore `MEMORY` is
///     // entirely owned by this `Thimble`, and no other reference can be
///     // created.
///     Thimble::from(unsafe { &mut MEMORY })
/// });
///
/// // Use the `GlobalAlloc` trait on `LazyThimble`. If this is the first
/// // time `HEAP` is used, the underlying `Thimble` will be initialized now.
/// use std::alloc::GlobalAlloc;
/// use std::alloc::Layout;
/// let _ = unsafe { HEAP.alloc(Layout::new::<u32>()) };
/// ```
#[derive(Debug)]
pub struct LazyThimble<F = fn() -> Thimble<'static>>(Lazy<Thimble<'static>, F>);

impl<F> LazyThimble<F> {
    /// Constructs a new [`LazyThimble`] from the given initialization
    /// function.
    ///
    /// The initialization function will be called when the `LazyThimble` is
    /// first used. "Used" here means either dereferencing, or using one of
    /// the implemented traits.
    #[inline]
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(Lazy::new(f))
    }
}

impl<F: FnOnce() -> Thimble<'static>> LazyThimble<F> {
    /// Returns a reference to the underlying `Thimble`.
    ///
    /// Calling this method is equivalent to dereferencing (`lazy.get()` is
    /// equivalent to `&*lazy`).
    ///
    /// This method can be used to ensure that the Thimble allocator is
    /// initialized.
    #[inline]
    pub fn get(&self) -> &Thimble<'static> {
        self
    }
}

impl<F: FnOnce() -> Thimble<'static>> Deref for LazyThimble<F> {
    type Target = Thimble<'static>;

    #[inline]
    fn deref(&self) -> &Thimble<'static> {
        &self.0
    }
}

#[cfg(feature = "allocator-api")]
unsafe impl<F: FnOnce() -> Thimble<'static>> Allocator for LazyThimble<F> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.get().allocate(layout)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.get().allocate_zeroed(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.get().deallocate(ptr, layout)
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        self.get().grow(ptr, old_layout, new_layout)
    }

    unsafe fn grow_zeroed(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        self.get().grow_zeroed(ptr, old_layout, new_layout)
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        self.get().shrink(ptr, old_layout, new_layout)
    }
}

unsafe impl<F: FnOnce() -> Thimble<'static>> GlobalAlloc for LazyThimble<F> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.get().alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.get().alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.get().dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.get().realloc(ptr, layout, new_size)
    }
}
