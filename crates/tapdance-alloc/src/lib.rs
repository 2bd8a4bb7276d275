//! Allocator capability: an injectable indirection over raw memory allocation.
//!
//! A [`AllocatorCapability`] is a value, not global state — it is handed to a
//! custodian at construction time and inherited by every child scope. This
//! lets callers substitute instrumented allocators (bounded-pool,
//! fault-injecting) without touching the custodian itself.
//!
//! Failure is signalled by a null pointer, matching the C `malloc`/`realloc`
//! sentinel convention this crate is modeled on. No operation here can
//! suspend or panic.

use std::alloc::Layout;
use std::ptr;

/// Raw `allocate` entry point: returns null on failure.
///
/// # Safety
///
/// `ctx` must be a valid pointer for the lifetime of the capability, or
/// null if the implementation ignores it. `layout` must have non-zero size.
pub type AllocFn = unsafe fn(ctx: *mut (), layout: Layout) -> *mut u8;

/// Raw `release` entry point. Accepts a null `ptr` harmlessly.
///
/// # Safety
///
/// If non-null, `ptr` must have been returned by this same capability's
/// [`AllocFn`] (or [`ReallocFn`]) with the same `layout`.
pub type FreeFn = unsafe fn(ctx: *mut (), ptr: *mut u8, layout: Layout);

/// Raw `resize` entry point. Semantics match the C `realloc` contract:
/// existing contents are preserved up to `min(old_layout.size(), new_size)`.
/// Returns null on failure, leaving `ptr` untouched.
///
/// # Safety
///
/// `ptr` must have been returned by this same capability with `old_layout`,
/// and `new_size` must be non-zero.
pub type ReallocFn =
    unsafe fn(ctx: *mut (), ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8;

/// An allocator capability: three function pointers plus an opaque context.
///
/// The capability does not own its context; the caller manages that
/// lifecycle. Cloning a capability is cheap and intentional — every child
/// custodian scope inherits its parent's capability by value.
#[derive(Clone, Copy)]
pub struct AllocatorCapability {
    alloc: AllocFn,
    free: FreeFn,
    realloc: ReallocFn,
    ctx: *mut (),
}

impl AllocatorCapability {
    /// Builds a capability from raw function pointers and an opaque context.
    pub fn new(alloc: AllocFn, free: FreeFn, realloc: ReallocFn, ctx: *mut ()) -> Self {
        Self {
            alloc,
            free,
            realloc,
            ctx,
        }
    }

    /// The default capability: wraps the process-global heap and ignores
    /// the context.
    pub fn system() -> Self {
        Self::new(system_alloc, system_free, system_realloc, ptr::null_mut())
    }

    /// Allocates `layout.size()` bytes. Returns null on failure.
    #[must_use]
    pub fn allocate(&self, layout: Layout) -> *mut u8 {
        // SAFETY: `layout` is caller-provided and non-zero-sized by
        // contract; `self.ctx` is whatever this capability was built with.
        unsafe { (self.alloc)(self.ctx, layout) }
    }

    /// Releases a region previously returned by [`Self::allocate`] or
    /// [`Self::resize`]. Accepts a null `ptr` harmlessly.
    pub fn release(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: caller guarantees `ptr`/`layout` match a prior allocation
        // from this capability, per this function's own contract.
        unsafe { (self.free)(self.ctx, ptr, layout) }
    }

    /// Resizes a region in place or relocates it, preserving contents up to
    /// `min(old_layout.size(), new_size)`. Returns null on failure.
    #[must_use]
    pub fn resize(&self, ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr`/`old_layout` match a prior
        // allocation from this capability.
        unsafe { (self.realloc)(self.ctx, ptr, old_layout, new_size) }
    }
}

unsafe fn system_alloc(_ctx: *mut (), layout: Layout) -> *mut u8 {
    // SAFETY: `layout` is non-zero-sized by the `AllocFn` contract.
    unsafe { std::alloc::alloc(layout) }
}

unsafe fn system_free(_ctx: *mut (), ptr: *mut u8, layout: Layout) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was allocated with `layout` by `system_alloc`/
    // `system_realloc`, per this function's contract.
    unsafe { std::alloc::dealloc(ptr, layout) }
}

unsafe fn system_realloc(_ctx: *mut (), ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8 {
    // SAFETY: `ptr`/`old_layout` match a prior allocation, per contract;
    // `new_size` is non-zero, per contract.
    unsafe { std::alloc::realloc(ptr, old_layout, new_size) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocate_and_release_roundtrip() {
        let cap = AllocatorCapability::system();
        let layout = Layout::from_size_align(64, 8).unwrap();
        let p = cap.allocate(layout);
        assert!(!p.is_null());
        // SAFETY: just-allocated region of the given layout.
        unsafe { ptr::write_bytes(p, 0xAB, 64) };
        cap.release(p, layout);
    }

    #[test]
    fn system_release_of_null_is_noop() {
        let cap = AllocatorCapability::system();
        let layout = Layout::from_size_align(8, 8).unwrap();
        cap.release(ptr::null_mut(), layout);
    }

    #[test]
    fn system_resize_preserves_contents() {
        let cap = AllocatorCapability::system();
        let small = Layout::from_size_align(16, 8).unwrap();
        let p = cap.allocate(small);
        assert!(!p.is_null());
        // SAFETY: `p` is a freshly allocated 16-byte region.
        unsafe { ptr::write_bytes(p, 0x42, 16) };

        let grown = cap.resize(p, small, 64);
        assert!(!grown.is_null());
        // SAFETY: `grown` is the (possibly relocated) 64-byte region;
        // the first 16 bytes must still hold the original pattern.
        let bytes = unsafe { std::slice::from_raw_parts(grown, 16) };
        assert!(bytes.iter().all(|&b| b == 0x42));

        let big = Layout::from_size_align(64, 8).unwrap();
        cap.release(grown, big);
    }
}
