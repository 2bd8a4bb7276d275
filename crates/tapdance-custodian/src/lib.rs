//! Custodian: a hierarchical, stack-ordered resource arena.
//!
//! A [`Custodian`] tracks every allocation, deferred cleanup, and child
//! scope pushed onto it, in a single LIFO stack per node. [`Custodian::shutdown`]
//! unwinds that stack in strict last-in-first-out order, recursing into any
//! child scopes it encounters along the way. Allocator exhaustion anywhere
//! under a node walks up to the root of the tree, shuts the whole tree down,
//! and terminates the process — there is no in-band error return from
//! [`Custodian::alloc`], [`Custodian::defer`], or [`Custodian::child_create`].
//!
//! Entries are tagged by an explicit discriminant field rather than stealing
//! bits from a pointer. That is a deliberate deviation from the reference
//! implementation's tagged-pointer trick: the trick is an optimization, not
//! part of the contract, and a plain discriminant is easier to justify as
//! safe in Rust.

use std::alloc::Layout;
use std::mem;
use std::ptr;

use tapdance_alloc::AllocatorCapability;

/// A cleanup callable invoked by [`Custodian::defer`] at shutdown time.
///
/// # Safety
///
/// The function must be safe to call with whatever `handle` was passed to
/// `defer`, including a null handle. It is trusted not to fault or unwind;
/// `Custodian::shutdown` does not guard against either.
pub type CleanupFn = unsafe fn(handle: *mut ());

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Allocation,
    DeferredResource,
    ChildScope,
}

/// Header prefixing every entry on a custodian's stack. Lives in the same
/// allocation as its payload, immediately before it in memory — the payload
/// pointer handed to callers (or recovered during shutdown) is always
/// `(header as *mut u8).add(payload_offset_for(header.kind))`.
#[repr(C)]
struct EntryHeader {
    /// Previous entry pushed onto the same node's stack, or null.
    prev: *mut EntryHeader,
    kind: EntryKind,
    /// Total size of the allocation backing this entry (header + payload),
    /// needed to reconstruct the `Layout` passed to `release`.
    total_size: usize,
}

#[repr(C)]
struct DeferredEntry {
    handle: *mut (),
    cleanup: Option<CleanupFn>,
}

const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

const fn const_max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

const HEADER_SIZE: usize = mem::size_of::<EntryHeader>();
const HEADER_ALIGN: usize = mem::align_of::<EntryHeader>();

const ALLOC_PAYLOAD_ALIGN: usize = mem::align_of::<usize>();
const ALLOC_PAYLOAD_OFFSET: usize = round_up(HEADER_SIZE, ALLOC_PAYLOAD_ALIGN);
const ALLOC_TOTAL_ALIGN: usize = const_max(HEADER_ALIGN, ALLOC_PAYLOAD_ALIGN);

const DEFERRED_PAYLOAD_ALIGN: usize = mem::align_of::<DeferredEntry>();
const DEFERRED_PAYLOAD_OFFSET: usize = round_up(HEADER_SIZE, DEFERRED_PAYLOAD_ALIGN);
const DEFERRED_TOTAL_ALIGN: usize = const_max(HEADER_ALIGN, DEFERRED_PAYLOAD_ALIGN);

const CHILD_PAYLOAD_ALIGN: usize = mem::align_of::<Custodian>();
const CHILD_PAYLOAD_OFFSET: usize = round_up(HEADER_SIZE, CHILD_PAYLOAD_ALIGN);
const CHILD_TOTAL_ALIGN: usize = const_max(HEADER_ALIGN, CHILD_PAYLOAD_ALIGN);

fn payload_offset_for(kind: EntryKind) -> usize {
    match kind {
        EntryKind::Allocation => ALLOC_PAYLOAD_OFFSET,
        EntryKind::DeferredResource => DEFERRED_PAYLOAD_OFFSET,
        EntryKind::ChildScope => CHILD_PAYLOAD_OFFSET,
    }
}

fn total_align_for(kind: EntryKind) -> usize {
    match kind {
        EntryKind::Allocation => ALLOC_TOTAL_ALIGN,
        EntryKind::DeferredResource => DEFERRED_TOTAL_ALIGN,
        EntryKind::ChildScope => CHILD_TOTAL_ALIGN,
    }
}

fn layout_for(kind: EntryKind, total_size: usize) -> Layout {
    Layout::from_size_align(total_size, total_align_for(kind))
        .expect("entry layout overflows isize::MAX")
}

/// A scoped resource arena. Every allocation, deferred cleanup, and child
/// scope created through a node is released, in strict LIFO order, when
/// [`Custodian::shutdown`] runs.
///
/// # Invariants
///
/// - `parent` links form a forest: a node with a null parent is a root, and
///   following `parent` pointers from any node always reaches a root in
///   finitely many steps.
/// - Every entry on a node's stack was allocated through that node's own
///   [`AllocatorCapability`] and is released through the same capability.
/// - A custodian must not move in memory after any of its methods have been
///   called on it — [`Custodian::child_create`] and [`Custodian::abort`]
///   capture its address as a raw pointer that outlives the borrow checker's
///   view of it. The root custodian a test body receives satisfies this by
///   construction (the runner never moves it after handing out the
///   reference); child scopes satisfy it because they live inside an
///   allocation that is never relocated, only freed at shutdown.
pub struct Custodian {
    stack: *mut EntryHeader,
    alloc: AllocatorCapability,
    parent: *mut Custodian,
}

impl Custodian {
    /// Creates a fresh root node — no parent, empty stack. Pure
    /// construction; never fails.
    pub fn root(alloc: AllocatorCapability) -> Self {
        Self {
            stack: ptr::null_mut(),
            alloc,
            parent: ptr::null_mut(),
        }
    }

    /// Initializes a fresh node in already-allocated storage.
    ///
    /// # Safety
    ///
    /// `at` must point to valid, exclusively-owned, properly aligned
    /// storage for a `Custodian` and must not be read until after this call
    /// writes to it.
    unsafe fn init_in_place(at: *mut Custodian, parent: *mut Custodian, alloc: AllocatorCapability) {
        // SAFETY: forwarded from this function's own contract.
        unsafe {
            at.write(Custodian {
                stack: ptr::null_mut(),
                alloc,
                parent,
            });
        }
    }

    /// Allocates `size` caller-visible bytes, tracked by this node. The
    /// region is backed by a single allocation that also stores an entry
    /// header; this node exclusively owns it until shutdown.
    ///
    /// On allocator exhaustion, aborts the whole custodian tree (see
    /// [`Custodian::abort`]) and never returns.
    #[must_use]
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        let total_size = ALLOC_PAYLOAD_OFFSET + size;
        let layout = layout_for(EntryKind::Allocation, total_size);
        let raw = self.alloc.allocate(layout);
        if raw.is_null() {
            self.abort();
        }
        let header = raw as *mut EntryHeader;
        // SAFETY: `raw` is a fresh, exclusively-owned allocation of at
        // least `HEADER_SIZE` bytes, suitably aligned for `EntryHeader`.
        unsafe {
            header.write(EntryHeader {
                prev: self.stack,
                kind: EntryKind::Allocation,
                total_size,
            });
        }
        self.stack = header;
        // SAFETY: the payload region starts `ALLOC_PAYLOAD_OFFSET` bytes
        // into the same allocation and is at least `size` bytes long.
        unsafe { raw.add(ALLOC_PAYLOAD_OFFSET) }
    }

    /// Creates a child scope: a new node whose allocator is inherited from
    /// `self` and whose parent is `self`. The child is itself stored inline
    /// in a single allocation that also carries an entry header, so it
    /// participates in `self`'s stack as a `ChildScope` entry.
    ///
    /// On allocator exhaustion, aborts the whole custodian tree and never
    /// returns.
    #[must_use]
    pub fn child_create(&mut self) -> &mut Custodian {
        let total_size = CHILD_PAYLOAD_OFFSET + mem::size_of::<Custodian>();
        let layout = layout_for(EntryKind::ChildScope, total_size);
        let raw = self.alloc.allocate(layout);
        if raw.is_null() {
            self.abort();
        }
        // SAFETY: `raw` is a fresh, exclusively-owned allocation large
        // enough for a header followed by a `Custodian`, aligned for both.
        let child_ptr = unsafe { raw.add(CHILD_PAYLOAD_OFFSET) } as *mut Custodian;
        let parent_ptr = self as *mut Custodian;
        // SAFETY: `child_ptr` is freshly allocated, aligned storage; the
        // payload is fully initialized here, before the entry header below
        // links it onto the stack, so shutdown can never observe a
        // half-initialized child.
        unsafe { Self::init_in_place(child_ptr, parent_ptr, self.alloc) };

        let header = raw as *mut EntryHeader;
        // SAFETY: same allocation as above; writing the header after the
        // child payload preserves the "never traverse a half-initialized
        // entry" invariant.
        unsafe {
            header.write(EntryHeader {
                prev: self.stack,
                kind: EntryKind::ChildScope,
                total_size,
            });
        }
        self.stack = header;
        // SAFETY: `child_ptr` was just initialized above and is exclusively
        // borrowed through the `&mut self` that produced it.
        unsafe { &mut *child_ptr }
    }

    /// Pushes a deferred-cleanup entry: `cleanup(handle)` runs when this
    /// entry is reached during shutdown. `handle` may be null; `cleanup` may
    /// be `None`, in which case release is a no-op for the handle but the
    /// entry's own storage is still reclaimed.
    ///
    /// On allocator exhaustion, aborts the whole custodian tree and never
    /// returns.
    pub fn defer(&mut self, handle: *mut (), cleanup: Option<CleanupFn>) {
        let total_size = DEFERRED_PAYLOAD_OFFSET + mem::size_of::<DeferredEntry>();
        let layout = layout_for(EntryKind::DeferredResource, total_size);
        let raw = self.alloc.allocate(layout);
        if raw.is_null() {
            self.abort();
        }
        // SAFETY: `raw` is fresh, exclusively-owned, aligned for
        // `DeferredEntry` at this offset.
        let payload = unsafe { raw.add(DEFERRED_PAYLOAD_OFFSET) } as *mut DeferredEntry;
        // SAFETY: payload is written before the header links it in.
        unsafe { payload.write(DeferredEntry { handle, cleanup }) };

        let header = raw as *mut EntryHeader;
        // SAFETY: same allocation; header linked in only after the payload
        // above is fully populated.
        unsafe {
            header.write(EntryHeader {
                prev: self.stack,
                kind: EntryKind::DeferredResource,
                total_size,
            });
        }
        self.stack = header;
    }

    /// Releases every entry on this node's stack in LIFO order, then
    /// empties the stack. Idempotent: calling `shutdown` on an
    /// already-empty (or already shut down) node does nothing.
    pub fn shutdown(&mut self) {
        let mut entry = self.stack;
        let cap = self.alloc;

        while !entry.is_null() {
            // SAFETY: `entry` was linked onto this stack by `alloc`,
            // `defer`, or `child_create`, each of which fully populates the
            // header before storing it here.
            let header = unsafe { &*entry };
            let prev = header.prev;
            let kind = header.kind;
            let total_size = header.total_size;

            match kind {
                EntryKind::Allocation => {
                    cap.release(entry as *mut u8, layout_for(kind, total_size));
                }
                EntryKind::DeferredResource => {
                    let offset = payload_offset_for(kind);
                    // SAFETY: the payload was written by `defer` before
                    // this header was linked onto the stack.
                    let res = unsafe { &*((entry as *mut u8).add(offset) as *mut DeferredEntry) };
                    if let Some(cleanup) = res.cleanup {
                        // SAFETY: trusted not to fault, per `CleanupFn`'s
                        // contract; `res.handle` is whatever `defer` was
                        // given, including possibly null.
                        unsafe { cleanup(res.handle) };
                    }
                    cap.release(entry as *mut u8, layout_for(kind, total_size));
                }
                EntryKind::ChildScope => {
                    let offset = payload_offset_for(kind);
                    let child = (entry as *mut u8).wrapping_add(offset) as *mut Custodian;
                    // SAFETY: the child was fully initialized by
                    // `child_create` before this header was linked onto the
                    // stack, and nothing since has invalidated it.
                    unsafe { (*child).shutdown() };
                    cap.release(entry as *mut u8, layout_for(kind, total_size));
                }
            }

            entry = prev;
        }

        self.stack = ptr::null_mut();
    }

    /// Walks `parent` links from this node to the root, shuts the whole
    /// tree down, then unconditionally terminates the process. Called
    /// internally whenever an allocator call returns the "no memory"
    /// sentinel. Never returns.
    fn abort(&mut self) -> ! {
        let mut cur: *mut Custodian = self as *mut Custodian;
        loop {
            // SAFETY: `cur` is either `self` or reached by following live
            // `parent` links, each of which points at a still-valid node
            // per this type's documented invariants.
            let parent = unsafe { (*cur).parent };
            if parent.is_null() {
                break;
            }
            cur = parent;
        }
        // SAFETY: `cur` is the root of this node's tree.
        unsafe { (*cur).shutdown() };
        std::process::abort();
    }
}

impl Drop for Custodian {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn cap() -> AllocatorCapability {
        AllocatorCapability::system()
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut c = Custodian::root(cap());
        c.alloc(16);
        c.shutdown();
        assert!(c.stack.is_null());
        // Second shutdown on an already-empty node must be a no-op, not a
        // use-after-free or a double-free.
        c.shutdown();
        assert!(c.stack.is_null());
    }

    #[test]
    fn cleanups_run_in_lifo_order() {
        thread_local! {
            static ORDER: RefCell<Vec<char>> = RefCell::new(Vec::new());
        }

        unsafe fn record(handle: *mut ()) {
            let ch = handle as usize as u8 as char;
            ORDER.with(|o| o.borrow_mut().push(ch));
        }

        let mut c = Custodian::root(cap());
        c.defer(b'A' as usize as *mut (), Some(record));
        c.defer(b'B' as usize as *mut (), Some(record));
        c.defer(b'C' as usize as *mut (), Some(record));
        c.shutdown();

        ORDER.with(|o| assert_eq!(*o.borrow(), vec!['C', 'B', 'A']));
    }

    #[test]
    fn child_scope_entries_release_before_enclosing_parent_entry() {
        thread_local! {
            static ORDER: RefCell<Vec<&'static str>> = RefCell::new(Vec::new());
        }

        unsafe fn mark_parent(_h: *mut ()) {
            ORDER.with(|o| o.borrow_mut().push("parent-after-child"));
        }
        unsafe fn mark_child(_h: *mut ()) {
            ORDER.with(|o| o.borrow_mut().push("child"));
        }

        let mut c = Custodian::root(cap());
        {
            let child = c.child_create();
            child.alloc(8);
            child.defer(ptr::null_mut(), Some(mark_child));
        }
        c.defer(ptr::null_mut(), Some(mark_parent));
        c.shutdown();

        // The parent's stack is [ChildScope, DeferredResource(mark_parent)]
        // with DeferredResource pushed last, so it releases first — but the
        // child scope's own entries must be fully drained before the
        // *enclosing* ChildScope entry on the parent's stack is considered
        // released.
        ORDER.with(|o| assert_eq!(*o.borrow(), vec!["parent-after-child", "child"]));
    }

    #[test]
    fn defer_with_none_cleanup_still_reclaims_storage() {
        let mut c = Custodian::root(cap());
        c.defer(ptr::null_mut(), None);
        // Must not dereference the handle or invoke anything; must still
        // release the entry's own storage on shutdown without leaking.
        c.shutdown();
        assert!(c.stack.is_null());
    }

    #[test]
    fn nested_custodian_with_deferred_resource_runs_cleanup_once() {
        thread_local! {
            static CALLS: RefCell<u32> = RefCell::new(0);
        }
        unsafe fn count(_h: *mut ()) {
            CALLS.with(|c| *c.borrow_mut() += 1);
        }

        let mut c = Custodian::root(cap());
        c.alloc(100);
        c.defer(ptr::null_mut(), Some(count));
        c.alloc(200);
        let c2 = c.child_create();
        c2.alloc(300);
        c2.alloc(20);
        c.alloc(50);
        c.shutdown();

        CALLS.with(|calls| assert_eq!(*calls.borrow(), 1));
    }

    #[test]
    fn alloc_returns_writable_region_of_requested_size() {
        let mut c = Custodian::root(cap());
        let p = c.alloc(32);
        assert!(!p.is_null());
        // SAFETY: `p` is a freshly tracked 32-byte region.
        unsafe { ptr::write_bytes(p, 0x5a, 32) };
        c.shutdown();
    }
}
