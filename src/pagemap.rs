//! Four-level radix tree mapping page id -> owning `Span`.
//!
//! Page ids are split into four 9-bit groups (`RADIX_NODE_SIZE = 512`),
//! most-significant first. Reads are lock-free (`Acquire` loads walking
//! down the tree); writes must happen under external synchronization (the
//! PageCache mutex, the sole writer per the component lock order) and use
//! `Release` stores so a concurrent lock-free reader that observes a newly
//! published interior node also observes its fully-initialized contents.
//! Interior nodes are carved from a never-freed bump pool and page-aligned
//! to avoid false sharing between unrelated subtrees.

use crate::config::page::{RADIX_BITS, RADIX_NODE_SIZE};
use crate::config::system::PAGE_SIZE;
use crate::page_allocator;
use crate::span::Span;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const LEVEL_SHIFT_3: usize = 0;
const LEVEL_SHIFT_2: usize = RADIX_BITS;
const LEVEL_SHIFT_1: usize = RADIX_BITS * 2;
const LEVEL_SHIFT_0: usize = RADIX_BITS * 3;
const LEVEL_MASK: usize = RADIX_NODE_SIZE - 1;

#[repr(C, align(4096))]
struct Level1Node {
    children: [AtomicPtr<Level2Node>; RADIX_NODE_SIZE],
}

#[repr(C, align(4096))]
struct Level2Node {
    children: [AtomicPtr<Level3Node>; RADIX_NODE_SIZE],
}

#[repr(C, align(4096))]
struct Level3Node {
    spans: [AtomicPtr<Span>; RADIX_NODE_SIZE],
}

/// Transmutes a zeroed array of `usize` into an array of null `AtomicPtr<T>`:
/// a null pointer and a zeroed `usize` share the same bit pattern, which
/// sidesteps the lack of const-generic `AtomicPtr` array initializers.
macro_rules! null_atomic_array {
    ($len:expr, $T:ty) => {{
        unsafe { core::mem::transmute::<[usize; $len], [AtomicPtr<$T>; $len]>([0usize; $len]) }
    }};
}

pub struct PageMap {
    root: [AtomicPtr<Level1Node>; RADIX_NODE_SIZE],
}

unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

impl Default for PageMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMap {
    pub const fn new() -> Self {
        Self {
            root: null_atomic_array!(RADIX_NODE_SIZE, Level1Node),
        }
    }

    #[inline]
    fn indices(page_id: usize) -> [usize; 4] {
        [
            (page_id >> LEVEL_SHIFT_0) & LEVEL_MASK,
            (page_id >> LEVEL_SHIFT_1) & LEVEL_MASK,
            (page_id >> LEVEL_SHIFT_2) & LEVEL_MASK,
            (page_id >> LEVEL_SHIFT_3) & LEVEL_MASK,
        ]
    }

    /// Lock-free lookup. Returns null if no span has been registered for
    /// `page_id`.
    pub fn get(&self, page_id: usize) -> *mut Span {
        let [i0, i1, i2, i3] = Self::indices(page_id);

        let l1 = self.root[i0].load(Ordering::Acquire);
        if l1.is_null() {
            return ptr::null_mut();
        }
        let l2 = unsafe { (*l1).children[i1].load(Ordering::Acquire) };
        if l2.is_null() {
            return ptr::null_mut();
        }
        let l3 = unsafe { (*l2).children[i2].load(Ordering::Acquire) };
        if l3.is_null() {
            return ptr::null_mut();
        }
        unsafe { (*l3).spans[i3].load(Ordering::Acquire) }
    }

    /// Registers `span` for a single page id.
    ///
    /// # Safety
    /// Must be called under the PageCache mutex (the sole writer).
    pub unsafe fn set(&self, page_id: usize, span: *mut Span) {
        let [i0, i1, i2, i3] = Self::indices(page_id);

        let mut l1 = self.root[i0].load(Ordering::Acquire);
        if l1.is_null() {
            l1 = unsafe { alloc_node::<Level1Node>() };
            assert!(!l1.is_null(), "failed to allocate PageMap level-1 node");
            self.root[i0].store(l1, Ordering::Release);
        }

        let mut l2 = unsafe { (*l1).children[i1].load(Ordering::Acquire) };
        if l2.is_null() {
            l2 = unsafe { alloc_node::<Level2Node>() };
            assert!(!l2.is_null(), "failed to allocate PageMap level-2 node");
            unsafe { (*l1).children[i1].store(l2, Ordering::Release) };
        }

        let mut l3 = unsafe { (*l2).children[i2].load(Ordering::Acquire) };
        if l3.is_null() {
            l3 = unsafe { alloc_node::<Level3Node>() };
            assert!(!l3.is_null(), "failed to allocate PageMap level-3 node");
            unsafe { (*l2).children[i2].store(l3, Ordering::Release) };
        }

        unsafe { (*l3).spans[i3].store(span, Ordering::Release) };
    }

    /// Registers `span` for every page it covers.
    ///
    /// # Safety
    /// Must be called under the PageCache mutex.
    pub unsafe fn register_span(&self, span: *mut Span) {
        let start = unsafe { (*span).start_page };
        let count = unsafe { (*span).num_pages };
        for page_id in start..start + count {
            unsafe { self.set(page_id, span) };
        }
    }

    /// Clears every page id covered by `span`.
    ///
    /// # Safety
    /// Must be called under the PageCache mutex.
    pub unsafe fn unregister_span(&self, span: *mut Span) {
        let start = unsafe { (*span).start_page };
        let count = unsafe { (*span).num_pages };
        for page_id in start..start + count {
            unsafe { self.set(page_id, ptr::null_mut()) };
        }
    }
}

unsafe fn alloc_node<T>() -> *mut T {
    let size = core::mem::size_of::<T>();
    let alloc_size = size.next_multiple_of(PAGE_SIZE);
    // page_allocator returns zeroed memory, which is a valid all-null state
    // for an array of AtomicPtr.
    unsafe { page_allocator::raw_page_alloc(alloc_size).cast::<T>() }
}

/// The process-wide page map. PageCache is the only writer; every other
/// component only calls `get`.
pub static PAGE_MAP: PageMap = PageMap::new();
