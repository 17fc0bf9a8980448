//! Top-level allocator: ties the five tiers together and implements the
//! crate's public surface, `am_malloc`/`am_free`, plus a `GlobalAlloc`
//! wrapper (`AmMalloc`) so the crate can also be dropped in as
//! `#[global_allocator]`.
//!
//! ThreadCache lifecycle follows `original_source/src/ammalloc/ammalloc.cpp`
//! (`CreateThreadCache`/`ReleaseThreadCache`/`ThreadCacheCleaner`), but
//! considerably simplified: Rust's `std::thread_local!` storage for a sized
//! type is not itself heap-allocated through the global allocator, so the
//! "allocate the ThreadCache struct via PageAllocator directly, to avoid
//! recursing into the allocator" dance the C++ original needs is simply
//! unnecessary here — `thread_local!` already sidesteps it. What *does*
//! carry over is the post-destruction guard: once a thread's ThreadCache has
//! run its destructor, further frees on that thread must not try to touch
//! (or resurrect) it. `std::thread::LocalKey::try_with` already reports that
//! state as an error, which is the idiomatic equivalent of the original's
//! hand-rolled `g_ThreadCacheAlreadyDestructed` flag.

use crate::central_cache::CentralCache;
use crate::config::system::{PAGE_SHIFT, PAGE_SIZE};
use crate::pagemap::PAGE_MAP;
use crate::page_cache::PAGE_CACHE;
use crate::size_class::{self, MAX_SMALL_SIZE};
use crate::span::FreeObject;
use crate::stats::STATS;
use crate::thread_cache::ThreadCache;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::sync::atomic::Ordering;

struct TcSlot(UnsafeCell<ThreadCache>);

// Only ever touched through `with_thread_cache`, which hands out exclusive
// access for the duration of one call.
unsafe impl Sync for TcSlot {}

impl Drop for TcSlot {
    fn drop(&mut self) {
        unsafe { (*self.0.get()).release_all() };
    }
}

thread_local! {
    static THREAD_CACHE: TcSlot = TcSlot(UnsafeCell::new(ThreadCache::new()));
}

/// Runs `f` against this thread's cache, unless the thread is in (or past)
/// TLS teardown, in which case callers fall back to CentralCache directly.
fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
    THREAD_CACHE
        .try_with(|slot| f(unsafe { &mut *slot.0.get() }))
        .ok()
}

fn page_id_of(ptr: *mut u8) -> usize {
    ptr as usize >> PAGE_SHIFT
}

/// Allocates `size` bytes. Returns null on failure, matching `malloc`'s
/// contract — this is never expected to panic.
pub fn am_malloc(size: usize) -> *mut u8 {
    let size = size.max(1);
    if size > MAX_SMALL_SIZE {
        return alloc_large(size);
    }

    let class = size_class::size_to_class(size);
    let ptr = with_thread_cache(|tc| tc.allocate(size)).unwrap_or_else(|| {
        // Thread cache already torn down for this thread: skip it and pull
        // straight from CentralCache.
        let (chain, got) = CentralCache::get().fetch_range(class, 1);
        if got == 0 {
            core::ptr::null_mut()
        } else {
            chain as *mut u8
        }
    });

    if !ptr.is_null() {
        let obj_size = size_class::class_to_size(class);
        STATS.alloc_count.fetch_add(1, Ordering::Relaxed);
        STATS.alloc_bytes.fetch_add(obj_size as u64, Ordering::Relaxed);
    }
    ptr
}

/// Frees a pointer previously returned by `am_malloc`. Null and
/// already-freed/unrecognized pointers are silently ignored, matching
/// `free`'s contract.
///
/// There is deliberately no `size` parameter: the owning span (found via
/// `PageMap`) is the sole authority on how large this allocation actually
/// is, since a caller-supplied size could be stale or simply wrong.
pub fn am_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let span = PAGE_MAP.get(page_id_of(ptr));
    if span.is_null() {
        return;
    }

    let size_class = unsafe { (*span).size_class };
    match size_class {
        None => {
            STATS.large_free_count.fetch_add(1, Ordering::Relaxed);
            PAGE_CACHE.release_span(span);
        }
        Some(class) => {
            let obj_size = unsafe { (*span).obj_size };
            STATS.free_count.fetch_add(1, Ordering::Relaxed);
            STATS.free_bytes.fetch_add(obj_size as u64, Ordering::Relaxed);
            let handled = with_thread_cache(|tc| tc.deallocate(ptr, obj_size)).is_some();
            if !handled {
                // Thread cache already torn down: free straight to CentralCache.
                let node = ptr as *mut FreeObject;
                unsafe {
                    (*node).next = core::ptr::null_mut();
                }
                CentralCache::get().release_list(class, node);
            }
        }
    }
}

fn alloc_large(size: usize) -> *mut u8 {
    let pages = size.div_ceil(PAGE_SIZE);
    let span = PAGE_CACHE.alloc_span(pages);
    if span.is_null() {
        return core::ptr::null_mut();
    }
    STATS.alloc_count.fetch_add(1, Ordering::Relaxed);
    STATS.alloc_bytes.fetch_add(size as u64, Ordering::Relaxed);
    unsafe { (*span).start_addr() }
}

/// A zero-sized `GlobalAlloc` wrapper around `am_malloc`/`am_free`, suitable
/// for use as `#[global_allocator]`.
pub struct AmMalloc;

unsafe impl GlobalAlloc for AmMalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= 16 {
            return am_malloc(layout.size());
        }
        // Over-aligned request: over-allocate on the large path (which is
        // always page-aligned) and hand back an aligned interior pointer.
        // The padding is not reclaimed individually; it is released as part
        // of the whole span when the aligned pointer is freed, since
        // `am_free` resolves the owning span (and its full page range)
        // through `PageMap` rather than trusting the pointer's offset.
        let padded = layout.size() + layout.align();
        let raw = am_malloc(padded);
        if raw.is_null() {
            return raw;
        }
        let aligned = (raw as usize).next_multiple_of(layout.align()) as *mut u8;
        let aligned = if aligned == raw {
            unsafe { raw.add(layout.align()) }
        } else {
            aligned
        };
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // For an over-aligned allocation `ptr` may be an interior pointer of
        // the span returned by `alloc`; `am_free` still resolves the correct
        // owning span via PageMap regardless of which page-aligned interior
        // pointer it's handed.
        am_free(ptr);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            unsafe { core::ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_small() {
        let p = am_malloc(64);
        assert!(!p.is_null());
        am_free(p);
    }

    #[test]
    fn malloc_free_large() {
        let p = am_malloc(1 << 20);
        assert!(!p.is_null());
        am_free(p);
    }

    #[test]
    fn free_null_is_noop() {
        am_free(core::ptr::null_mut());
    }

    #[test]
    fn global_alloc_box_roundtrip() {
        static ALLOC: AmMalloc = AmMalloc;
        unsafe {
            let layout = Layout::new::<[u8; 128]>();
            let p = ALLOC.alloc(layout);
            assert!(!p.is_null());
            ALLOC.dealloc(p, layout);
        }
    }
}
