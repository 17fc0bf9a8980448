//! CentralCache: one free-list bucket and mutex per size class, sitting
//! between PageCache and every thread's ThreadCache.
//!
//! Ported from `original_source/include/ammalloc/memory_pool.h`'s
//! `CentralCache::FetchRange`/`ReleaseListToSpans`/`GetOneSpan`. Each bucket
//! tracks only the spans of its size class that currently have at least one
//! free slot (`nonempty_spans`); a span with no free slots simply isn't
//! linked into any list until a `release_list` call frees a slot in it
//! again. Calling into PageCache (to fetch a fresh span, or to return an
//! emptied one) must never happen while holding this bucket's own mutex —
//! doing so would invert the PageCache-mutex-outranks-CentralCache-mutex
//! lock order — so every such call explicitly drops the bucket lock first
//! and re-acquires it afterward.

use crate::config::system::PAGE_SHIFT;
use crate::page_cache::PAGE_CACHE;
use crate::pagemap::PAGE_MAP;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::span::{FreeObject, Span, SpanList};
use crate::stats::STATS;
use crate::sync::SpinMutex;
use core::ptr;
use core::sync::atomic::Ordering;
use std::sync::OnceLock;

struct CentralBucket {
    size_class: usize,
    obj_size: usize,
    nonempty_spans: SpanList,
}

impl CentralBucket {
    fn new(size_class: usize) -> Self {
        Self {
            size_class,
            obj_size: size_class::class_to_size(size_class),
            nonempty_spans: SpanList::new(),
        }
    }

    /// Pulls up to `want` objects out of `nonempty_spans`, allocating and
    /// registering a fresh span from PageCache (with this bucket's mutex
    /// dropped for the duration of that call) whenever the list runs dry.
    fn fetch_range(
        mutex: &SpinMutex<CentralBucket>,
        want: usize,
    ) -> (*mut FreeObject, usize) {
        let mut head: *mut FreeObject = ptr::null_mut();
        let mut got = 0usize;

        let mut guard = mutex.lock();
        while got < want {
            if guard.nonempty_spans.is_empty() {
                drop(guard);
                let grew = Self::refill(mutex);
                guard = mutex.lock();
                if !grew {
                    break;
                }
                continue;
            }

            let span = guard.nonempty_spans.head;
            match unsafe { (*span).alloc_object() } {
                Some(obj) => {
                    unsafe {
                        let node = obj as *mut FreeObject;
                        (*node).next = head;
                        head = node;
                    }
                    got += 1;
                    let full = unsafe { (*span).use_count.load(Ordering::Acquire) as u32 == (*span).capacity };
                    if full {
                        unsafe {
                            guard.nonempty_spans.remove(span);
                            (*span).in_central_list = false;
                        }
                    }
                }
                None => {
                    // Bitmap disagreed with our bookkeeping (race during a
                    // concurrent free elsewhere); drop it from the list and
                    // keep going.
                    unsafe {
                        guard.nonempty_spans.remove(span);
                        (*span).in_central_list = false;
                    }
                }
            }
        }
        (head, got)
    }

    /// Asks PageCache for a fresh span of this bucket's size class, carves
    /// it into a bitmap slab, and links it in. Returns `false` if PageCache
    /// couldn't satisfy the request (OOM).
    fn refill(mutex: &SpinMutex<CentralBucket>) -> bool {
        let (size_class, obj_size) = {
            let guard = mutex.lock();
            (guard.size_class, guard.obj_size)
        };
        let pages = size_class::span_pages(obj_size);
        let span = PAGE_CACHE.alloc_span(pages);
        if span.is_null() {
            return false;
        }
        unsafe {
            let start_page = (*span).start_page;
            (*span).init_bitmap_slab(start_page, pages, size_class, obj_size);
        }
        let mut guard = mutex.lock();
        unsafe {
            (*span).in_central_list = true;
            guard.nonempty_spans.push(span);
        }
        STATS.central_refill_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Frees a chain of objects, returning any span that becomes completely
    /// free to PageCache (with the bucket mutex dropped for that call).
    fn release_list(mutex: &SpinMutex<CentralBucket>, mut head: *mut FreeObject) {
        let mut freed_spans: Vec<*mut Span> = Vec::new();
        {
            let mut guard = mutex.lock();
            while !head.is_null() {
                let next = unsafe { (*head).next };
                let ptr = head as *mut u8;
                let page_id = ptr as usize >> PAGE_SHIFT;
                let span = PAGE_MAP.get(page_id);
                if !span.is_null() {
                    unsafe {
                        (*span).free_object(ptr);
                        if !(*span).in_central_list && !(*span).is_fully_free() {
                            (*span).in_central_list = true;
                            guard.nonempty_spans.push(span);
                        } else if (*span).is_fully_free() {
                            if (*span).in_central_list {
                                guard.nonempty_spans.remove(span);
                                (*span).in_central_list = false;
                            }
                            freed_spans.push(span);
                        }
                    }
                }
                head = next;
            }
        }
        STATS.central_flush_count.fetch_add(1, Ordering::Relaxed);
        for span in freed_spans {
            PAGE_CACHE.release_span(span);
        }
    }
}

pub struct CentralCache {
    buckets: Vec<SpinMutex<CentralBucket>>,
}

impl CentralCache {
    fn new() -> Self {
        let buckets = (0..NUM_SIZE_CLASSES)
            .map(|idx| SpinMutex::new(CentralBucket::new(idx)))
            .collect();
        Self { buckets }
    }

    pub fn get() -> &'static CentralCache {
        static CENTRAL_CACHE: OnceLock<CentralCache> = OnceLock::new();
        CENTRAL_CACHE.get_or_init(CentralCache::new)
    }

    pub fn fetch_range(&self, size_class: usize, want: usize) -> (*mut FreeObject, usize) {
        CentralBucket::fetch_range(&self.buckets[size_class], want)
    }

    pub fn release_list(&self, size_class: usize, head: *mut FreeObject) {
        CentralBucket::release_list(&self.buckets[size_class], head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_then_release_roundtrip() {
        let cc = CentralCache::get();
        let class = size_class::size_to_class(32);
        let (head, got) = cc.fetch_range(class, 16);
        assert_eq!(got, 16);
        assert!(!head.is_null());
        cc.release_list(class, head);
    }

    #[test]
    fn fetch_range_can_span_multiple_spans() {
        let cc = CentralCache::get();
        let class = size_class::size_to_class(2048);
        let (head, got) = cc.fetch_range(class, 2000);
        assert_eq!(got, 2000);
        cc.release_list(class, head);
    }
}
