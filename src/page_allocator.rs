//! PageAllocator: the bottom tier, backed directly by `mmap`/`munmap`.
//!
//! Ported from `original_source/include/ammalloc/page_allocator.h`'s
//! `SystemAlloc`/`SystemFree`/`AllocNormalPage`/`AllocHugePage`. The huge
//! path over-allocates by one huge-page stride, trims the unaligned head and
//! tail, and advises `MADV_HUGEPAGE`; any failure anywhere in that path
//! falls back to the normal path rather than failing the whole allocation.

use crate::config::system::{HUGE_PAGE_SIZE, MAX_ALLOC_RETRIES, PAGE_SIZE};
use crate::stats::STATS;
use core::ptr;
use core::sync::atomic::Ordering;
use std::io;

/// Maps `num_pages` pages, retrying on transient `ENOMEM` up to
/// `MAX_ALLOC_RETRIES` times with a short backoff, honoring
/// `RuntimeConfig::use_map_populate`.
pub fn alloc_pages(num_pages: usize) -> *mut u8 {
    let len = num_pages * PAGE_SIZE;
    let populate = crate::config::RuntimeConfig::get().use_map_populate();
    let mut attempt = 0;
    loop {
        match system_mmap(len, populate) {
            Ok(ptr) => return ptr,
            Err(err) if attempt < MAX_ALLOC_RETRIES && err.raw_os_error() == Some(libc::ENOMEM) => {
                STATS.mmap_retry_count.fetch_add(1, Ordering::Relaxed);
                attempt += 1;
                std::thread::yield_now();
            }
            Err(err) => {
                log::error!("mmap failed for {len} bytes: {err}");
                STATS.mmap_failure_count.fetch_add(1, Ordering::Relaxed);
                return ptr::null_mut();
            }
        }
    }
}

/// Maps `num_pages` pages aligned to `HUGE_PAGE_SIZE` and advises
/// `MADV_HUGEPAGE`. Falls back to `alloc_pages` (and logs the fallback) if
/// any step of the huge-page path fails.
pub fn alloc_huge_pages(num_pages: usize) -> *mut u8 {
    let len = num_pages * PAGE_SIZE;
    let overshoot = len + HUGE_PAGE_SIZE;
    let populate = crate::config::RuntimeConfig::get().use_map_populate();

    let raw = match system_mmap(overshoot, populate) {
        Ok(p) => p,
        Err(err) => {
            log::warn!("huge-page mmap failed for {overshoot} bytes: {err}, falling back");
            STATS.huge_page_fallback_count.fetch_add(1, Ordering::Relaxed);
            return alloc_pages(num_pages);
        }
    };

    let raw_addr = raw as usize;
    let aligned_addr = raw_addr.next_multiple_of(HUGE_PAGE_SIZE);
    let head_waste = aligned_addr - raw_addr;
    let tail_waste = overshoot - head_waste - len;

    unsafe {
        if head_waste > 0 && system_munmap(raw, head_waste).is_err() {
            STATS.munmap_failure_count.fetch_add(1, Ordering::Relaxed);
        }
        if tail_waste > 0 {
            let tail_ptr = (aligned_addr + len) as *mut u8;
            if system_munmap(tail_ptr, tail_waste).is_err() {
                STATS.munmap_failure_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let aligned_ptr = aligned_addr as *mut u8;
    let advise_rc = unsafe { libc::madvise(aligned_ptr as *mut libc::c_void, len, libc::MADV_HUGEPAGE) };
    if advise_rc != 0 {
        log::warn!(
            "madvise(MADV_HUGEPAGE) failed: {}",
            io::Error::last_os_error()
        );
        STATS.madvise_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    STATS.huge_page_hit_count.fetch_add(1, Ordering::Relaxed);
    STATS
        .huge_page_waste_bytes
        .fetch_add((head_waste + tail_waste) as u64, Ordering::Relaxed);
    aligned_ptr
}

/// Unmaps a region previously returned by `alloc_pages`/`alloc_huge_pages`.
pub fn free_pages(ptr: *mut u8, num_pages: usize) {
    if ptr.is_null() {
        return;
    }
    let len = num_pages * PAGE_SIZE;
    if unsafe { system_munmap(ptr, len) }.is_err() {
        STATS.munmap_failure_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Maps a single raw region directly, bypassing retry/huge-page/stats
/// machinery. Used only to bootstrap allocator-internal metadata (span
/// metadata pool, PageMap radix nodes) so that building those structures
/// never recurses back into the tiered allocator.
pub fn raw_page_alloc(size: usize) -> *mut u8 {
    match system_mmap(size, false) {
        Ok(ptr) => ptr,
        Err(err) => {
            log::error!("bootstrap mmap failed for {size} bytes: {err}");
            ptr::null_mut()
        }
    }
}

fn system_mmap(len: usize, populate: bool) -> io::Result<*mut u8> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if populate {
        flags |= libc::MAP_POPULATE;
    }
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr as *mut u8)
    }
}

unsafe fn system_munmap(ptr: *mut u8, len: usize) -> io::Result<()> {
    if len == 0 {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_pages_roundtrip() {
        let ptr = alloc_pages(4);
        assert!(!ptr.is_null());
        unsafe {
            ptr::write_bytes(ptr, 0xAB, 4 * PAGE_SIZE);
        }
        free_pages(ptr, 4);
    }

    #[test]
    fn raw_page_alloc_returns_usable_memory() {
        let ptr = raw_page_alloc(PAGE_SIZE);
        assert!(!ptr.is_null());
        unsafe {
            ptr::write_bytes(ptr, 0, PAGE_SIZE);
        }
        free_pages(ptr, 1);
    }
}
