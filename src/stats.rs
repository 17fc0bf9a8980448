//! Atomic allocator-wide statistics counters and a point-in-time snapshot.
//!
//! Mirrors the `stat_inc!`/`stat_add!` macro pattern used by the sibling
//! `rtmalloc` allocator's top-level module, folded into a single static
//! `Stats` struct instead of macros since every call site here already has a
//! concrete counter name in scope.

use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    pub alloc_count: AtomicU64,
    pub free_count: AtomicU64,
    pub alloc_bytes: AtomicU64,
    pub free_bytes: AtomicU64,
    pub large_alloc_count: AtomicU64,
    pub large_free_count: AtomicU64,
    pub central_refill_count: AtomicU64,
    pub central_flush_count: AtomicU64,
    pub page_split_count: AtomicU64,
    pub page_coalesce_count: AtomicU64,
    pub mmap_retry_count: AtomicU64,
    pub mmap_failure_count: AtomicU64,
    pub munmap_failure_count: AtomicU64,
    pub madvise_failure_count: AtomicU64,
    pub huge_page_hit_count: AtomicU64,
    pub huge_page_fallback_count: AtomicU64,
    pub huge_page_waste_bytes: AtomicU64,
}

/// A consistent-enough-for-diagnostics copy of the counters above. Not
/// transactionally consistent across fields (each field is read with its own
/// relaxed load), which matches the intended use: coarse-grained monitoring,
/// not correctness-sensitive bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub alloc_count: u64,
    pub free_count: u64,
    pub alloc_bytes: u64,
    pub free_bytes: u64,
    pub large_alloc_count: u64,
    pub large_free_count: u64,
    pub central_refill_count: u64,
    pub central_flush_count: u64,
    pub page_split_count: u64,
    pub page_coalesce_count: u64,
    pub mmap_retry_count: u64,
    pub mmap_failure_count: u64,
    pub munmap_failure_count: u64,
    pub madvise_failure_count: u64,
    pub huge_page_hit_count: u64,
    pub huge_page_fallback_count: u64,
    pub huge_page_waste_bytes: u64,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            free_bytes: AtomicU64::new(0),
            large_alloc_count: AtomicU64::new(0),
            large_free_count: AtomicU64::new(0),
            central_refill_count: AtomicU64::new(0),
            central_flush_count: AtomicU64::new(0),
            page_split_count: AtomicU64::new(0),
            page_coalesce_count: AtomicU64::new(0),
            mmap_retry_count: AtomicU64::new(0),
            mmap_failure_count: AtomicU64::new(0),
            munmap_failure_count: AtomicU64::new(0),
            madvise_failure_count: AtomicU64::new(0),
            huge_page_hit_count: AtomicU64::new(0),
            huge_page_fallback_count: AtomicU64::new(0),
            huge_page_waste_bytes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let ld = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            alloc_count: ld(&self.alloc_count),
            free_count: ld(&self.free_count),
            alloc_bytes: ld(&self.alloc_bytes),
            free_bytes: ld(&self.free_bytes),
            large_alloc_count: ld(&self.large_alloc_count),
            large_free_count: ld(&self.large_free_count),
            central_refill_count: ld(&self.central_refill_count),
            central_flush_count: ld(&self.central_flush_count),
            page_split_count: ld(&self.page_split_count),
            page_coalesce_count: ld(&self.page_coalesce_count),
            mmap_retry_count: ld(&self.mmap_retry_count),
            mmap_failure_count: ld(&self.mmap_failure_count),
            munmap_failure_count: ld(&self.munmap_failure_count),
            madvise_failure_count: ld(&self.madvise_failure_count),
            huge_page_hit_count: ld(&self.huge_page_hit_count),
            huge_page_fallback_count: ld(&self.huge_page_fallback_count),
            huge_page_waste_bytes: ld(&self.huge_page_waste_bytes),
        }
    }
}

pub static STATS: Stats = Stats::new();

/// Returns a snapshot of the global allocator statistics.
pub fn snapshot() -> StatsSnapshot {
    STATS.snapshot()
}
