//! aethermind-ammalloc: a TCMalloc-style concurrent memory allocator.
//!
//! Five tiers, thinnest at the top:
//! - [`thread_cache`] — per-thread free lists, the lock-free fast path.
//! - [`central_cache`] — one free-list bucket + mutex per size class.
//! - [`page_cache`] — the single global span cache (split/coalesce).
//! - [`page_allocator`] — `mmap`/`munmap`/huge-page interface to the OS.
//! - [`pagemap`] — a four-level radix tree from page id to owning span.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: aethermind_ammalloc::AmMalloc = aethermind_ammalloc::AmMalloc;
//! ```
//!
//! Or call [`am_malloc`]/[`am_free`] directly without installing it as the
//! process-wide allocator.

pub mod allocator;
pub mod central_cache;
pub mod config;
pub mod page_allocator;
pub mod page_cache;
pub mod pagemap;
pub mod size_class;
pub mod span;
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{am_free, am_malloc, AmMalloc};
pub use config::RuntimeConfig;
pub use stats::{snapshot, StatsSnapshot};
