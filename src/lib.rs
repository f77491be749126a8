//! # partalloc
//!
//! A bucketed partition allocator: explicit `alloc`/`free` of raw memory
//! blocks, pooled by size class into slot spans carved from aligned super
//! pages, with a dedicated mapping for anything too large to pool.
//!
//! ## Features
//!
//! - Two roots: [`FixedRoot`] (exact-size buckets, `&mut self`, no lock)
//!   and [`GenericRoot`] (order-spaced buckets, one coarse lock)
//! - O(1) size-class lookup through a precomputed table
//! - Lazy slot provisioning: only touched pages are faulted in
//! - Direct maps for oversized requests, released immediately on free
//! - Purging of empty spans and of unused pages inside partly used spans
//! - Stats dumps per bucket and as totals
//! - Allocation observers per root and process-wide hooks
//! - Fail-fast on metadata corruption, with coded diagnostics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use partalloc::{AllocFlags, GenericRoot, GenericRootConfig, PurgeFlags};
//!
//! let root = GenericRoot::new(GenericRootConfig::default());
//!
//! let ptr = root.alloc(100, "Buffer");
//! let ptr = unsafe { root.realloc(Some(ptr), 4096, "Buffer") }.unwrap();
//! unsafe { root.free(ptr) };
//!
//! // Opt into a null return instead of termination.
//! assert!(root.alloc_flags(AllocFlags::RETURN_NULL, usize::MAX, "Huge").is_none());
//!
//! root.purge_memory(PurgeFlags::DECOMMIT_EMPTY_SPANS);
//! ```
//!
//! ## Cargo Features
//!
//! - `parking_lot`: faster mutexes
//! - `debug`: slot cookies, memory poisoning, allocation backtraces
//! - `diagnostics`: diagnostic output in release builds
//! - `log`: trace super page, direct map and purge events

pub mod allocators;
pub mod api;
pub mod diagnostics;

mod core;
mod sync;
mod util;

#[cfg(feature = "debug")]
pub mod debug;

// Re-export public API at crate root for convenience
pub use allocators::page::{HeapPages, PagePrimitives, SystemPages};
pub use api::config::{FixedRootConfig, GenericRootConfig};
pub use api::error::PartitionError;
pub use api::fixed::FixedRoot;
pub use api::flags::{AllocFlags, PurgeFlags};
pub use api::generic::GenericRoot;
pub use api::stats::{
    CollectingStatsDumper, PartitionBucketMemoryStats, PartitionMemoryStats, PartitionStatsDumper,
};

// Hooks and observers
pub use diagnostics::{AllocationHook, AllocationObserver, FreeHook, PartitionAllocHooks};

// Diagnostics - core types, codes and the fatal policy
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_fatal_mode, fatal_mode, FatalMode, FatalModeGuard};
pub use diagnostics::{PA001, PA002, PA003, PA004, PA005, PA006};

#[cfg(feature = "debug")]
pub use debug::{AllocationTrace, BacktraceObserver};
