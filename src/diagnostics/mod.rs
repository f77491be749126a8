//! Diagnostics, hooks and the fail-fast policy.
//!
//! This module provides:
//! - **Coded diagnostics**: every fatal allocator error maps to a `PAxxx` code
//! - **Hooks**: per-root observers and process-wide allocation/free hooks
//! - **Fatal mode**: abort (default) or panic when metadata integrity is lost
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | PA001 | Size overflow                  |
//! | PA002 | Out of memory                  |
//! | PA003 | Invalid free                   |
//! | PA004 | Corrupted free list            |
//! | PA005 | Slot cookie mismatch           |
//! | PA006 | Hook installed twice           |

pub mod emit;
pub mod fatal;
pub mod hooks;
pub mod kind;

pub use emit::{set_verbose, suppress_diagnostics};
pub use fatal::{fatal_mode, init_from_env, set_fatal_mode, FatalMode, FatalModeGuard};
pub use hooks::{AllocationHook, AllocationObserver, FreeHook, PartitionAllocHooks};
pub use kind::{Diagnostic, DiagnosticKind};
pub use kind::{PA001, PA002, PA003, PA004, PA005, PA006};
