//! Debug aids: slot cookies, memory poisoning and allocation backtraces.
//!
//! Only compiled when the `debug` feature is enabled.

pub(crate) mod backtrace;
pub(crate) mod cookie;
pub(crate) mod poison;

pub use self::backtrace::{AllocationTrace, BacktraceObserver};
