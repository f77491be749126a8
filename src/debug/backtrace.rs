//! Allocation backtrace tracking.
//!
//! [`BacktraceObserver`] records a stack trace for every live allocation of
//! the root it is attached to, which makes leak reports point at call sites.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::diagnostics::hooks::AllocationObserver;
use crate::sync::mutex::Mutex;

/// A captured backtrace for a live allocation.
#[derive(Clone)]
pub struct AllocationTrace {
    /// The allocation address
    pub address: usize,

    /// Requested size
    pub size: usize,

    /// Type name passed to `alloc`
    pub type_name: &'static str,

    /// Captured backtrace (as string for simplicity)
    pub backtrace: String,

    /// Allocation sequence number, in observation order
    pub sequence: u64,
}

/// Observer that keeps a backtrace per live allocation.
pub struct BacktraceObserver {
    traces: Mutex<HashMap<usize, AllocationTrace>>,
    sequence: AtomicU64,
}

impl BacktraceObserver {
    /// Create a new backtrace observer.
    pub fn new() -> Self {
        Self {
            traces: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Get the trace for an address (if live).
    pub fn get_trace(&self, address: usize) -> Option<AllocationTrace> {
        self.traces.lock().get(&address).cloned()
    }

    /// All live allocations, oldest first.
    pub fn live_allocations(&self) -> Vec<AllocationTrace> {
        let mut live: Vec<_> = self.traces.lock().values().cloned().collect();
        live.sort_by_key(|trace| trace.sequence);
        live
    }

    /// Render a leak report.
    pub fn leak_report(&self) -> String {
        use std::fmt::Write;

        let live = self.live_allocations();
        if live.is_empty() {
            return "[partalloc] No live allocations (no leaks detected)\n".to_owned();
        }

        let mut report = String::new();
        let _ = writeln!(report, "[partalloc] Leak report: {} live allocations", live.len());
        for trace in &live {
            let _ = writeln!(
                report,
                "  Address: 0x{:x}, Size: {} bytes, Type: {}",
                trace.address, trace.size, trace.type_name
            );
            let _ = writeln!(report, "{}", trace.backtrace);
        }
        report
    }

    /// Print the leak report to stderr.
    pub fn print_leak_report(&self) {
        eprint!("{}", self.leak_report());
    }
}

impl Default for BacktraceObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationObserver for BacktraceObserver {
    fn on_allocation(&self, address: NonNull<u8>, size: usize, type_name: &'static str) {
        let trace = AllocationTrace {
            address: address.as_ptr() as usize,
            size,
            type_name,
            backtrace: capture_backtrace(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.traces.lock().insert(trace.address, trace);
    }

    fn on_free(&self, address: NonNull<u8>) {
        self.traces.lock().remove(&(address.as_ptr() as usize));
    }
}

/// Resolve the current stack into a printable string.
pub(crate) fn capture_backtrace() -> String {
    format!("{:?}", ::backtrace::Backtrace::new())
}
