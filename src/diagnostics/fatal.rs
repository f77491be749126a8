//! Fail-fast handling for unrecoverable allocator errors.
//!
//! Allocator corruption is never survivable, so fatal errors end the
//! process. How they end it is configurable:
//! - Abort: emit the diagnostic and `abort()` (default)
//! - Panic: emit the diagnostic and panic, so tests can observe it

use std::sync::atomic::{AtomicU8, Ordering};

use crate::api::error::PartitionError;

use super::emit::emit_with_context;

/// What happens after a fatal diagnostic is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FatalMode {
    /// Abort the process.
    Abort = 0,
    /// Panic on the calling thread.
    Panic = 1,
}

impl From<u8> for FatalMode {
    fn from(val: u8) -> Self {
        match val {
            1 => FatalMode::Panic,
            _ => FatalMode::Abort,
        }
    }
}

/// Global fatal mode setting.
static FATAL_MODE: AtomicU8 = AtomicU8::new(0);

/// Set the fatal mode.
pub fn set_fatal_mode(mode: FatalMode) {
    FATAL_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current fatal mode.
pub fn fatal_mode() -> FatalMode {
    FatalMode::from(FATAL_MODE.load(Ordering::Relaxed))
}

/// RAII guard for temporarily setting the fatal mode.
pub struct FatalModeGuard {
    previous: FatalMode,
}

impl FatalModeGuard {
    /// Create a new guard that sets the fatal mode.
    pub fn new(mode: FatalMode) -> Self {
        let previous = fatal_mode();
        set_fatal_mode(mode);
        Self { previous }
    }

    /// Create a guard that turns fatal errors into panics.
    pub fn panic() -> Self {
        Self::new(FatalMode::Panic)
    }
}

impl Drop for FatalModeGuard {
    fn drop(&mut self) {
        set_fatal_mode(self.previous);
    }
}

/// Initialize the fatal mode from the environment.
///
/// Checks the `PARTALLOC_FATAL` environment variable:
/// - "abort" or "0" -> Abort
/// - "panic" or "1" -> Panic
pub fn init_from_env() {
    if let Ok(val) = std::env::var("PARTALLOC_FATAL") {
        let mode = match val.to_lowercase().as_str() {
            "1" | "panic" => FatalMode::Panic,
            _ => FatalMode::Abort,
        };
        set_fatal_mode(mode);
    }
}

/// Report a fatal error and terminate according to the fatal mode.
#[cold]
#[inline(never)]
pub(crate) fn terminate(error: &PartitionError) -> ! {
    let context = error.to_string();

    #[cfg(feature = "debug")]
    let context = format!(
        "{}\n{}",
        context,
        crate::debug::backtrace::capture_backtrace()
    );

    emit_with_context(error.diagnostic(), &context);

    match fatal_mode() {
        FatalMode::Panic => panic!("[partalloc][{}] {}", error.diagnostic().code, error),
        FatalMode::Abort => std::process::abort(),
    }
}

/// Surface a recoverable error or terminate.
///
/// Recoverable errors come back as `Err` only when `return_null` is set.
pub(crate) fn resolve<T>(
    result: Result<T, PartitionError>,
    return_null: bool,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) if return_null && error.is_recoverable() => {
            super::emit::emit_recovered(error.diagnostic(), &error.to_string());
            None
        }
        Err(error) => terminate(&error),
    }
}

/// Hand recoverable errors back to the caller; terminate on the rest.
pub(crate) fn surface<T>(result: Result<T, PartitionError>) -> Result<T, PartitionError> {
    match result {
        Err(error) if !error.is_recoverable() => terminate(&error),
        other => other,
    }
}

/// Unwrap a result, terminating on any error.
pub(crate) fn or_terminate<T>(result: Result<T, PartitionError>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => terminate(&error),
    }
}
