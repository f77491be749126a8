//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr and logs.

use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::{Diagnostic, DiagnosticKind};

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Global flag to report recovered failures as warnings.
static VERBOSE_DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Also report failures that were returned to the caller as null.
pub fn set_verbose(verbose: bool) {
    VERBOSE_DIAGNOSTICS.store(verbose, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a fatal diagnostic with runtime context.
///
/// Goes to stderr in debug builds or with the `diagnostics` feature, and to
/// the `log` crate when that feature is enabled.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if is_suppressed() {
        return;
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    {
        emit_to_stderr(diag.kind, diag, context);
    }

    #[cfg(feature = "log")]
    {
        emit_to_log(diag.kind, diag, context);
    }
}

/// Emit a failure that was surfaced to the caller instead of terminating.
///
/// Silent unless verbose diagnostics are on.
pub fn emit_recovered(diag: &Diagnostic, context: &str) {
    if is_suppressed() || !VERBOSE_DIAGNOSTICS.load(Ordering::Relaxed) {
        return;
    }

    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    {
        emit_to_stderr(DiagnosticKind::Warning, diag, context);
    }

    #[cfg(feature = "log")]
    {
        emit_to_log(DiagnosticKind::Warning, diag, context);
    }
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(kind: DiagnosticKind, diag: &Diagnostic, context: &str) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[partalloc][{}] {}: {}",
        diag.code,
        kind.prefix(),
        diag.message
    );
    let _ = writeln!(stderr, "  context: {}", context);

    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }

    let _ = writeln!(stderr);
}

#[cfg(feature = "log")]
fn emit_to_log(kind: DiagnosticKind, diag: &Diagnostic, context: &str) {
    match kind {
        DiagnosticKind::Error => {
            log::error!("[{}] {}: {}", diag.code, diag.message, context);
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {}: {}", diag.code, diag.message, context);
        }
    }

    if let Some(note) = diag.note {
        log::info!("  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::info!("  help: {}", help);
    }
}
