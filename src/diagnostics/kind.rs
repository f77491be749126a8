//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - the process is about to terminate.
    Error,
    /// A warning - the caller asked for a null return and got one.
    Warning,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `PA00x` - Allocation and free failures
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "PA001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

/// PA001: Requested size overflows.
pub const PA001: Diagnostic = Diagnostic::error(
    "PA001",
    "allocation size overflow"
).with_note("the requested size plus allocator overhead is not representable")
 .with_help("pass AllocFlags::RETURN_NULL or use try_alloc() to handle oversized requests");

/// PA002: Out of memory.
pub const PA002: Diagnostic = Diagnostic::error(
    "PA002",
    "out of memory"
).with_note("the page primitives could not reserve or commit a new span or direct map")
 .with_help("pass AllocFlags::RETURN_NULL or use try_alloc() to recover from exhaustion");

/// PA003: Free of a pointer this partition does not own.
pub const PA003: Diagnostic = Diagnostic::error(
    "PA003",
    "invalid free"
).with_note("the pointer does not resolve to a live slot or direct map of this root")
 .with_help("free pointers only on the root that allocated them, and only once");

/// PA004: Free list integrity check failed.
pub const PA004: Diagnostic = Diagnostic::error(
    "PA004",
    "corrupted free list"
).with_note("a free-list link points outside its slot span")
 .with_help("this usually means a use-after-free or buffer overflow in the caller");

/// PA005: Slot cookie overwritten.
pub const PA005: Diagnostic = Diagnostic::error(
    "PA005",
    "slot cookie mismatch"
).with_note("bytes just before or after an allocation were overwritten")
 .with_help("look for buffer overruns on the reported allocation");

/// PA006: Hook installed twice.
pub const PA006: Diagnostic = Diagnostic::error(
    "PA006",
    "allocation hook already installed"
).with_note("hooks are single-writer; chaining is not supported")
 .with_help("clear the existing hook with None before installing a new one");
