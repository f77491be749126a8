//! Allocation error kinds.

use crate::diagnostics::kind::{Diagnostic, PA001, PA002, PA003, PA004, PA005, PA006};

/// Everything that can go wrong inside a partition.
///
/// Only [`SizeOverflow`](Self::SizeOverflow) and
/// [`AllocationFailure`](Self::AllocationFailure) can be surfaced to callers
/// (via `AllocFlags::RETURN_NULL` or the `try_*` methods). Every other kind
/// means allocator metadata can no longer be trusted and is always fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// Requested size plus overhead does not fit, or exceeds the root maximum.
    SizeOverflow { size: usize },

    /// The page primitives could not reserve or commit memory.
    AllocationFailure { size: usize },

    /// Pointer does not resolve to a live slot of this root.
    InvalidFree { address: usize },

    /// A free-list link points outside its owning span.
    CorruptedFreeList { span_base: usize, entry: usize },

    /// A slot's guard cookie was overwritten (debug builds only).
    CookieMismatch { address: usize },

    /// A process-wide hook was installed over an existing one.
    HookAlreadyInstalled { hook: &'static str },
}

impl PartitionError {
    /// Whether the caller may opt into seeing this error instead of dying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SizeOverflow { .. } | Self::AllocationFailure { .. })
    }

    /// The coded diagnostic describing this error.
    pub fn diagnostic(&self) -> &'static Diagnostic {
        match self {
            Self::SizeOverflow { .. } => &PA001,
            Self::AllocationFailure { .. } => &PA002,
            Self::InvalidFree { .. } => &PA003,
            Self::CorruptedFreeList { .. } => &PA004,
            Self::CookieMismatch { .. } => &PA005,
            Self::HookAlreadyInstalled { .. } => &PA006,
        }
    }
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeOverflow { size } => {
                write!(f, "allocation size {} exceeds the partition maximum", size)
            }
            Self::AllocationFailure { size } => {
                write!(f, "out of memory while allocating {} bytes", size)
            }
            Self::InvalidFree { address } => {
                write!(f, "pointer {:#x} is not a live allocation of this partition", address)
            }
            Self::CorruptedFreeList { span_base, entry } => write!(
                f,
                "free list of span {:#x} links to {:#x}, outside the span",
                span_base, entry
            ),
            Self::CookieMismatch { address } => {
                write!(f, "guard cookie around {:#x} was overwritten", address)
            }
            Self::HookAlreadyInstalled { hook } => {
                write!(f, "a {} hook is already installed", hook)
            }
        }
    }
}

impl std::error::Error for PartitionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(PartitionError::SizeOverflow { size: 1 }.is_recoverable());
        assert!(PartitionError::AllocationFailure { size: 1 }.is_recoverable());
        assert!(!PartitionError::InvalidFree { address: 0x10 }.is_recoverable());
        assert!(!PartitionError::CorruptedFreeList { span_base: 0, entry: 8 }.is_recoverable());
    }

    #[test]
    fn test_display_and_codes() {
        let err = PartitionError::InvalidFree { address: 0x1000 };
        assert_eq!(err.to_string(), "pointer 0x1000 is not a live allocation of this partition");
        assert_eq!(err.diagnostic().code, "PA003");
    }
}
