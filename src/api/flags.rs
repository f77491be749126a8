//! Allocation and purge flags.

bitflags::bitflags! {
    /// Flags for `alloc_flags` and `realloc_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocFlags: u32 {
        /// Return `None` on size overflow or out of memory instead of
        /// terminating.
        const RETURN_NULL = 1 << 0;
        /// Zero the usable bytes of the returned block.
        const ZERO_FILL = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Passes run by `purge_memory`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PurgeFlags: u32 {
        /// Decommit the pages of every empty slot span.
        const DECOMMIT_EMPTY_SPANS = 1 << 0;
        /// Discard unused system pages inside partially used slot spans.
        const DISCARD_UNUSED_SYSTEM_PAGES = 1 << 1;
    }
}
