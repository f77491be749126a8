//! Intrusive free list threaded through unused slots.
//!
//! A free slot's first machine word holds the link to the next free slot.
//! This is the only module that reads or writes those words. Links are
//! stored byte-swapped, and every link followed is checked against the
//! owning span's slot range before it is trusted.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::api::error::PartitionError;

/// Bytes of a free slot owned by the allocator.
pub(crate) const LINK_SIZE: usize = size_of::<usize>();

/// The provisioned slots of a span: `[base, end)` in steps of `slot_size`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotRange {
    pub base: usize,
    pub slot_size: usize,
    pub end: usize,
}

impl SlotRange {
    /// Whether `addr` is the start of a provisioned slot.
    #[inline]
    pub fn contains_slot(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end && (addr - self.base) % self.slot_size == 0
    }

    /// Index of the slot starting at `addr`.
    #[inline]
    pub fn slot_index(&self, addr: usize) -> usize {
        (addr - self.base) / self.slot_size
    }

    /// Number of provisioned slots.
    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.base) / self.slot_size
    }

    fn corrupted(&self, entry: usize) -> PartitionError {
        PartitionError::CorruptedFreeList {
            span_base: self.base,
            entry,
        }
    }
}

/// Head of a span's free list.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<NonNull<u8>>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<NonNull<u8>> {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forget every entry. The slots themselves are untouched.
    pub fn clear(&mut self) {
        self.head = None;
    }

    /// Push a slot onto the list.
    ///
    /// # Safety
    ///
    /// `slot` must be the start of a committed, provisioned slot of the
    /// span owning this list, at least [`LINK_SIZE`] bytes long, and not
    /// in use by a caller.
    #[inline]
    pub unsafe fn push(&mut self, slot: NonNull<u8>) {
        write_link(slot, self.head);
        self.head = Some(slot);
    }

    /// Pop the head, validating the link that becomes the new head.
    #[inline]
    pub fn pop(&mut self, range: &SlotRange) -> Result<Option<NonNull<u8>>, PartitionError> {
        let Some(head) = self.head else {
            return Ok(None);
        };

        // SAFETY: every entry was pushed through `push` or validated below,
        // so `head` is a committed free slot of this span.
        let next = unsafe { read_link(head) };
        if let Some(next) = next {
            let addr = next.as_ptr() as usize;
            if !range.contains_slot(addr) {
                return Err(range.corrupted(addr));
            }
        }

        self.head = next;
        Ok(Some(head))
    }

    /// Walk the whole list and return the index of every free slot.
    ///
    /// Fails on any link outside `range` and on cycles.
    pub fn slot_indices(&self, range: &SlotRange) -> Result<Vec<usize>, PartitionError> {
        let capacity = range.len();
        let mut indices = Vec::new();
        let mut cursor = self.head;

        while let Some(entry) = cursor {
            let addr = entry.as_ptr() as usize;
            if !range.contains_slot(addr) || indices.len() == capacity {
                return Err(range.corrupted(addr));
            }
            indices.push(range.slot_index(addr));
            // SAFETY: `entry` was just checked to be a provisioned slot.
            cursor = unsafe { read_link(entry) };
        }

        Ok(indices)
    }
}

#[inline]
unsafe fn write_link(slot: NonNull<u8>, next: Option<NonNull<u8>>) {
    let encoded = next.map_or(0, |p| p.as_ptr() as usize).swap_bytes();
    slot.as_ptr().cast::<usize>().write_unaligned(encoded);
}

#[inline]
unsafe fn read_link(slot: NonNull<u8>) -> Option<NonNull<u8>> {
    let encoded = slot.as_ptr().cast::<usize>().read_unaligned();
    NonNull::new(encoded.swap_bytes() as *mut u8)
}
