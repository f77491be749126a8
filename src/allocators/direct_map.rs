//! Direct maps: one dedicated reservation per oversized allocation.
//!
//! Nothing here is pooled. Freeing a direct map releases its reservation
//! immediately.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::api::error::PartitionError;
use crate::core::geometry::PageGeometry;
use crate::util::layout::checked_align_up;

use super::page::PagePrimitives;

/// One live direct mapping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DirectMapExtent {
    /// Start of the reservation; also the slot address
    pub base: NonNull<u8>,

    /// Reserved bytes, a multiple of the partition page
    pub reserved: usize,

    /// Committed bytes, a multiple of the system page; the slot size
    pub committed: usize,
}

/// Every live direct map of a partition, keyed by slot address.
#[derive(Default)]
pub(crate) struct DirectMaps {
    extents: HashMap<usize, DirectMapExtent>,

    /// Sum of `reserved` over all extents
    reserved_bytes: usize,

    /// Sum of `committed` over all extents
    committed_bytes: usize,
}

impl DirectMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes
    }

    /// Slot size a direct map of `raw_size` bytes would get.
    pub fn slot_size(geometry: &PageGeometry, raw_size: usize) -> Option<usize> {
        checked_align_up(raw_size, geometry.system_page)
    }

    /// Map a new region able to hold `raw_size` bytes.
    pub fn map<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
        geometry: &PageGeometry,
        raw_size: usize,
    ) -> Result<NonNull<u8>, PartitionError> {
        let overflow = PartitionError::SizeOverflow { size: raw_size };
        let committed = Self::slot_size(geometry, raw_size).ok_or(overflow)?;
        let reserved = checked_align_up(committed, geometry.partition_page).ok_or(overflow)?;

        let failure = PartitionError::AllocationFailure { size: raw_size };
        let base = pages.reserve(reserved, geometry.partition_page).ok_or(failure)?;
        // SAFETY: `base` is the reservation we just made.
        unsafe {
            if !pages.commit(base, committed) {
                pages.release(base, reserved);
                return Err(failure);
            }
        }

        #[cfg(feature = "log")]
        log::trace!(
            "partalloc: direct map {:#x} ({} committed)",
            base.as_ptr() as usize,
            crate::util::size::format_bytes(committed)
        );

        self.extents.insert(
            base.as_ptr() as usize,
            DirectMapExtent {
                base,
                reserved,
                committed,
            },
        );
        self.reserved_bytes += reserved;
        self.committed_bytes += committed;
        Ok(base)
    }

    #[inline]
    pub fn get(&self, addr: usize) -> Option<&DirectMapExtent> {
        self.extents.get(&addr)
    }

    /// Release the mapping at `addr`. Returns false if there is none.
    ///
    /// # Safety
    ///
    /// The mapping's contents must not be used afterwards.
    pub unsafe fn unmap<P: PagePrimitives + ?Sized>(&mut self, pages: &P, addr: usize) -> bool {
        let Some(extent) = self.extents.remove(&addr) else {
            return false;
        };
        self.reserved_bytes -= extent.reserved;
        self.committed_bytes -= extent.committed;
        pages.release(extent.base, extent.reserved);

        #[cfg(feature = "log")]
        log::trace!("partalloc: released direct map {:#x}", addr);

        true
    }

    /// Grow or shrink the committed part of a mapping without moving it.
    ///
    /// Returns false when `new_committed` does not fit the reservation or
    /// committing the extra pages fails; the mapping is then unchanged.
    ///
    /// # Safety
    ///
    /// When shrinking, the bytes past `new_committed` must hold no live data.
    pub unsafe fn resize_in_place<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
        addr: usize,
        new_committed: usize,
    ) -> bool {
        let Some(extent) = self.extents.get_mut(&addr) else {
            return false;
        };
        if new_committed > extent.reserved {
            return false;
        }

        let base = extent.base.as_ptr();
        if new_committed > extent.committed {
            let grow = new_committed - extent.committed;
            let tail = NonNull::new_unchecked(base.add(extent.committed));
            if !pages.commit(tail, grow) {
                return false;
            }
            self.committed_bytes += grow;
        } else if new_committed < extent.committed {
            let shrink = extent.committed - new_committed;
            let tail = NonNull::new_unchecked(base.add(new_committed));
            pages.decommit(tail, shrink);
            self.committed_bytes -= shrink;
        }
        extent.committed = new_committed;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectMapExtent> {
        self.extents.values()
    }

    /// Release every mapping.
    ///
    /// # Safety
    ///
    /// No direct-mapped slot may be used afterwards.
    pub unsafe fn release_all<P: PagePrimitives + ?Sized>(&mut self, pages: &P) {
        for (_, extent) in self.extents.drain() {
            pages.release(extent.base, extent.reserved);
        }
        self.reserved_bytes = 0;
        self.committed_bytes = 0;
    }
}

// SAFETY: extents only record addresses of reservations owned by this table.
unsafe impl Send for DirectMaps {}
