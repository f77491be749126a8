//! The partition engine shared by both roots.
//!
//! A partition owns its buckets, the span arena, the super-page index and
//! the direct-map table. It knows nothing about locking or hooks; roots
//! wrap it with whichever concurrency policy they promise.

use std::ptr::NonNull;

use crate::api::error::PartitionError;
use crate::api::flags::PurgeFlags;
use crate::api::stats::{PartitionBucketMemoryStats, PartitionMemoryStats, PartitionStatsDumper};
use crate::core::geometry::PageGeometry;
use crate::core::size_class::{BucketLookup, SizeClassTable};

use super::bucket::{Bucket, SpanPool};
use super::direct_map::DirectMaps;
use super::page::PagePrimitives;
use super::span::{SpanArena, SpanId};
use super::superpage::SuperPages;

#[cfg(feature = "debug")]
use crate::debug::cookie::{cookie_intact, write_cookie, COOKIE_SIZE};

/// Bytes each slot spends on bookkeeping around the caller's data.
#[cfg(feature = "debug")]
pub(crate) const EXTRAS: usize = 2 * COOKIE_SIZE;
#[cfg(not(feature = "debug"))]
pub(crate) const EXTRAS: usize = 0;

/// Offset of the caller's pointer from the slot start.
const PREFIX: usize = EXTRAS / 2;

/// Where a caller pointer lives.
#[derive(Debug, Clone, Copy)]
enum Owner {
    Span(SpanId),
    DirectMap,
}

/// A validated live slot.
#[derive(Debug, Clone, Copy)]
struct LiveSlot {
    owner: Owner,
    slot: NonNull<u8>,
    slot_size: usize,
}

/// Buckets, spans and direct maps behind one root.
pub(crate) struct Partition<S, P: PagePrimitives> {
    sizes: S,
    pages: P,
    geometry: PageGeometry,
    buckets: Vec<Bucket>,
    arena: SpanArena,
    super_pages: SuperPages,
    direct_maps: DirectMaps,
}

impl<S: SizeClassTable, P: PagePrimitives> Partition<S, P> {
    pub fn new(sizes: S, pages: P) -> Self {
        let geometry = PageGeometry::new(pages.page_size());
        let buckets = sizes
            .buckets()
            .into_iter()
            .map(|spec| {
                assert!(
                    !spec.enabled || spec.slot_size <= geometry.max_pooled_slot_size(),
                    "bucket of {} bytes does not fit a super page",
                    spec.slot_size
                );
                Bucket::new(
                    spec.slot_size,
                    geometry.system_pages_per_slot_span(spec.slot_size),
                    spec.enabled,
                )
            })
            .collect();

        Self {
            sizes,
            pages,
            geometry,
            buckets,
            arena: SpanArena::new(),
            super_pages: SuperPages::new(geometry),
            direct_maps: DirectMaps::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.geometry.system_page
    }

    /// Usable size the partition would hand back for `size`.
    ///
    /// Sizes the partition can never serve come back unchanged.
    pub fn actual_size(&self, size: usize) -> usize {
        let Some(raw) = size.checked_add(EXTRAS) else {
            return size;
        };
        match self.sizes.lookup(raw) {
            BucketLookup::Bucket(index) => self.buckets[index].slot_size - EXTRAS,
            BucketLookup::DirectMap => match DirectMaps::slot_size(&self.geometry, raw) {
                Some(slot_size) => slot_size - EXTRAS,
                None => size,
            },
            BucketLookup::TooLarge => size,
        }
    }

    /// Allocate `size` usable bytes.
    pub fn alloc(&mut self, size: usize, zero_fill: bool) -> Result<NonNull<u8>, PartitionError> {
        let raw = size
            .checked_add(EXTRAS)
            .ok_or(PartitionError::SizeOverflow { size })?;

        let (slot, slot_size) = match self.sizes.lookup(raw) {
            BucketLookup::Bucket(index) => {
                debug_assert!(self.buckets[index].enabled);
                let mut pool = SpanPool {
                    pages: &self.pages,
                    super_pages: &mut self.super_pages,
                    arena: &mut self.arena,
                };
                let slot = self.buckets[index].alloc(index, &mut pool)?;
                (slot, self.buckets[index].slot_size)
            }
            BucketLookup::DirectMap => {
                let slot = self.direct_maps.map(&self.pages, &self.geometry, raw)?;
                let committed = self
                    .direct_maps
                    .get(slot.as_ptr() as usize)
                    .map_or(raw, |extent| extent.committed);
                (slot, committed)
            }
            BucketLookup::TooLarge => return Err(PartitionError::SizeOverflow { size }),
        };

        // SAFETY: the slot is committed, caller-owned and `slot_size` long.
        unsafe {
            let user = slot.as_ptr().add(PREFIX);
            let usable = slot_size - EXTRAS;

            #[cfg(feature = "debug")]
            {
                write_cookie(slot.as_ptr());
                write_cookie(user.add(usable));
                if !zero_fill {
                    crate::debug::poison::poison_uninit(user, usable);
                }
            }

            if zero_fill {
                std::ptr::write_bytes(user, 0, usable);
            }
            Ok(NonNull::new_unchecked(user))
        }
    }

    /// Check that `ptr` is a live allocation without touching it.
    pub fn validate(&self, ptr: NonNull<u8>) -> Result<(), PartitionError> {
        self.resolve(ptr).map(|_| ())
    }

    /// Usable size of a live allocation.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, PartitionError> {
        Ok(self.resolve(ptr)?.slot_size - EXTRAS)
    }

    /// Free a live allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must not be used after this returns `Ok`.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), PartitionError> {
        let live = self.resolve(ptr)?;

        #[cfg(feature = "debug")]
        crate::debug::poison::poison_freed(ptr.as_ptr(), live.slot_size - EXTRAS);

        match live.owner {
            Owner::Span(id) => {
                let bucket = self.arena.get(id).bucket;
                self.buckets[bucket].free(&mut self.arena, id, live.slot);
            }
            Owner::DirectMap => {
                self.direct_maps.unmap(&self.pages, live.slot.as_ptr() as usize);
            }
        }
        Ok(())
    }

    /// Resize a live allocation, moving it if needed.
    ///
    /// On error the original allocation is untouched.
    ///
    /// # Safety
    ///
    /// If the returned pointer differs from `ptr`, `ptr` is freed.
    pub unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, PartitionError> {
        let live = self.resolve(ptr)?;
        let old_usable = live.slot_size - EXTRAS;

        if let Owner::DirectMap = live.owner {
            if self.resize_direct_map(live, new_size) {
                return Ok(ptr);
            }
        }

        if self.actual_size(new_size) == old_usable {
            return Ok(ptr);
        }

        let new_ptr = self.alloc(new_size, false)?;
        std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_usable.min(new_size));
        self.free(ptr)?;
        Ok(new_ptr)
    }

    /// Give memory back to the OS.
    pub fn purge(&mut self, flags: PurgeFlags) -> Result<(), PartitionError> {
        let mut pool = SpanPool {
            pages: &self.pages,
            super_pages: &mut self.super_pages,
            arena: &mut self.arena,
        };
        #[cfg(feature = "log")]
        let (mut decommitted, mut discarded) = (0, 0);

        for bucket in &mut self.buckets {
            if flags.contains(PurgeFlags::DECOMMIT_EMPTY_SPANS) {
                #[cfg_attr(not(feature = "log"), allow(unused_variables))]
                let bytes = bucket.decommit_empty(&mut pool);
                #[cfg(feature = "log")]
                {
                    decommitted += bytes;
                }
            }
            if flags.contains(PurgeFlags::DISCARD_UNUSED_SYSTEM_PAGES) {
                #[cfg_attr(not(feature = "log"), allow(unused_variables))]
                let bytes = bucket.discard_active(&mut pool)?;
                #[cfg(feature = "log")]
                {
                    discarded += bytes;
                }
            }
        }

        #[cfg(feature = "log")]
        log::debug!(
            "partalloc: purge decommitted {}, discarded {}",
            crate::util::size::format_bytes(decommitted),
            crate::util::size::format_bytes(discarded)
        );

        Ok(())
    }

    /// Report usage to `dumper`.
    ///
    /// Light dumps skip the per-bucket records.
    pub fn dump_stats(
        &self,
        partition_name: &str,
        is_light_dump: bool,
        dumper: &mut dyn PartitionStatsDumper,
    ) -> Result<(), PartitionError> {
        let system_page = self.geometry.system_page;
        let mut totals = PartitionMemoryStats {
            total_mmapped_bytes: self.super_pages.reserved_bytes() + self.direct_maps.reserved_bytes(),
            total_committed_bytes: self.super_pages.committed_bytes() + self.direct_maps.committed_bytes(),
            total_direct_mapped_bytes: self.direct_maps.committed_bytes(),
            num_direct_mappings: self.direct_maps.len(),
            ..PartitionMemoryStats::default()
        };

        for bucket in &self.buckets {
            let Some(stats) = bucket.stats(&self.arena, system_page)? else {
                continue;
            };
            totals.total_resident_bytes += stats.resident_bytes;
            totals.total_active_bytes += stats.active_bytes;
            totals.total_decommittable_bytes += stats.decommittable_bytes;
            totals.total_discardable_bytes += stats.discardable_bytes;
            if !is_light_dump {
                dumper.partitions_dump_bucket_stats(partition_name, &stats);
            }
        }

        for extent in self.direct_maps.iter() {
            totals.total_resident_bytes += extent.committed;
            totals.total_active_bytes += extent.committed;
            if !is_light_dump {
                let stats = PartitionBucketMemoryStats {
                    is_direct_map: true,
                    bucket_slot_size: extent.committed,
                    allocated_span_size: extent.reserved,
                    active_bytes: extent.committed,
                    resident_bytes: extent.committed,
                    num_full_spans: 1,
                    ..PartitionBucketMemoryStats::default()
                };
                dumper.partitions_dump_bucket_stats(partition_name, &stats);
            }
        }

        dumper.partition_dump_totals(partition_name, &totals);
        Ok(())
    }

    /// Map a caller pointer back to its slot, rejecting anything that is not
    /// a live allocation of this partition.
    fn resolve(&self, ptr: NonNull<u8>) -> Result<LiveSlot, PartitionError> {
        let address = ptr.as_ptr() as usize;
        let invalid = PartitionError::InvalidFree { address };
        let slot_addr = address.checked_sub(PREFIX).ok_or(invalid)?;
        let slot = NonNull::new(slot_addr as *mut u8).ok_or(invalid)?;

        let live = if let Some(id) = self.super_pages.lookup(slot_addr) {
            let span = self.arena.get(id);
            span.validate_live_slot(slot_addr)?;
            LiveSlot {
                owner: Owner::Span(id),
                slot,
                slot_size: span.slot_size,
            }
        } else if let Some(extent) = self.direct_maps.get(slot_addr) {
            LiveSlot {
                owner: Owner::DirectMap,
                slot,
                slot_size: extent.committed,
            }
        } else {
            return Err(invalid);
        };

        #[cfg(feature = "debug")]
        // SAFETY: both cookies lie inside the live, committed slot.
        unsafe {
            let end = slot.as_ptr().add(live.slot_size - COOKIE_SIZE);
            if !cookie_intact(slot.as_ptr()) || !cookie_intact(end) {
                return Err(PartitionError::CookieMismatch { address });
            }
        }

        Ok(live)
    }

    /// Resize a direct map in place when the new size still needs one, fits
    /// the reservation, and keeps at least a fifth of the current mapping.
    unsafe fn resize_direct_map(&mut self, live: LiveSlot, new_size: usize) -> bool {
        let Some(raw) = new_size.checked_add(EXTRAS) else {
            return false;
        };
        if self.sizes.lookup(raw) != BucketLookup::DirectMap {
            return false;
        }
        let Some(new_committed) = DirectMaps::slot_size(&self.geometry, raw) else {
            return false;
        };
        if new_committed < live.slot_size / 5 {
            return false;
        }
        if !self
            .direct_maps
            .resize_in_place(&self.pages, live.slot.as_ptr() as usize, new_committed)
        {
            return false;
        }

        #[cfg(feature = "debug")]
        write_cookie(live.slot.as_ptr().add(new_committed - COOKIE_SIZE));

        true
    }
}

impl<S, P: PagePrimitives> Drop for Partition<S, P> {
    fn drop(&mut self) {
        // SAFETY: the partition is going away together with every slot it
        // handed out.
        unsafe {
            self.direct_maps.release_all(&self.pages);
            self.super_pages.release_all(&self.pages);
        }
    }
}
