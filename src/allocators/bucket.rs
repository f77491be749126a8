//! Buckets: the slot spans of one size class and their lifecycle.
//!
//! A span is on exactly one list at a time:
//! - active: allocation targets, each with a free or unprovisioned slot
//! - empty: no live slots, pages still committed
//! - decommitted: no live slots, pages returned to the OS
//!
//! Full spans are parked off-list and only counted. Every alloc and free
//! reclassifies its span immediately.

use std::ptr::NonNull;

use crate::api::error::PartitionError;
use crate::api::stats::PartitionBucketMemoryStats;

use super::page::PagePrimitives;
use super::span::{SlotSpan, SpanArena, SpanId, SpanList, SpanState};
use super::superpage::SuperPages;

/// What a bucket borrows from its partition to acquire and retire spans.
pub(crate) struct SpanPool<'a, P: ?Sized> {
    pub pages: &'a P,
    pub super_pages: &'a mut SuperPages,
    pub arena: &'a mut SpanArena,
}

impl<P: PagePrimitives + ?Sized> SpanPool<'_, P> {
    #[inline]
    fn system_page(&self) -> usize {
        self.pages.page_size()
    }
}

/// One size class.
#[derive(Debug)]
pub(crate) struct Bucket {
    /// Slot size served by this bucket
    pub slot_size: usize,

    /// Length of each span, in system pages
    pub num_system_pages_per_span: usize,

    /// Pseudo buckets are never selected by a lookup
    pub enabled: bool,

    active: SpanList,
    empty: SpanList,
    decommitted: SpanList,

    /// Spans with every slot allocated
    num_full_spans: usize,
}

impl Bucket {
    pub fn new(slot_size: usize, num_system_pages_per_span: usize, enabled: bool) -> Self {
        Self {
            slot_size,
            num_system_pages_per_span,
            enabled,
            active: SpanList::new(),
            empty: SpanList::new(),
            decommitted: SpanList::new(),
            num_full_spans: 0,
        }
    }

    /// Whether this bucket has ever acquired a span.
    pub fn has_spans(&self) -> bool {
        self.active.len() + self.empty.len() + self.decommitted.len() + self.num_full_spans > 0
    }

    /// Allocate one slot.
    pub fn alloc<P: PagePrimitives + ?Sized>(
        &mut self,
        index: usize,
        pool: &mut SpanPool<'_, P>,
    ) -> Result<NonNull<u8>, PartitionError> {
        let id = match self.active.head() {
            Some(id) => id,
            None => self.acquire_span(index, pool)?,
        };

        let system_page = pool.system_page();
        let span = pool.arena.get_mut(id);
        debug_assert_eq!(span.state, SpanState::Active);
        let slot = span.take_slot(system_page)?;

        if !span.has_capacity() {
            span.state = SpanState::Full;
            self.active.remove(pool.arena, id);
            self.num_full_spans += 1;
        }
        Ok(slot)
    }

    /// Return a slot already validated against span `id`.
    ///
    /// # Safety
    ///
    /// `slot` must be a live slot of span `id`, which belongs to this bucket.
    pub unsafe fn free(&mut self, arena: &mut SpanArena, id: SpanId, slot: NonNull<u8>) {
        let span = arena.get_mut(id);
        let was_full = span.state == SpanState::Full;
        span.give_back(slot);
        let now_empty = span.num_allocated == 0;

        if was_full {
            self.num_full_spans -= 1;
            if now_empty {
                arena.get_mut(id).state = SpanState::Empty;
                self.empty.push_front(arena, id);
            } else {
                arena.get_mut(id).state = SpanState::Active;
                self.active.push_front(arena, id);
            }
        } else if now_empty {
            self.active.remove(arena, id);
            arena.get_mut(id).state = SpanState::Empty;
            self.empty.push_front(arena, id);
        }
    }

    /// Decommit every empty span. Returns the bytes decommitted.
    pub fn decommit_empty<P: PagePrimitives + ?Sized>(&mut self, pool: &mut SpanPool<'_, P>) -> usize {
        let system_page = pool.system_page();
        let mut decommitted = 0;

        while let Some(id) = self.empty.pop_front(pool.arena) {
            let span = pool.arena.get_mut(id);
            let bytes = span.span_bytes(system_page);
            // SAFETY: the span was on the empty list, so no slot is live.
            unsafe { pool.super_pages.decommit(pool.pages, span.base, bytes) };
            span.reset_after_decommit();
            span.state = SpanState::Decommitted;
            self.decommitted.push_front(pool.arena, id);
            decommitted += bytes;
        }
        decommitted
    }

    /// Discard unused system pages of every active span. Returns the bytes
    /// discarded.
    pub fn discard_active<P: PagePrimitives + ?Sized>(
        &mut self,
        pool: &mut SpanPool<'_, P>,
    ) -> Result<usize, PartitionError> {
        let system_page = pool.system_page();
        let mut discarded = 0;

        for id in self.active.ids(pool.arena) {
            let span = pool.arena.get_mut(id);
            let plan = span.plan_discard(system_page)?;
            span.trim_to(&plan);
            for &(offset, len) in &plan.ranges {
                // SAFETY: planned ranges hold no live data and lie inside
                // the committed span.
                unsafe {
                    let addr = NonNull::new_unchecked(span.base.as_ptr().add(offset));
                    pool.pages.discard(addr, len);
                }
            }
            discarded += plan.discardable_bytes();
        }
        Ok(discarded)
    }

    /// Usage of this bucket, or `None` if it never acquired a span.
    pub fn stats(
        &self,
        arena: &SpanArena,
        system_page: usize,
    ) -> Result<Option<PartitionBucketMemoryStats>, PartitionError> {
        if !self.has_spans() {
            return Ok(None);
        }

        let span_bytes = self.num_system_pages_per_span * system_page;
        let mut stats = PartitionBucketMemoryStats {
            is_direct_map: false,
            bucket_slot_size: self.slot_size,
            allocated_span_size: span_bytes,
            num_full_spans: self.num_full_spans,
            num_active_spans: self.active.len(),
            num_empty_spans: self.empty.len(),
            num_decommitted_spans: self.decommitted.len(),
            ..PartitionBucketMemoryStats::default()
        };

        if self.num_full_spans > 0 {
            let slots_per_span = span_bytes / self.slot_size;
            let full_resident = crate::util::layout::align_up(slots_per_span * self.slot_size, system_page);
            stats.active_bytes += self.num_full_spans * slots_per_span * self.slot_size;
            stats.resident_bytes += self.num_full_spans * full_resident;
        }

        for id in self.active.ids(arena) {
            let span = arena.get(id);
            stats.active_bytes += span.num_allocated * span.slot_size;
            stats.resident_bytes += span.resident_bytes(system_page);
            stats.discardable_bytes += span.plan_discard(system_page)?.discardable_bytes();
        }

        for id in self.empty.ids(arena) {
            let resident = arena.get(id).resident_bytes(system_page);
            stats.resident_bytes += resident;
            stats.decommittable_bytes += resident;
        }

        Ok(Some(stats))
    }

    /// Find a span to allocate from once the active list has run dry.
    fn acquire_span<P: PagePrimitives + ?Sized>(
        &mut self,
        index: usize,
        pool: &mut SpanPool<'_, P>,
    ) -> Result<SpanId, PartitionError> {
        let system_page = pool.system_page();

        let id = if let Some(id) = self.empty.pop_front(pool.arena) {
            id
        } else if let Some(id) = self.decommitted.head() {
            let span = pool.arena.get(id);
            let (base, bytes) = (span.base, span.span_bytes(system_page));
            pool.super_pages.recommit(pool.pages, base, bytes)?;
            self.decommitted.remove(pool.arena, id);
            id
        } else {
            let bytes = self.num_system_pages_per_span * system_page;
            let base = pool.super_pages.carve(pool.pages, bytes)?;
            let span = SlotSpan::new(index, base, self.slot_size, self.num_system_pages_per_span, system_page);
            let id = pool.arena.insert(span);
            pool.super_pages.register(base, bytes, id);
            id
        };

        pool.arena.get_mut(id).state = SpanState::Active;
        self.active.push_front(pool.arena, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::page::HeapPages;
    use crate::core::geometry::PageGeometry;

    struct Fixture {
        pages: HeapPages,
        super_pages: SuperPages,
        arena: SpanArena,
    }

    impl Fixture {
        fn new() -> Self {
            let pages = HeapPages::new();
            let super_pages = SuperPages::new(PageGeometry::new(pages.page_size()));
            Self {
                pages,
                super_pages,
                arena: SpanArena::new(),
            }
        }

        fn pool(&mut self) -> SpanPool<'_, HeapPages> {
            SpanPool {
                pages: &self.pages,
                super_pages: &mut self.super_pages,
                arena: &mut self.arena,
            }
        }

        fn free(&mut self, bucket: &mut Bucket, slot: NonNull<u8>) {
            let id = self.super_pages.lookup(slot.as_ptr() as usize).unwrap();
            self.arena.get(id).validate_live_slot(slot.as_ptr() as usize).unwrap();
            unsafe { bucket.free(&mut self.arena, id, slot) };
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            unsafe { self.super_pages.release_all(&self.pages) };
        }
    }

    #[test]
    fn test_single_slot_span_lifecycle() {
        let mut fixture = Fixture::new();
        // 64 KB + 4 KB: one slot per span.
        let mut bucket = Bucket::new(69_632, 17, true);

        let a = bucket.alloc(0, &mut fixture.pool()).unwrap();
        assert_eq!(bucket.num_full_spans, 1);
        assert_eq!(bucket.active.len(), 0);

        fixture.free(&mut bucket, a);
        assert_eq!(bucket.num_full_spans, 0);
        assert_eq!(bucket.empty.len(), 1);

        // Empty spans are reused before new ones are carved.
        let b = bucket.alloc(0, &mut fixture.pool()).unwrap();
        assert_eq!(a, b);
        assert_eq!(fixture.super_pages.committed_bytes(), 17 * 4096);
    }

    #[test]
    fn test_full_span_returns_to_active() {
        let mut fixture = Fixture::new();
        let mut bucket = Bucket::new(4096, 4, true);

        let slots: Vec<_> = (0..4).map(|_| bucket.alloc(0, &mut fixture.pool()).unwrap()).collect();
        assert_eq!(bucket.num_full_spans, 1);

        fixture.free(&mut bucket, slots[2]);
        assert_eq!(bucket.num_full_spans, 0);
        assert_eq!(bucket.active.len(), 1);
        assert_eq!(bucket.alloc(0, &mut fixture.pool()).unwrap(), slots[2]);
    }

    #[test]
    fn test_decommit_and_reclaim() {
        let mut fixture = Fixture::new();
        let mut bucket = Bucket::new(1024, 4, true);

        let a = bucket.alloc(0, &mut fixture.pool()).unwrap();
        fixture.free(&mut bucket, a);

        let decommitted = bucket.decommit_empty(&mut fixture.pool());
        assert_eq!(decommitted, 4 * 4096);
        assert_eq!(bucket.decommitted.len(), 1);
        assert_eq!(fixture.super_pages.committed_bytes(), 0);
        assert_eq!(bucket.decommit_empty(&mut fixture.pool()), 0);

        let b = bucket.alloc(0, &mut fixture.pool()).unwrap();
        assert_eq!(a, b);
        assert_eq!(bucket.decommitted.len(), 0);
        assert_eq!(fixture.super_pages.committed_bytes(), 4 * 4096);
    }

    #[test]
    fn test_stats_counts_states() {
        let mut fixture = Fixture::new();
        let mut bucket = Bucket::new(4096, 4, true);

        let full: Vec<_> = (0..4).map(|_| bucket.alloc(0, &mut fixture.pool()).unwrap()).collect();
        let partial = bucket.alloc(0, &mut fixture.pool()).unwrap();
        let _ = full;

        let stats = bucket.stats(&fixture.arena, 4096).unwrap().unwrap();
        assert_eq!(stats.num_full_spans, 1);
        assert_eq!(stats.num_active_spans, 1);
        assert_eq!(stats.active_bytes, 5 * 4096);

        fixture.free(&mut bucket, partial);
        let stats = bucket.stats(&fixture.arena, 4096).unwrap().unwrap();
        assert_eq!(stats.num_empty_spans, 1);
        assert_eq!(stats.decommittable_bytes, 4096);
    }

    #[test]
    fn test_unused_bucket_has_no_stats() {
        let fixture = Fixture::new();
        let bucket = Bucket::new(64, 4, true);
        assert!(bucket.stats(&fixture.arena, 4096).unwrap().is_none());
    }
}
