//! Slot spans: committed regions cut into equal slots for one bucket.
//!
//! Spans live in a [`SpanArena`] and are addressed by [`SpanId`]; buckets
//! keep them on doubly-linked [`SpanList`]s threaded through the arena, so
//! moving a span between lists is O(1).

use std::ptr::NonNull;

use crate::api::error::PartitionError;
use crate::util::layout::{align_down, align_up};

use super::freelist::{FreeList, SlotRange, LINK_SIZE};

/// Index of a span in its partition's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SpanId(u32);

impl SpanId {
    #[cfg(test)]
    pub(crate) fn for_tests(index: u32) -> Self {
        Self(index)
    }
}

/// Which bucket list a span is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanState {
    /// Has free or unprovisioned slots and at least one allocation, or is
    /// the freshly acquired allocation target.
    Active,
    /// Every slot allocated; parked off-list.
    Full,
    /// No allocations; pages still committed.
    Empty,
    /// No allocations; pages returned to the OS.
    Decommitted,
}

/// One bit per slot, set while the slot is handed out.
#[derive(Debug, Clone)]
pub(crate) struct LiveSlots {
    words: Box<[u64]>,
}

impl LiveSlots {
    fn new(num_slots: usize) -> Self {
        Self {
            words: vec![0u64; (num_slots + 63) / 64].into_boxed_slice(),
        }
    }

    #[inline]
    fn is_live(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    #[inline]
    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    #[inline]
    fn clear(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }
}

/// One slot span.
#[derive(Debug)]
pub(crate) struct SlotSpan {
    pub bucket: usize,
    pub base: NonNull<u8>,
    pub slot_size: usize,
    pub num_slots: usize,
    pub num_system_pages: usize,
    pub num_allocated: usize,
    pub num_unprovisioned: usize,
    pub freelist: FreeList,
    pub state: SpanState,
    live: LiveSlots,
    prev: Option<SpanId>,
    next: Option<SpanId>,
}

/// What a purge would discard from an active span.
#[derive(Debug, Default)]
pub(crate) struct DiscardPlan {
    /// `(offset, len)` ranges relative to the span base.
    pub ranges: Vec<(usize, usize)>,
    /// Provisioned slot count after trimming the free tail.
    pub new_provisioned: usize,
    /// Free slot indices below `new_provisioned`, ascending.
    pub kept_free: Vec<usize>,
}

impl DiscardPlan {
    pub fn discardable_bytes(&self) -> usize {
        self.ranges.iter().map(|&(_, len)| len).sum()
    }
}

impl SlotSpan {
    pub fn new(
        bucket: usize,
        base: NonNull<u8>,
        slot_size: usize,
        num_system_pages: usize,
        system_page: usize,
    ) -> Self {
        let num_slots = num_system_pages * system_page / slot_size;
        debug_assert!(num_slots > 0);
        Self {
            bucket,
            base,
            slot_size,
            num_slots,
            num_system_pages,
            num_allocated: 0,
            num_unprovisioned: num_slots,
            freelist: FreeList::new(),
            state: SpanState::Active,
            live: LiveSlots::new(num_slots),
            prev: None,
            next: None,
        }
    }

    #[inline]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn provisioned(&self) -> usize {
        self.num_slots - self.num_unprovisioned
    }

    /// Bytes of address space (all committed while not decommitted).
    pub fn span_bytes(&self, system_page: usize) -> usize {
        self.num_system_pages * system_page
    }

    /// Bytes backed by touched pages.
    pub fn resident_bytes(&self, system_page: usize) -> usize {
        match self.state {
            SpanState::Decommitted => 0,
            _ => align_up(self.provisioned() * self.slot_size, system_page),
        }
    }

    /// Range of slots that may legitimately be on the free list or live.
    #[inline]
    pub fn range(&self) -> SlotRange {
        let base = self.base_addr();
        SlotRange {
            base,
            slot_size: self.slot_size,
            end: base + self.provisioned() * self.slot_size,
        }
    }

    /// Whether an allocation can be served without a new span.
    #[inline]
    pub fn has_capacity(&self) -> bool {
        !self.freelist.is_empty() || self.num_unprovisioned > 0
    }

    /// Take one slot: the free-list head, or fresh slots from the
    /// unprovisioned tail.
    ///
    /// Provisioning threads onto the free list every further slot whose link
    /// word lies in a system page the returned slot already touches.
    pub fn take_slot(&mut self, system_page: usize) -> Result<NonNull<u8>, PartitionError> {
        let range = self.range();
        if let Some(slot) = self.freelist.pop(&range)? {
            self.mark_live(slot);
            return Ok(slot);
        }

        debug_assert!(self.num_unprovisioned > 0, "take_slot on a span without capacity");
        let first = self.provisioned();
        // SAFETY: `first < num_slots`, so the slot lies inside the span.
        let slot = unsafe { self.slot_ptr(first) };
        self.num_unprovisioned -= 1;

        let touched_end = align_up(slot.as_ptr() as usize + self.slot_size, system_page);
        let mut extra = 0;
        while extra < self.num_unprovisioned {
            let start = slot.as_ptr() as usize + (extra + 1) * self.slot_size;
            if start + LINK_SIZE > touched_end {
                break;
            }
            extra += 1;
        }
        self.num_unprovisioned -= extra;
        for i in (1..=extra).rev() {
            // SAFETY: slots first+1..=first+extra are now provisioned and free.
            unsafe {
                let next = self.slot_ptr(first + i);
                self.freelist.push(next);
            }
        }

        self.mark_live(slot);
        Ok(slot)
    }

    /// Reject anything that is not a live slot of this span: foreign or
    /// interior pointers, and slots already freed.
    pub fn validate_live_slot(&self, addr: usize) -> Result<(), PartitionError> {
        let range = self.range();
        if !range.contains_slot(addr) || !self.live.is_live(self.slot_index(addr)) {
            return Err(PartitionError::InvalidFree { address: addr });
        }
        Ok(())
    }

    /// Return a slot.
    ///
    /// # Safety
    ///
    /// `slot` must have passed [`validate_live_slot`](Self::validate_live_slot)
    /// and must not be used by the caller afterwards.
    pub unsafe fn give_back(&mut self, slot: NonNull<u8>) {
        self.live.clear(self.slot_index(slot.as_ptr() as usize));
        self.freelist.push(slot);
        self.num_allocated -= 1;
    }

    #[inline]
    fn mark_live(&mut self, slot: NonNull<u8>) {
        self.live.set(self.slot_index(slot.as_ptr() as usize));
        self.num_allocated += 1;
    }

    #[inline]
    fn slot_index(&self, addr: usize) -> usize {
        (addr - self.base_addr()) / self.slot_size
    }

    /// Forget all slot state after the span's pages were decommitted.
    pub fn reset_after_decommit(&mut self) {
        debug_assert_eq!(self.num_allocated, 0);
        self.freelist.clear();
        self.num_unprovisioned = self.num_slots;
    }

    /// Work out which whole system pages hold no live data.
    ///
    /// The free tail beyond the last live slot can go back to being
    /// unprovisioned; inside free slots, everything past the link word is
    /// fair game.
    pub fn plan_discard(&self, system_page: usize) -> Result<DiscardPlan, PartitionError> {
        let range = self.range();
        let provisioned = self.provisioned();
        let mut is_free = vec![false; provisioned];
        for index in self.freelist.slot_indices(&range)? {
            is_free[index] = true;
        }

        let mut new_provisioned = provisioned;
        while new_provisioned > 0 && is_free[new_provisioned - 1] {
            new_provisioned -= 1;
        }

        let mut plan = DiscardPlan {
            new_provisioned,
            ..DiscardPlan::default()
        };

        let base = range.base;
        let tail_start = align_up(base + new_provisioned * self.slot_size, system_page);
        let tail_end = align_up(base + provisioned * self.slot_size, system_page);
        if tail_start < tail_end {
            plan.ranges.push((tail_start - base, tail_end - tail_start));
        }

        for index in (0..new_provisioned).filter(|&i| is_free[i]) {
            let slot = base + index * self.slot_size;
            let start = align_up(slot + LINK_SIZE, system_page);
            let end = align_down(slot + self.slot_size, system_page);
            if start < end {
                plan.ranges.push((start - base, end - start));
            }
            plan.kept_free.push(index);
        }

        Ok(plan)
    }

    /// Apply the slot bookkeeping half of a discard plan.
    pub fn trim_to(&mut self, plan: &DiscardPlan) {
        if plan.new_provisioned == self.provisioned() {
            return;
        }
        self.freelist.clear();
        for &index in plan.kept_free.iter().rev() {
            // SAFETY: every kept index is a provisioned, free slot.
            unsafe {
                let slot = self.slot_ptr(index);
                self.freelist.push(slot);
            }
        }
        self.num_unprovisioned = self.num_slots - plan.new_provisioned;
    }

    /// Pointer to slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below `num_slots`.
    #[inline]
    unsafe fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        NonNull::new_unchecked(self.base.as_ptr().add(index * self.slot_size))
    }
}

/// Owner of every pooled span of a partition.
#[derive(Debug, Default)]
pub(crate) struct SpanArena {
    spans: Vec<SlotSpan>,
}

impl SpanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, span: SlotSpan) -> SpanId {
        let id = SpanId(self.spans.len() as u32);
        self.spans.push(span);
        id
    }

    #[inline]
    pub fn get(&self, id: SpanId) -> &SlotSpan {
        &self.spans[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: SpanId) -> &mut SlotSpan {
        &mut self.spans[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotSpan> {
        self.spans.iter()
    }
}

/// A bucket's list of spans in one state.
#[derive(Debug, Default)]
pub(crate) struct SpanList {
    head: Option<SpanId>,
    len: usize,
}

impl SpanList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn head(&self) -> Option<SpanId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_front(&mut self, arena: &mut SpanArena, id: SpanId) {
        let old_head = self.head;
        {
            let span = arena.get_mut(id);
            span.prev = None;
            span.next = old_head;
        }
        if let Some(old) = old_head {
            arena.get_mut(old).prev = Some(id);
        }
        self.head = Some(id);
        self.len += 1;
    }

    pub fn remove(&mut self, arena: &mut SpanArena, id: SpanId) {
        let (prev, next) = {
            let span = arena.get_mut(id);
            let links = (span.prev, span.next);
            span.prev = None;
            span.next = None;
            links
        };
        match prev {
            Some(prev) => arena.get_mut(prev).next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "span is not on this list");
                self.head = next;
            }
        }
        if let Some(next) = next {
            arena.get_mut(next).prev = prev;
        }
        self.len -= 1;
    }

    pub fn pop_front(&mut self, arena: &mut SpanArena) -> Option<SpanId> {
        let id = self.head?;
        self.remove(arena, id);
        Some(id)
    }

    /// Snapshot of the ids on the list, head first.
    pub fn ids(&self, arena: &SpanArena) -> Vec<SpanId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = arena.get(id).next;
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    use std::alloc::{alloc_zeroed, dealloc, Layout};

    /// Page-aligned scratch memory standing in for a committed span.
    struct Backing {
        base: NonNull<u8>,
        layout: Layout,
    }

    impl Backing {
        fn new(pages: usize) -> Self {
            let layout = Layout::from_size_align(pages * PAGE, PAGE).unwrap();
            let base = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap();
            Self { base, layout }
        }

        fn span(&mut self, slot_size: usize, pages: usize) -> SlotSpan {
            SlotSpan::new(0, self.base, slot_size, pages, PAGE)
        }
    }

    impl Drop for Backing {
        fn drop(&mut self) {
            unsafe { dealloc(self.base.as_ptr(), self.layout) };
        }
    }

    #[test]
    fn test_provisioning_stays_within_touched_page() {
        let mut backing = Backing::new(4);
        let mut span = backing.span(1024, 4);

        let first = span.take_slot(PAGE).unwrap();
        assert_eq!(first, span.base);
        // The first page holds four 1 KB slots; three were threaded.
        assert_eq!(span.provisioned(), 4);
        assert_eq!(span.num_unprovisioned, 12);
        assert_eq!(span.num_allocated, 1);

        let second = span.take_slot(PAGE).unwrap();
        assert_eq!(second.as_ptr() as usize, span.base_addr() + 1024);
    }

    #[test]
    fn test_free_and_reuse() {
        let mut backing = Backing::new(4);
        let mut span = backing.span(64, 4);

        let a = span.take_slot(PAGE).unwrap();
        let b = span.take_slot(PAGE).unwrap();
        span.validate_live_slot(a.as_ptr() as usize).unwrap();
        unsafe { span.give_back(a) };

        assert!(span.validate_live_slot(a.as_ptr() as usize).is_err(), "double free");
        assert_eq!(span.take_slot(PAGE).unwrap(), a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_double_free_below_head_rejected() {
        let mut backing = Backing::new(4);
        let mut span = backing.span(64, 4);

        let a = span.take_slot(PAGE).unwrap();
        let b = span.take_slot(PAGE).unwrap();
        let c = span.take_slot(PAGE).unwrap();
        unsafe {
            span.give_back(a);
            span.give_back(b);
        }

        // `a` sits behind `b` on the free list.
        assert_eq!(span.freelist.head(), Some(b));
        assert!(span.validate_live_slot(a.as_ptr() as usize).is_err());
        assert!(span.validate_live_slot(b.as_ptr() as usize).is_err());
        span.validate_live_slot(c.as_ptr() as usize).unwrap();
        assert_eq!(span.num_allocated, 1);
    }

    #[test]
    fn test_interior_pointer_rejected() {
        let mut backing = Backing::new(4);
        let mut span = backing.span(64, 4);
        let a = span.take_slot(PAGE).unwrap();

        assert!(span.validate_live_slot(a.as_ptr() as usize + 8).is_err());
        assert!(span.validate_live_slot(span.base_addr() + 64 * 200).is_err());
    }

    #[test]
    fn test_plan_discard_trims_free_tail() {
        let mut backing = Backing::new(16);
        let mut span = backing.span(8192, 16);

        let slots: Vec<_> = (0..4).map(|_| span.take_slot(PAGE).unwrap()).collect();
        unsafe {
            span.give_back(slots[3]);
            span.give_back(slots[1]);
        }

        let plan = span.plan_discard(PAGE).unwrap();
        assert_eq!(plan.new_provisioned, 3);
        assert_eq!(plan.kept_free, vec![1]);
        // Slot 3's two pages, plus slot 1's second page.
        assert_eq!(plan.discardable_bytes(), 3 * PAGE);

        span.trim_to(&plan);
        assert_eq!(span.provisioned(), 3);
        assert_eq!(span.take_slot(PAGE).unwrap(), slots[1]);
    }

    #[test]
    fn test_span_list_moves() {
        let mut backing = Backing::new(12);
        let mut arena = SpanArena::new();
        let a = arena.insert(backing.span(64, 4));
        let b = arena.insert(backing.span(64, 4));
        let c = arena.insert(backing.span(64, 4));

        let mut list = SpanList::new();
        list.push_front(&mut arena, a);
        list.push_front(&mut arena, b);
        list.push_front(&mut arena, c);
        assert_eq!(list.ids(&arena), vec![c, b, a]);

        list.remove(&mut arena, b);
        assert_eq!(list.ids(&arena), vec![c, a]);
        assert_eq!(list.pop_front(&mut arena), Some(c));
        assert_eq!(list.len(), 1);
        assert_eq!(list.head(), Some(a));
    }
}
