//! Super pages: aligned reservations carved into partition pages for slot
//! spans, plus the side table that maps an address back to its span.
//!
//! Spans never straddle super pages. A super page is looked up by its
//! aligned base; within it, each partition page records the span that
//! starts in or covers it.

use std::collections::HashMap;
use std::ptr::NonNull;

use crate::api::error::PartitionError;
use crate::core::geometry::PageGeometry;
use crate::util::layout::align_up;

use super::page::PagePrimitives;
use super::span::SpanId;

/// Super page reservations of one partition.
pub(crate) struct SuperPages {
    /// Sizes derived from the system page size
    geometry: PageGeometry,

    /// Next unused partition page of the current super page
    next: usize,

    /// End of the current super page
    end: usize,

    /// Base of every reserved super page
    bases: Vec<NonNull<u8>>,

    /// Owning span of each partition page, per super page base
    index: HashMap<usize, Box<[Option<SpanId>]>>,

    /// Bytes committed for spans
    committed_bytes: usize,
}

impl SuperPages {
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            next: 0,
            end: 0,
            bases: Vec::new(),
            index: HashMap::new(),
            committed_bytes: 0,
        }
    }

    pub fn reserved_bytes(&self) -> usize {
        self.bases.len() * self.geometry.super_page
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes
    }

    /// Carve and commit room for a span of `span_bytes`.
    ///
    /// The span takes whole partition pages; only `span_bytes` are
    /// committed. Reserves a fresh super page when the current one is too
    /// full, abandoning its tail.
    pub fn carve<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
        span_bytes: usize,
    ) -> Result<NonNull<u8>, PartitionError> {
        let len = align_up(span_bytes, self.geometry.partition_page);
        debug_assert!(len <= self.geometry.super_page);

        if self.end - self.next < len {
            self.reserve_super_page(pages)?;
        }

        let addr = self.next;
        // SAFETY: `addr` lies inside the current super page.
        let ptr = unsafe { NonNull::new_unchecked(addr as *mut u8) };
        // SAFETY: the range was carved from a live reservation and is unused.
        if !unsafe { pages.commit(ptr, span_bytes) } {
            return Err(PartitionError::AllocationFailure { size: span_bytes });
        }

        self.next += len;
        self.committed_bytes += span_bytes;
        Ok(ptr)
    }

    /// Record that `[base, base + span_bytes)` belongs to `id`.
    pub fn register(&mut self, base: NonNull<u8>, span_bytes: usize, id: SpanId) {
        let addr = base.as_ptr() as usize;
        let super_base = addr & !(self.geometry.super_page - 1);
        let first = (addr - super_base) / self.geometry.partition_page;
        let count = align_up(span_bytes, self.geometry.partition_page) / self.geometry.partition_page;

        if let Some(entries) = self.index.get_mut(&super_base) {
            for entry in &mut entries[first..first + count] {
                *entry = Some(id);
            }
        }
    }

    /// The span covering `addr`, if any.
    #[inline]
    pub fn lookup(&self, addr: usize) -> Option<SpanId> {
        let super_base = addr & !(self.geometry.super_page - 1);
        let entries = self.index.get(&super_base)?;
        entries[(addr - super_base) / self.geometry.partition_page]
    }

    /// Recommit a decommitted span.
    pub fn recommit<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
        base: NonNull<u8>,
        span_bytes: usize,
    ) -> Result<(), PartitionError> {
        // SAFETY: spans always lie inside a live super page.
        if !unsafe { pages.commit(base, span_bytes) } {
            return Err(PartitionError::AllocationFailure { size: span_bytes });
        }
        self.committed_bytes += span_bytes;
        Ok(())
    }

    /// Decommit an empty span.
    ///
    /// # Safety
    ///
    /// The span must hold no live slots.
    pub unsafe fn decommit<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
        base: NonNull<u8>,
        span_bytes: usize,
    ) {
        pages.decommit(base, span_bytes);
        self.committed_bytes -= span_bytes;
    }

    /// Release every super page.
    ///
    /// # Safety
    ///
    /// No slot carved from these super pages may be used afterwards.
    pub unsafe fn release_all<P: PagePrimitives + ?Sized>(&mut self, pages: &P) {
        for base in self.bases.drain(..) {
            pages.release(base, self.geometry.super_page);
        }
        self.index.clear();
        self.next = 0;
        self.end = 0;
        self.committed_bytes = 0;
    }

    fn reserve_super_page<P: PagePrimitives + ?Sized>(
        &mut self,
        pages: &P,
    ) -> Result<(), PartitionError> {
        let size = self.geometry.super_page;
        let base = pages
            .reserve(size, size)
            .ok_or(PartitionError::AllocationFailure { size })?;

        let addr = base.as_ptr() as usize;
        debug_assert_eq!(addr % size, 0, "super page is misaligned");

        #[cfg(feature = "log")]
        log::trace!(
            "partalloc: reserved super page {:#x} ({} reserved in total)",
            addr,
            crate::util::size::format_bytes(self.reserved_bytes() + size)
        );

        let entries = vec![None; self.geometry.partition_pages_per_super_page()];
        self.index.insert(addr, entries.into_boxed_slice());
        self.bases.push(base);
        self.next = addr;
        self.end = addr + size;
        Ok(())
    }
}

// SAFETY: the base pointers are only addresses of reservations owned by
// this table; they are never dereferenced here.
unsafe impl Send for SuperPages {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::page::HeapPages;

    #[test]
    fn test_carve_and_lookup() {
        let pages = HeapPages::new();
        let geometry = PageGeometry::new(pages.page_size());
        let mut super_pages = SuperPages::new(geometry);

        let a = super_pages.carve(&pages, 3 * 4096).unwrap();
        let b = super_pages.carve(&pages, 16 * 4096).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, geometry.partition_page);
        assert_eq!(super_pages.committed_bytes(), 19 * 4096);
        assert_eq!(super_pages.reserved_bytes(), geometry.super_page);

        let a_id = SpanId::for_tests(0);
        let b_id = SpanId::for_tests(1);
        super_pages.register(a, 3 * 4096, a_id);
        super_pages.register(b, 16 * 4096, b_id);

        assert_eq!(super_pages.lookup(a.as_ptr() as usize + 100), Some(a_id));
        assert_eq!(super_pages.lookup(b.as_ptr() as usize + 10 * 4096), Some(b_id));
        assert_eq!(super_pages.lookup(b.as_ptr() as usize + 40 * 4096), None);
        assert_eq!(super_pages.lookup(0x1000), None);

        unsafe { super_pages.release_all(&pages) };
        assert_eq!(pages.reserved_bytes(), 0);
    }

    #[test]
    fn test_full_super_page_reserves_another() {
        let pages = HeapPages::new();
        let geometry = PageGeometry::new(pages.page_size());
        let mut super_pages = SuperPages::new(geometry);

        let big = geometry.super_page - geometry.partition_page;
        super_pages.carve(&pages, big).unwrap();
        super_pages.carve(&pages, 2 * geometry.partition_page).unwrap();
        assert_eq!(super_pages.reserved_bytes(), 2 * geometry.super_page);

        unsafe { super_pages.release_all(&pages) };
    }

    #[test]
    fn test_reservation_failure() {
        let pages = HeapPages::with_limit(0);
        let mut super_pages = SuperPages::new(PageGeometry::new(pages.page_size()));
        let err = super_pages.carve(&pages, 4096).unwrap_err();
        assert!(matches!(err, PartitionError::AllocationFailure { .. }));
    }
}
