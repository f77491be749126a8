//! Page geometry: system pages, partition pages, super pages and how many
//! system pages a slot span of a given slot size occupies.

use crate::util::layout::align_up;
use crate::util::size::mb;

/// System pages per partition page.
pub(crate) const SYSTEM_PAGES_PER_PARTITION_PAGE: usize = 4;

/// Largest multi-slot span, in system pages.
pub(crate) const MAX_SYSTEM_PAGES_PER_SLOT_SPAN: usize = 4 * SYSTEM_PAGES_PER_PARTITION_PAGE;

/// Minimum super page size. Grows with the system page size so that a
/// super page always holds at least 8 partition pages.
const MIN_SUPER_PAGE_SIZE: usize = mb(2);

/// Sizes derived from the system page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageGeometry {
    pub system_page: usize,
    pub partition_page: usize,
    pub super_page: usize,
}

impl PageGeometry {
    pub fn new(system_page: usize) -> Self {
        assert!(
            system_page.is_power_of_two(),
            "system page size must be a power of two, got {}",
            system_page
        );
        let partition_page = system_page * SYSTEM_PAGES_PER_PARTITION_PAGE;
        let super_page = MIN_SUPER_PAGE_SIZE.max(partition_page * 8);
        Self {
            system_page,
            partition_page,
            super_page,
        }
    }

    /// Partition pages in one super page.
    pub fn partition_pages_per_super_page(&self) -> usize {
        self.super_page / self.partition_page
    }

    /// Largest slot size a pooled span can hold: a single-slot span must
    /// still fit inside one super page.
    pub fn max_pooled_slot_size(&self) -> usize {
        self.super_page
    }

    /// Number of system pages for a slot span of `slot_size`.
    ///
    /// Small slots pick the span length (up to
    /// [`MAX_SYSTEM_PAGES_PER_SLOT_SPAN`]) with the lowest waste ratio,
    /// counting unused tail bytes and unfaulted pages of the last partition
    /// page. Slots too big for that get a single-slot span.
    pub fn system_pages_per_slot_span(&self, slot_size: usize) -> usize {
        if slot_size > MAX_SYSTEM_PAGES_PER_SLOT_SPAN * self.system_page {
            return align_up(slot_size, self.system_page) / self.system_page;
        }

        let mut best_pages = 0;
        let mut best_ratio = 1.0f64;

        for pages in (SYSTEM_PAGES_PER_PARTITION_PAGE - 1)..=MAX_SYSTEM_PAGES_PER_SLOT_SPAN {
            let span_bytes = pages * self.system_page;
            let num_slots = span_bytes / slot_size;
            let mut waste = span_bytes - num_slots * slot_size;

            let remainder = pages % SYSTEM_PAGES_PER_PARTITION_PAGE;
            if remainder != 0 {
                let unfaulted = SYSTEM_PAGES_PER_PARTITION_PAGE - remainder;
                waste += std::mem::size_of::<usize>() * unfaulted;
            }

            let ratio = waste as f64 / span_bytes as f64;
            if ratio < best_ratio {
                best_ratio = ratio;
                best_pages = pages;
            }
        }

        debug_assert!(best_pages > 0, "no span length fits slot size {}", slot_size);
        best_pages
    }
}
