//! Size-class tables: request size to bucket index in O(1).
//!
//! The fixed table spaces buckets at word granularity up to a configured
//! maximum. The generic table groups buckets by order (bit length of the
//! size) with a fixed number of equally spaced buckets per order, which keeps
//! worst-case internal waste at a constant fraction of the request.

use std::mem::size_of;

use crate::api::config::GenericRootConfig;
use crate::util::layout::{align_up, bit_length};

/// Where a (overhead-adjusted) size is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BucketLookup {
    /// A pooled bucket.
    Bucket(usize),
    /// A dedicated mapping.
    DirectMap,
    /// Larger than the root will ever serve.
    TooLarge,
}

/// A bucket definition produced by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketSpec {
    pub slot_size: usize,
    /// Pseudo buckets exist only to keep indexing uniform.
    pub enabled: bool,
}

/// Maps raw sizes (request plus overhead) to buckets.
pub(crate) trait SizeClassTable: Send {
    /// Every bucket, in index order.
    fn buckets(&self) -> Vec<BucketSpec>;

    /// Look up the bucket serving `raw_size`.
    fn lookup(&self, raw_size: usize) -> BucketLookup;
}

/// Allocation granularity of the fixed table.
pub(crate) const FIXED_GRANULARITY: usize = size_of::<usize>();
const FIXED_SHIFT: u32 = FIXED_GRANULARITY.trailing_zeros();

/// Exact-size buckets spaced at [`FIXED_GRANULARITY`].
#[derive(Debug, Clone)]
pub(crate) struct FixedSizeClasses {
    max_raw_size: usize,
    num_buckets: usize,
}

impl FixedSizeClasses {
    /// Table serving raw sizes up to `max_raw_size`, which the root config
    /// has already bounded.
    pub fn new(max_raw_size: usize) -> Self {
        let rounded = align_up(max_raw_size, FIXED_GRANULARITY);
        Self {
            max_raw_size,
            num_buckets: (rounded >> FIXED_SHIFT) + 1,
        }
    }
}

impl SizeClassTable for FixedSizeClasses {
    fn buckets(&self) -> Vec<BucketSpec> {
        (0..self.num_buckets)
            .map(|i| BucketSpec {
                slot_size: (i << FIXED_SHIFT).max(FIXED_GRANULARITY),
                enabled: true,
            })
            .collect()
    }

    #[inline]
    fn lookup(&self, raw_size: usize) -> BucketLookup {
        if raw_size > self.max_raw_size {
            return BucketLookup::TooLarge;
        }
        // Cannot overflow: max_raw_size was rounded at construction.
        let index = (raw_size + FIXED_GRANULARITY - 1) >> FIXED_SHIFT;
        debug_assert!(index < self.num_buckets);
        BucketLookup::Bucket(index)
    }
}

/// Lookup table entry for the generic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Bucket(u16),
    DirectMap,
}

/// Order-grouped buckets with a precomputed lookup table.
#[derive(Debug, Clone)]
pub(crate) struct GenericSizeClasses {
    buckets_per_order_bits: u32,
    buckets: Vec<BucketSpec>,
    order_index_shifts: Vec<u32>,
    order_sub_index_masks: Vec<usize>,
    lookup: Vec<Entry>,
    max_bucketed: usize,
    max_direct_mapped: usize,
}

impl GenericSizeClasses {
    pub fn new(config: &GenericRootConfig) -> Self {
        config.validate();

        let bits = config.buckets_per_order_bits;
        let per_order = 1usize << bits;
        let smallest = config.smallest_bucket();
        let num_orders = (config.max_bucketed_order - config.min_bucketed_order + 1) as usize;

        // Order index shift and sub-order mask for every possible bit length.
        let mut order_index_shifts = Vec::with_capacity(usize::BITS as usize + 1);
        let mut order_sub_index_masks = Vec::with_capacity(usize::BITS as usize + 1);
        for order in 0..=usize::BITS {
            let shift = order.saturating_sub(bits + 1);
            order_index_shifts.push(shift);
            let mask = if order == usize::BITS {
                usize::MAX >> (bits + 1)
            } else {
                ((1usize << order) - 1) >> (bits + 1)
            };
            order_sub_index_masks.push(mask);
        }

        // Buckets: `per_order` equally spaced sizes per order. Sizes that are
        // not a multiple of the smallest bucket are pseudo buckets.
        let mut buckets = Vec::with_capacity(num_orders * per_order);
        let mut current = smallest;
        let mut increment = smallest >> bits;
        for _ in 0..num_orders {
            for _ in 0..per_order {
                buckets.push(BucketSpec {
                    slot_size: current,
                    enabled: current % smallest == 0,
                });
                current += increment;
            }
            increment <<= 1;
        }

        // Lookup table, indexed by (order << bits) + order_index (+1 to round up).
        let mut lookup = Vec::with_capacity((usize::BITS as usize + 1) * per_order + 1);
        let mut next = 0usize;
        for order in 0..=usize::BITS {
            for _ in 0..per_order {
                if order < config.min_bucketed_order {
                    lookup.push(Entry::Bucket(0));
                } else if order > config.max_bucketed_order {
                    lookup.push(Entry::DirectMap);
                } else {
                    let mut valid = next;
                    while !buckets[valid].enabled {
                        valid += 1;
                    }
                    lookup.push(Entry::Bucket(valid as u16));
                    next += 1;
                }
            }
        }
        lookup.push(Entry::DirectMap);

        let max_bucketed = buckets.last().map_or(0, |b| b.slot_size);

        Self {
            buckets_per_order_bits: bits,
            buckets,
            order_index_shifts,
            order_sub_index_masks,
            lookup,
            max_bucketed,
            max_direct_mapped: config.max_direct_mapped,
        }
    }

    /// Largest pooled slot size.
    pub fn max_bucketed(&self) -> usize {
        self.max_bucketed
    }
}

impl SizeClassTable for GenericSizeClasses {
    fn buckets(&self) -> Vec<BucketSpec> {
        self.buckets.clone()
    }

    #[inline]
    fn lookup(&self, raw_size: usize) -> BucketLookup {
        if raw_size > self.max_direct_mapped {
            return BucketLookup::TooLarge;
        }

        let order = bit_length(raw_size) as usize;
        let per_order_mask = (1usize << self.buckets_per_order_bits) - 1;
        let order_index = (raw_size >> self.order_index_shifts[order]) & per_order_mask;
        let round_up = (raw_size & self.order_sub_index_masks[order] != 0) as usize;
        let index = (order << self.buckets_per_order_bits) + order_index + round_up;

        match self.lookup[index] {
            Entry::Bucket(i) => BucketLookup::Bucket(i as usize),
            Entry::DirectMap => BucketLookup::DirectMap,
        }
    }
}
