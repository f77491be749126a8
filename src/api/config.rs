//! Root configuration.

use std::mem::size_of;
use std::sync::Arc;

use crate::diagnostics::hooks::AllocationObserver;
use crate::util::size::{kb, mb};

/// Configuration for a [`GenericRoot`](crate::GenericRoot).
///
/// The bucket spacing constants trade internal waste against bucket count:
/// each order (power-of-two range) is split into `1 << buckets_per_order_bits`
/// equally spaced buckets, so waste is bounded by roughly
/// `1 / (1 << buckets_per_order_bits)` of the request.
#[derive(Clone)]
pub struct GenericRootConfig {
    /// log2 of the number of buckets per order (default: 3, i.e. 8 buckets)
    pub buckets_per_order_bits: u32,

    /// Bit length of the smallest bucketed order (default: 4, 8-byte bucket)
    pub min_bucketed_order: u32,

    /// Bit length of the largest bucketed order (default: 20, up to 960 KB)
    pub max_bucketed_order: u32,

    /// Largest size served at all, via direct map (default: 2 GB + 4 KB)
    pub max_direct_mapped: usize,

    /// Observer notified of every allocation and free on this root
    pub observer: Option<Arc<dyn AllocationObserver>>,
}

impl Default for GenericRootConfig {
    fn default() -> Self {
        Self {
            buckets_per_order_bits: 3,
            min_bucketed_order: 4,
            max_bucketed_order: 20,
            max_direct_mapped: (1usize << 31) + kb(4),
            observer: None,
        }
    }
}

impl GenericRootConfig {
    /// Fewer, coarser buckets: 4 per order, pooled up to 128 KB.
    pub fn compact() -> Self {
        Self {
            buckets_per_order_bits: 2,
            max_bucketed_order: 17,
            ..Self::default()
        }
    }

    /// Finer buckets: 16 per order, for workloads sensitive to waste.
    pub fn fine_grained() -> Self {
        Self {
            buckets_per_order_bits: 4,
            min_bucketed_order: 5,
            ..Self::default()
        }
    }

    /// Builder pattern: set the number of buckets per order (as log2).
    pub fn with_buckets_per_order_bits(mut self, bits: u32) -> Self {
        self.buckets_per_order_bits = bits;
        self
    }

    /// Builder pattern: set the bucketed order range.
    pub fn with_bucketed_orders(mut self, min: u32, max: u32) -> Self {
        self.min_bucketed_order = min;
        self.max_bucketed_order = max;
        self
    }

    /// Builder pattern: set the largest direct-mapped size.
    pub fn with_max_direct_mapped(mut self, size: usize) -> Self {
        self.max_direct_mapped = size;
        self
    }

    /// Builder pattern: attach an allocation observer.
    pub fn with_observer(mut self, observer: Arc<dyn AllocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Slot size of the smallest bucket.
    pub fn smallest_bucket(&self) -> usize {
        1usize << (self.min_bucketed_order - 1)
    }

    /// Panics on inconsistent constants.
    pub(crate) fn validate(&self) {
        assert!(
            self.min_bucketed_order >= 1
                && self.smallest_bucket() >= size_of::<usize>(),
            "smallest bucket must hold a pointer"
        );
        assert!(
            self.buckets_per_order_bits >= 1
                && self.buckets_per_order_bits < self.min_bucketed_order,
            "buckets_per_order_bits must be in 1..min_bucketed_order"
        );
        assert!(
            self.max_bucketed_order >= self.min_bucketed_order && self.max_bucketed_order <= 21,
            "max_bucketed_order must be in min_bucketed_order..=21"
        );
        let num_buckets = ((self.max_bucketed_order - self.min_bucketed_order + 1) as usize)
            << self.buckets_per_order_bits;
        assert!(num_buckets <= u16::MAX as usize, "too many buckets");
        assert!(
            self.max_direct_mapped >= 1usize << self.max_bucketed_order,
            "max_direct_mapped must exceed the largest bucket"
        );
    }
}

impl std::fmt::Debug for GenericRootConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericRootConfig")
            .field("buckets_per_order_bits", &self.buckets_per_order_bits)
            .field("min_bucketed_order", &self.min_bucketed_order)
            .field("max_bucketed_order", &self.max_bucketed_order)
            .field("max_direct_mapped", &self.max_direct_mapped)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Configuration for a [`FixedRoot`](crate::FixedRoot).
#[derive(Clone)]
pub struct FixedRootConfig {
    /// Largest request the root serves (default: 4 KB)
    pub max_allocation: usize,

    /// Observer notified of every allocation and free on this root
    pub observer: Option<Arc<dyn AllocationObserver>>,
}

impl Default for FixedRootConfig {
    fn default() -> Self {
        Self {
            max_allocation: kb(4),
            observer: None,
        }
    }
}

impl FixedRootConfig {
    /// Largest `max_allocation` a fixed root accepts. Bigger sizes belong in
    /// a [`GenericRoot`](crate::GenericRoot), which direct-maps them.
    pub const MAX_ALLOCATION: usize = mb(1);

    /// Builder pattern: set the largest request size.
    pub fn with_max_allocation(mut self, size: usize) -> Self {
        self.max_allocation = size;
        self
    }

    /// Builder pattern: attach an allocation observer.
    pub fn with_observer(mut self, observer: Arc<dyn AllocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl FixedRootConfig {
    /// Panics on a maximum the fixed table cannot pool.
    pub(crate) fn validate(&self) {
        assert!(
            self.max_allocation <= Self::MAX_ALLOCATION,
            "max_allocation {} exceeds FixedRootConfig::MAX_ALLOCATION ({})",
            self.max_allocation,
            Self::MAX_ALLOCATION
        );
    }
}

impl std::fmt::Debug for FixedRootConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedRootConfig")
            .field("max_allocation", &self.max_allocation)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        GenericRootConfig::default().validate();
        GenericRootConfig::compact().validate();
        GenericRootConfig::fine_grained().validate();
    }

    #[test]
    #[should_panic(expected = "smallest bucket")]
    fn test_tiny_smallest_bucket_rejected() {
        GenericRootConfig::default().with_bucketed_orders(2, 20).validate();
    }

    #[test]
    fn test_fixed_maximum_validates() {
        FixedRootConfig::default().validate();
        FixedRootConfig::default()
            .with_max_allocation(FixedRootConfig::MAX_ALLOCATION)
            .validate();
    }

    #[test]
    #[should_panic(expected = "exceeds FixedRootConfig::MAX_ALLOCATION")]
    fn test_fixed_maximum_above_super_page_rejected() {
        FixedRootConfig::default().with_max_allocation(mb(4)).validate();
    }

    #[test]
    #[should_panic(expected = "exceeds FixedRootConfig::MAX_ALLOCATION")]
    fn test_fixed_maximum_overflow_rejected() {
        FixedRootConfig::default().with_max_allocation(usize::MAX).validate();
    }

    #[test]
    fn test_smallest_bucket() {
        assert_eq!(GenericRootConfig::default().smallest_bucket(), 8);
        assert_eq!(GenericRootConfig::fine_grained().smallest_bucket(), 16);
    }
}
