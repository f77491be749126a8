//! The single-owner root for small, bounded sizes.

use std::ptr::NonNull;

use crate::allocators::page::{PagePrimitives, SystemPages};
use crate::allocators::partition::{Partition, EXTRAS};
use crate::api::config::FixedRootConfig;
use crate::api::error::PartitionError;
use crate::api::flags::AllocFlags;
use crate::api::stats::PartitionStatsDumper;
use crate::core::size_class::FixedSizeClasses;
use crate::diagnostics::fatal::{or_terminate, resolve, surface};
use crate::diagnostics::hooks::HookDispatch;

/// A partition with exact-size buckets and no internal locking.
///
/// Every operation takes `&mut self`, so callers serialize access through
/// ownership or their own lock. Requests above
/// [`FixedRootConfig::max_allocation`] are a size overflow.
pub struct FixedRoot<P: PagePrimitives = SystemPages> {
    partition: Partition<FixedSizeClasses, P>,
    hooks: HookDispatch,
}

impl FixedRoot<SystemPages> {
    /// Create a root backed by OS pages.
    pub fn new(config: FixedRootConfig) -> Self {
        Self::with_pages(config, SystemPages::new())
    }
}

impl<P: PagePrimitives> FixedRoot<P> {
    /// Create a root on top of custom page primitives.
    ///
    /// # Panics
    ///
    /// If `config.max_allocation` exceeds [`FixedRootConfig::MAX_ALLOCATION`].
    pub fn with_pages(config: FixedRootConfig, pages: P) -> Self {
        config.validate();
        let max_raw_size = config.max_allocation + EXTRAS;
        Self {
            partition: Partition::new(FixedSizeClasses::new(max_raw_size), pages),
            hooks: HookDispatch::new(config.observer),
        }
    }

    /// Allocate `size` bytes. Terminates on failure.
    pub fn alloc(&mut self, size: usize, type_name: &'static str) -> NonNull<u8> {
        or_terminate(self.alloc_inner(AllocFlags::empty(), size, type_name))
    }

    /// Allocate `size` bytes; see
    /// [`GenericRoot::alloc_flags`](crate::GenericRoot::alloc_flags).
    pub fn alloc_flags(
        &mut self,
        flags: AllocFlags,
        size: usize,
        type_name: &'static str,
    ) -> Option<NonNull<u8>> {
        let result = self.alloc_inner(flags, size, type_name);
        resolve(result, flags.contains(AllocFlags::RETURN_NULL))
    }

    /// Allocate `size` bytes, handing size overflow and out of memory back
    /// as errors.
    pub fn try_alloc(
        &mut self,
        size: usize,
        type_name: &'static str,
    ) -> Result<NonNull<u8>, PartitionError> {
        surface(self.alloc_inner(AllocFlags::empty(), size, type_name))
    }

    /// Free an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this root and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        if self.hooks.is_active() {
            or_terminate(self.partition.validate(ptr));
            self.hooks.free(ptr);
        }
        or_terminate(self.partition.free(ptr));
    }

    /// Usable size of a live allocation. Terminates if `ptr` is not one.
    pub fn get_size(&self, ptr: NonNull<u8>) -> usize {
        or_terminate(self.partition.usable_size(ptr))
    }

    /// Usable size an allocation of `size` bytes would get.
    pub fn actual_size(&self, size: usize) -> usize {
        self.partition.actual_size(size)
    }

    /// Report memory usage to `dumper`.
    pub fn dump_stats(
        &self,
        partition_name: &str,
        is_light_dump: bool,
        dumper: &mut dyn PartitionStatsDumper,
    ) {
        or_terminate(self.partition.dump_stats(partition_name, is_light_dump, dumper));
    }

    fn alloc_inner(
        &mut self,
        flags: AllocFlags,
        size: usize,
        type_name: &'static str,
    ) -> Result<NonNull<u8>, PartitionError> {
        let ptr = self.partition.alloc(size, flags.contains(AllocFlags::ZERO_FILL))?;
        self.hooks.allocation(ptr, size, type_name);
        Ok(ptr)
    }
}

// SAFETY: the partition only holds addresses of memory it owns; `&mut self`
// on every mutating call keeps access exclusive.
unsafe impl<P: PagePrimitives> Send for FixedRoot<P> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::page::HeapPages;
    use crate::core::size_class::FIXED_GRANULARITY;
    use crate::diagnostics::fatal::{set_fatal_mode, FatalMode};

    fn root(max: usize) -> FixedRoot<HeapPages> {
        set_fatal_mode(FatalMode::Panic);
        FixedRoot::with_pages(FixedRootConfig::default().with_max_allocation(max), HeapPages::new())
    }

    #[test]
    fn test_exact_size_classes() {
        let mut root = root(512);
        for size in [1, 8, 9, 100, 512] {
            let ptr = root.alloc(size, "T");
            let expected = (size + FIXED_GRANULARITY - 1) / FIXED_GRANULARITY * FIXED_GRANULARITY;
            assert_eq!(root.get_size(ptr), expected);
            assert_eq!(root.actual_size(size), expected);
            unsafe { root.free(ptr) };
        }
    }

    #[test]
    fn test_above_maximum_is_overflow() {
        let mut root = root(256);
        assert!(root.alloc_flags(AllocFlags::RETURN_NULL, 257, "T").is_none());
        assert!(root.try_alloc(257, "T").is_err());
        assert_eq!(root.actual_size(257), 257);
    }

    #[test]
    fn test_invalid_free_never_reaches_observer() {
        use crate::diagnostics::hooks::AllocationObserver;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Default)]
        struct Frees(AtomicUsize);

        impl AllocationObserver for Frees {
            fn on_allocation(&self, _address: NonNull<u8>, _size: usize, _type_name: &'static str) {}

            fn on_free(&self, _address: NonNull<u8>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        set_fatal_mode(FatalMode::Panic);
        let frees = Arc::new(Frees::default());
        let config = FixedRootConfig::default().with_observer(frees.clone());
        let mut root = FixedRoot::with_pages(config, HeapPages::new());

        let mut local = [0u64; 4];
        let foreign = NonNull::new(local.as_mut_ptr().cast::<u8>()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
            root.free(foreign)
        }));
        assert!(result.is_err());
        assert_eq!(frees.0.load(Ordering::SeqCst), 0);

        let ptr = root.alloc(16, "T");
        unsafe { root.free(ptr) };
        assert_eq!(frees.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_largest_allowed_maximum() {
        let mut root = root(FixedRootConfig::MAX_ALLOCATION);
        let ptr = root.alloc(FixedRootConfig::MAX_ALLOCATION, "T");
        assert_eq!(root.get_size(ptr), FixedRootConfig::MAX_ALLOCATION);
        unsafe { root.free(ptr) };
    }

    #[test]
    #[should_panic(expected = "exceeds FixedRootConfig::MAX_ALLOCATION")]
    fn test_maximum_above_super_page_rejected() {
        root(4 * 1024 * 1024);
    }

    #[test]
    #[should_panic(expected = "exceeds FixedRootConfig::MAX_ALLOCATION")]
    fn test_unbounded_maximum_rejected() {
        root(usize::MAX);
    }

    #[test]
    #[should_panic(expected = "PA003")]
    fn test_foreign_pointer_is_fatal() {
        let mut root = root(256);
        let mut local = [0u64; 4];
        let foreign = NonNull::new(local.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { root.free(foreign) };
    }
}
