//! The thread-safe root for arbitrary sizes.

use std::ptr::NonNull;

use crate::allocators::page::{PagePrimitives, SystemPages};
use crate::allocators::partition::Partition;
use crate::api::config::GenericRootConfig;
use crate::api::error::PartitionError;
use crate::api::flags::{AllocFlags, PurgeFlags};
use crate::api::stats::PartitionStatsDumper;
use crate::core::size_class::GenericSizeClasses;
use crate::diagnostics::fatal::{or_terminate, resolve, surface};
use crate::diagnostics::hooks::HookDispatch;
use crate::sync::mutex::Mutex;

/// A partition serving any size, safe to share between threads.
///
/// Small and medium requests come from order-spaced buckets; anything
/// above the largest bucket gets its own mapping. One lock guards the whole
/// of every operation.
///
/// Hooks and observers run on the calling thread outside the lock, but
/// they must still not call back into the same root.
///
/// # Example
///
/// ```rust,no_run
/// use partalloc::{GenericRoot, GenericRootConfig};
///
/// let root = GenericRoot::new(GenericRootConfig::default());
/// let ptr = root.alloc(128, "Node");
/// unsafe { root.free(ptr) };
/// ```
pub struct GenericRoot<P: PagePrimitives = SystemPages> {
    partition: Mutex<Partition<GenericSizeClasses, P>>,
    hooks: HookDispatch,
}

impl GenericRoot<SystemPages> {
    /// Create a root backed by OS pages.
    pub fn new(config: GenericRootConfig) -> Self {
        Self::with_pages(config, SystemPages::new())
    }

    /// Create a root with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GenericRootConfig::default())
    }
}

impl<P: PagePrimitives> GenericRoot<P> {
    /// Create a root on top of custom page primitives.
    pub fn with_pages(config: GenericRootConfig, pages: P) -> Self {
        let sizes = GenericSizeClasses::new(&config);
        Self {
            partition: Mutex::new(Partition::new(sizes, pages)),
            hooks: HookDispatch::new(config.observer),
        }
    }

    /// Allocate `size` bytes. Terminates on failure.
    pub fn alloc(&self, size: usize, type_name: &'static str) -> NonNull<u8> {
        or_terminate(self.alloc_inner(AllocFlags::empty(), size, type_name))
    }

    /// Allocate `size` bytes.
    ///
    /// Returns `None` on size overflow or out of memory only when
    /// [`AllocFlags::RETURN_NULL`] is set.
    pub fn alloc_flags(
        &self,
        flags: AllocFlags,
        size: usize,
        type_name: &'static str,
    ) -> Option<NonNull<u8>> {
        let result = self.alloc_inner(flags, size, type_name);
        resolve(result, flags.contains(AllocFlags::RETURN_NULL))
    }

    /// Allocate `size` bytes, handing size overflow and out of memory back
    /// as errors.
    pub fn try_alloc(&self, size: usize, type_name: &'static str) -> Result<NonNull<u8>, PartitionError> {
        surface(self.alloc_inner(AllocFlags::empty(), size, type_name))
    }

    /// Free an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this root and must not be used afterwards.
    /// Anything else is detected where possible and is fatal.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        if self.hooks.is_active() {
            // Hooks only hear about frees that will happen.
            let checked = self.partition.lock().validate(ptr);
            or_terminate(checked);
            self.hooks.free(ptr);
        }
        let result = self.partition.lock().free(ptr);
        or_terminate(result);
    }

    /// Resize an allocation, keeping its first `min(old, new)` bytes.
    ///
    /// `None` allocates; a `new_size` of zero frees and returns `None`.
    /// Terminates on failure.
    ///
    /// # Safety
    ///
    /// As for [`free`](Self::free): the old pointer is dead once a
    /// different pointer comes back.
    pub unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        type_name: &'static str,
    ) -> Option<NonNull<u8>> {
        self.realloc_flags(AllocFlags::empty(), ptr, new_size, type_name)
    }

    /// [`realloc`](Self::realloc) with flags.
    ///
    /// With [`AllocFlags::RETURN_NULL`], a failed resize returns `None` and
    /// leaves the original allocation alive. `ZERO_FILL` applies only when
    /// `ptr` is `None`.
    ///
    /// # Safety
    ///
    /// See [`realloc`](Self::realloc).
    pub unsafe fn realloc_flags(
        &self,
        flags: AllocFlags,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        type_name: &'static str,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.alloc_flags(flags, new_size, type_name);
        };
        if new_size == 0 {
            self.free(ptr);
            return None;
        }

        let result = self.realloc_inner(ptr, new_size, type_name);
        resolve(result, flags.contains(AllocFlags::RETURN_NULL))
    }

    /// Resize an allocation, handing size overflow and out of memory back
    /// as errors. On error the original allocation is still live.
    ///
    /// # Safety
    ///
    /// See [`realloc`](Self::realloc).
    pub unsafe fn try_realloc(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        type_name: &'static str,
    ) -> Result<NonNull<u8>, PartitionError> {
        surface(self.realloc_inner(ptr, new_size, type_name))
    }

    /// Usable size of a live allocation. Terminates if `ptr` is not one.
    pub fn get_size(&self, ptr: NonNull<u8>) -> usize {
        let result = self.partition.lock().usable_size(ptr);
        or_terminate(result)
    }

    /// Usable size an allocation of `size` bytes would get.
    pub fn actual_size(&self, size: usize) -> usize {
        self.partition.lock().actual_size(size)
    }

    /// Return unused memory to the OS.
    pub fn purge_memory(&self, flags: PurgeFlags) {
        let result = self.partition.lock().purge(flags);
        or_terminate(result);
    }

    /// Report memory usage to `dumper`.
    ///
    /// A light dump reports only the totals.
    pub fn dump_stats(
        &self,
        partition_name: &str,
        is_light_dump: bool,
        dumper: &mut dyn PartitionStatsDumper,
    ) {
        let result = self
            .partition
            .lock()
            .dump_stats(partition_name, is_light_dump, dumper);
        or_terminate(result);
    }

    /// System page size of the backing primitives.
    pub fn page_size(&self) -> usize {
        self.partition.lock().page_size()
    }

    fn alloc_inner(
        &self,
        flags: AllocFlags,
        size: usize,
        type_name: &'static str,
    ) -> Result<NonNull<u8>, PartitionError> {
        let zero_fill = flags.contains(AllocFlags::ZERO_FILL);
        let ptr = self.partition.lock().alloc(size, zero_fill)?;
        self.hooks.allocation(ptr, size, type_name);
        Ok(ptr)
    }

    unsafe fn realloc_inner(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
        type_name: &'static str,
    ) -> Result<NonNull<u8>, PartitionError> {
        let new_ptr = self.partition.lock().realloc(ptr, new_size)?;
        self.hooks.realloc(ptr, new_ptr, new_size, type_name);
        Ok(new_ptr)
    }
}

// SAFETY: the partition only holds addresses of memory it owns, and every
// access goes through the mutex.
unsafe impl<P: PagePrimitives> Send for GenericRoot<P> {}
unsafe impl<P: PagePrimitives> Sync for GenericRoot<P> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::page::HeapPages;
    use crate::diagnostics::fatal::{set_fatal_mode, FatalMode};
    use crate::diagnostics::hooks::AllocationObserver;
    use std::sync::Arc;

    fn root() -> GenericRoot<HeapPages> {
        set_fatal_mode(FatalMode::Panic);
        GenericRoot::with_pages(GenericRootConfig::default(), HeapPages::new())
    }

    #[test]
    fn test_realloc_none_allocates_and_zero_frees() {
        let root = root();
        unsafe {
            let ptr = root.realloc(None, 48, "T").unwrap();
            assert!(root.get_size(ptr) >= 48);
            assert!(root.realloc(Some(ptr), 0, "T").is_none());
        }
    }

    #[test]
    fn test_return_null_on_overflow() {
        let root = root();
        assert!(root.alloc_flags(AllocFlags::RETURN_NULL, usize::MAX, "T").is_none());
        assert!(matches!(
            root.try_alloc(usize::MAX - 1, "T"),
            Err(PartitionError::SizeOverflow { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "PA001")]
    fn test_overflow_is_fatal_by_default() {
        let root = root();
        root.alloc(usize::MAX, "T");
    }

    #[test]
    fn test_try_realloc_keeps_original_on_failure() {
        set_fatal_mode(FatalMode::Panic);
        let root = GenericRoot::with_pages(GenericRootConfig::default(), HeapPages::with_limit(4 * 1024 * 1024));
        let ptr = root.alloc(64, "T");
        unsafe {
            *ptr.as_ptr() = 42;
            let err = root.try_realloc(ptr, 64 * 1024 * 1024, "T").unwrap_err();
            assert!(matches!(err, PartitionError::AllocationFailure { .. }));
            assert_eq!(*ptr.as_ptr(), 42);
            assert!(root.realloc_flags(AllocFlags::RETURN_NULL, Some(ptr), 64 * 1024 * 1024, "T").is_none());
            root.free(ptr);
        }
    }

    #[test]
    fn test_observer_sees_requested_size() {
        struct Sizes(crate::sync::mutex::Mutex<Vec<(usize, &'static str)>>);

        impl AllocationObserver for Sizes {
            fn on_allocation(&self, _address: NonNull<u8>, size: usize, type_name: &'static str) {
                self.0.lock().push((size, type_name));
            }

            fn on_free(&self, _address: NonNull<u8>) {}
        }

        set_fatal_mode(FatalMode::Panic);
        let sizes = Arc::new(Sizes(crate::sync::mutex::Mutex::new(Vec::new())));
        let config = GenericRootConfig::default().with_observer(sizes.clone());
        let root = GenericRoot::with_pages(config, HeapPages::new());

        let ptr = root.alloc(30, "Thing");
        unsafe { root.free(ptr) };
        assert_eq!(*sizes.0.lock(), vec![(30, "Thing")]);
    }
}
