//! Process-wide hooks get their own test binary: they affect every root.

use partalloc::{FatalMode, GenericRoot, GenericRootConfig, PartitionAllocHooks};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_global_hooks_lifecycle() {
    partalloc::set_fatal_mode(FatalMode::Panic);
    let root = GenericRoot::new(GenericRootConfig::default());

    let allocations = Arc::new(Mutex::new(Vec::<(usize, usize, &'static str)>::new()));
    let frees = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&allocations);
    PartitionAllocHooks::set_allocation_hook(Some(Arc::new(
        move |address: NonNull<u8>, size: usize, type_name: &'static str| {
            seen.lock().unwrap().push((address.as_ptr() as usize, size, type_name));
        },
    )));
    let counted = Arc::clone(&frees);
    PartitionAllocHooks::set_free_hook(Some(Arc::new(move |_address: NonNull<u8>| {
        counted.fetch_add(1, Ordering::SeqCst);
    })));
    assert!(PartitionAllocHooks::enabled());

    let ptr = root.alloc(32, "Hooked");
    {
        let allocations = allocations.lock().unwrap();
        assert_eq!(allocations.len(), 1);
        let (address, size, type_name) = allocations[0];
        assert_eq!(address, ptr.as_ptr() as usize);
        assert!(size >= 32);
        assert_eq!(type_name, "Hooked");
    }
    unsafe { root.free(ptr) };
    assert_eq!(frees.load(Ordering::SeqCst), 1);

    // A second writer is a programming error.
    let result = catch_unwind(AssertUnwindSafe(|| {
        PartitionAllocHooks::set_allocation_hook(Some(Arc::new(
            |_: NonNull<u8>, _: usize, _: &'static str| {},
        )));
    }));
    let message = result
        .expect_err("double install must be fatal")
        .downcast::<String>()
        .map(|s| *s)
        .unwrap_or_default();
    assert!(message.contains("PA006"), "unexpected panic: {}", message);

    PartitionAllocHooks::set_allocation_hook(None);
    PartitionAllocHooks::set_free_hook(None);
    assert!(!PartitionAllocHooks::enabled());

    let ptr = root.alloc(64, "Quiet");
    unsafe { root.free(ptr) };
    assert_eq!(allocations.lock().unwrap().len(), 1);
    assert_eq!(frees.load(Ordering::SeqCst), 1);
}
