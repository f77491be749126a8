use partalloc::{
    FatalMode, FixedRoot, FixedRootConfig, GenericRoot, GenericRootConfig, HeapPages,
};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone)]
enum Operation {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
}

fn heap_root() -> GenericRoot<HeapPages> {
    partalloc::set_fatal_mode(FatalMode::Panic);
    GenericRoot::with_pages(GenericRootConfig::default(), HeapPages::new())
}

fn size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![
        4 => 1usize..512,
        3 => 512usize..65_536,
        1 => 65_536usize..2_000_000,
    ]
}

proptest! {
    #[test]
    fn test_actual_size_covers_request(size in 0usize..4_000_000) {
        let root = heap_root();
        let actual = root.actual_size(size);
        prop_assert!(actual >= size);
        prop_assert!(root.actual_size(size + 1) >= actual);
    }

    #[test]
    fn test_get_size_matches_actual_size(size in size_strategy()) {
        let root = heap_root();
        let ptr = root.alloc(size, "Prop");
        prop_assert_eq!(root.get_size(ptr), root.actual_size(size));
        unsafe {
            ptr.as_ptr().add(size - 1).write(0x11);
            root.free(ptr);
        }
    }

    #[test]
    fn test_fixed_root_rounds_to_granularity(size in 1usize..=2048) {
        partalloc::set_fatal_mode(FatalMode::Panic);
        let mut root = FixedRoot::with_pages(
            FixedRootConfig::default().with_max_allocation(2048),
            HeapPages::new(),
        );
        let ptr = root.alloc(size, "Prop");
        prop_assert_eq!(root.get_size(ptr), (size + 7) / 8 * 8);
        unsafe { root.free(ptr) };
    }

    #[test]
    fn test_operations_preserve_contents(ops in proptest::collection::vec(
        prop_oneof![
            3 => size_strategy().prop_map(Operation::Alloc),
            2 => any::<usize>().prop_map(Operation::Free),
            1 => (any::<usize>(), size_strategy()).prop_map(|(i, s)| Operation::Realloc(i, s)),
        ],
        1..80
    )) {
        let root = heap_root();
        // Live address -> (requested size, fill byte).
        let mut live: HashMap<usize, (usize, u8)> = HashMap::new();
        let mut order: Vec<usize> = Vec::new();
        let mut fill = 0u8;

        for op in ops {
            match op {
                Operation::Alloc(size) => {
                    fill = fill.wrapping_add(1);
                    let ptr = root.alloc(size, "Prop");
                    let addr = ptr.as_ptr() as usize;
                    prop_assert!(!live.contains_key(&addr), "live pointer handed out again");
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), fill, size) };
                    live.insert(addr, (size, fill));
                    order.push(addr);
                }
                Operation::Free(pick) => {
                    if order.is_empty() {
                        continue;
                    }
                    let addr = order.swap_remove(pick % order.len());
                    let (size, byte) = live.remove(&addr).unwrap();
                    let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                    prop_assert!(bytes.iter().all(|&b| b == byte), "contents changed before free");
                    unsafe { root.free(ptr) };
                }
                Operation::Realloc(pick, new_size) => {
                    if order.is_empty() {
                        continue;
                    }
                    let index = pick % order.len();
                    let addr = order[index];
                    let (size, byte) = live.remove(&addr).unwrap();
                    let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                    let moved = unsafe { root.realloc(Some(ptr), new_size, "Prop") }.unwrap();

                    let kept = size.min(new_size);
                    let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), kept) };
                    prop_assert!(bytes.iter().all(|&b| b == byte), "realloc lost contents");
                    prop_assert!(root.get_size(moved) >= new_size);

                    unsafe { std::ptr::write_bytes(moved.as_ptr(), byte, new_size) };
                    let new_addr = moved.as_ptr() as usize;
                    prop_assert!(!live.contains_key(&new_addr), "realloc aliased a live pointer");
                    live.insert(new_addr, (new_size, byte));
                    order[index] = new_addr;
                }
            }
        }

        for addr in order {
            let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
            unsafe { root.free(ptr) };
        }
    }
}
