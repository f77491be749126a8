//! Page primitives: reserve, commit, decommit, discard and release of
//! page-aligned regions.
//!
//! The partition never talks to the OS directly; everything goes through
//! [`PagePrimitives`]. [`SystemPages`] maps real OS pages, [`HeapPages`]
//! carves regions out of the global allocator and can enforce a reservation
//! limit, which makes out-of-memory paths testable.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::mutex::Mutex;

/// Page-granular memory operations consumed by a partition.
///
/// All lengths and addresses passed in are multiples of [`page_size`](Self::page_size).
pub trait PagePrimitives: Send + Sync {
    /// The system page size. Must be a power of two.
    fn page_size(&self) -> usize;

    /// Reserve `size` bytes of address space aligned to `align`.
    ///
    /// The region is not accessible until committed.
    fn reserve(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Make a reserved region readable and writable.
    ///
    /// # Safety
    ///
    /// The region must lie inside a live reservation.
    unsafe fn commit(&self, addr: NonNull<u8>, len: usize) -> bool;

    /// Return the physical pages of a region and make it inaccessible.
    ///
    /// # Safety
    ///
    /// The region must lie inside a live reservation and hold no live data.
    unsafe fn decommit(&self, addr: NonNull<u8>, len: usize);

    /// Drop the physical pages of a region but keep it accessible.
    ///
    /// Contents become unspecified.
    ///
    /// # Safety
    ///
    /// The region must be committed and hold no live data.
    unsafe fn discard(&self, addr: NonNull<u8>, len: usize);

    /// Release a whole reservation.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must be exactly a prior reservation.
    unsafe fn release(&self, addr: NonNull<u8>, len: usize);
}

#[cfg(unix)]
mod unix {
    use super::*;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    /// OS-backed pages via `mmap`/`mprotect`/`madvise`.
    #[derive(Debug, Clone, Copy)]
    pub struct SystemPages {
        page_size: usize,
    }

    impl SystemPages {
        /// Query the OS page size.
        pub fn new() -> Self {
            // SAFETY: sysconf has no preconditions.
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            let page_size = if page_size > 0 { page_size as usize } else { 4096 };
            Self { page_size }
        }
    }

    impl Default for SystemPages {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PagePrimitives for SystemPages {
        fn page_size(&self) -> usize {
            self.page_size
        }

        fn reserve(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
            let align = align.max(self.page_size);
            let padded = size.checked_add(align - self.page_size)?;

            // SAFETY: anonymous PROT_NONE mapping, no existing memory touched.
            let raw = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    padded,
                    libc::PROT_NONE,
                    RESERVE_FLAGS,
                    -1,
                    0,
                )
            };
            if raw == libc::MAP_FAILED {
                return None;
            }

            // Trim the unaligned head and the unused tail.
            let raw = raw as *mut u8;
            let addr = raw as usize;
            let head = crate::util::layout::align_up(addr, align) - addr;
            let tail = padded - head - size;
            // SAFETY: both trims are inside the mapping we just created.
            unsafe {
                if head > 0 {
                    libc::munmap(raw.cast(), head);
                }
                if tail > 0 {
                    libc::munmap(raw.add(head + size).cast(), tail);
                }
                NonNull::new(raw.add(head))
            }
        }

        unsafe fn commit(&self, addr: NonNull<u8>, len: usize) -> bool {
            libc::mprotect(addr.as_ptr().cast(), len, libc::PROT_READ | libc::PROT_WRITE) == 0
        }

        unsafe fn decommit(&self, addr: NonNull<u8>, len: usize) {
            libc::madvise(addr.as_ptr().cast(), len, libc::MADV_DONTNEED);
            libc::mprotect(addr.as_ptr().cast(), len, libc::PROT_NONE);
        }

        unsafe fn discard(&self, addr: NonNull<u8>, len: usize) {
            libc::madvise(addr.as_ptr().cast(), len, libc::MADV_DONTNEED);
        }

        unsafe fn release(&self, addr: NonNull<u8>, len: usize) {
            libc::munmap(addr.as_ptr().cast(), len);
        }
    }
}

#[cfg(unix)]
pub use unix::SystemPages;

/// OS pages are unavailable here; fall back to the heap.
#[cfg(not(unix))]
pub type SystemPages = HeapPages;

/// Pages carved from the global allocator.
///
/// Commit and decommit are bookkeeping only. An optional limit on reserved
/// bytes turns into reservation failures once exceeded.
pub struct HeapPages {
    page_size: usize,
    limit: usize,
    reservations: Mutex<HashMap<usize, Layout>>,
    reserved_bytes: AtomicUsize,
    committed_bytes: AtomicUsize,
}

impl HeapPages {
    /// Heap-backed pages with 4 KiB pages and no limit.
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Heap-backed pages that refuse to reserve more than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            page_size: 4096,
            limit,
            reservations: Mutex::new(HashMap::new()),
            reserved_bytes: AtomicUsize::new(0),
            committed_bytes: AtomicUsize::new(0),
        }
    }

    /// Bytes currently reserved.
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes.load(Ordering::Relaxed)
    }

    /// Bytes currently committed.
    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes.load(Ordering::Relaxed)
    }
}

impl Default for HeapPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PagePrimitives for HeapPages {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn reserve(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let mut reservations = self.reservations.lock();
        let reserved = self.reserved_bytes.load(Ordering::Relaxed);
        if reserved.checked_add(size)? > self.limit {
            return None;
        }

        let layout = Layout::from_size_align(size, align.max(self.page_size)).ok()?;
        // SAFETY: layout has non-zero size (callers reserve whole pages).
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        reservations.insert(ptr.as_ptr() as usize, layout);
        self.reserved_bytes.fetch_add(size, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn commit(&self, _addr: NonNull<u8>, len: usize) -> bool {
        self.committed_bytes.fetch_add(len, Ordering::Relaxed);
        true
    }

    unsafe fn decommit(&self, _addr: NonNull<u8>, len: usize) {
        self.committed_bytes.fetch_sub(len, Ordering::Relaxed);
    }

    unsafe fn discard(&self, _addr: NonNull<u8>, _len: usize) {}

    unsafe fn release(&self, addr: NonNull<u8>, len: usize) {
        let layout = self.reservations.lock().remove(&(addr.as_ptr() as usize));
        if let Some(layout) = layout {
            debug_assert_eq!(layout.size(), len);
            dealloc(addr.as_ptr(), layout);
            self.reserved_bytes.fetch_sub(len, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_pages_reserve_aligned() {
        let pages = SystemPages::new();
        let align = 2 * 1024 * 1024;
        let size = 4 * pages.page_size();

        let base = pages.reserve(size, align).expect("reserve");
        assert_eq!(base.as_ptr() as usize % align, 0);

        unsafe {
            assert!(pages.commit(base, size));
            base.as_ptr().write(0xAB);
            base.as_ptr().add(size - 1).write(0xCD);
            assert_eq!(*base.as_ptr(), 0xAB);
            pages.discard(base, size);
            pages.decommit(base, size);
            pages.release(base, size);
        }
    }

    #[test]
    fn test_heap_pages_limit() {
        let pages = HeapPages::with_limit(16 * 1024);

        let first = pages.reserve(16 * 1024, 4096).expect("within limit");
        assert!(pages.reserve(4096, 4096).is_none());
        assert_eq!(pages.reserved_bytes(), 16 * 1024);

        unsafe { pages.release(first, 16 * 1024) };
        assert_eq!(pages.reserved_bytes(), 0);
        assert!(pages.reserve(4096, 4096).is_some());
    }
}
