//! Allocation and free observers.
//!
//! Two ways to watch a partition:
//! - [`AllocationObserver`], injected per root through its config
//! - [`PartitionAllocHooks`], a process-wide pair of callbacks shared by
//!   every root
//!
//! Both fire synchronously on the calling thread: allocation callbacks after
//! a successful allocation and before it is returned, free callbacks after
//! the pointer is validated and before the free is performed. Callbacks must not allocate from or free to the
//! root that invoked them.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::error::PartitionError;
use crate::diagnostics::fatal::terminate;
use crate::sync::mutex::Mutex;

/// Observer injected into a single root.
pub trait AllocationObserver: Send + Sync {
    /// A real allocation of `size` requested bytes succeeded.
    fn on_allocation(&self, address: NonNull<u8>, size: usize, type_name: &'static str);

    /// `address` is about to be freed.
    fn on_free(&self, address: NonNull<u8>);
}

/// Process-wide allocation callback: `(address, size, type_name)`.
pub type AllocationHook = Arc<dyn Fn(NonNull<u8>, usize, &'static str) + Send + Sync>;

/// Process-wide free callback: `(address)`.
pub type FreeHook = Arc<dyn Fn(NonNull<u8>) + Send + Sync>;

static HOOKS_ENABLED: AtomicBool = AtomicBool::new(false);
static ALLOCATION_HOOK: Mutex<Option<AllocationHook>> = Mutex::new(None);
static FREE_HOOK: Mutex<Option<FreeHook>> = Mutex::new(None);

/// The process-wide hook registry.
///
/// Single writer: installing a hook while one is installed is fatal. Pass
/// `None` to clear, typically at shutdown.
pub struct PartitionAllocHooks;

impl PartitionAllocHooks {
    /// Install or clear the allocation hook.
    pub fn set_allocation_hook(hook: Option<AllocationHook>) {
        let mut slot = ALLOCATION_HOOK.lock();
        if hook.is_some() && slot.is_some() {
            drop(slot);
            terminate(&PartitionError::HookAlreadyInstalled { hook: "allocation" });
        }
        *slot = hook;
        drop(slot);
        Self::refresh_enabled();
    }

    /// Install or clear the free hook.
    pub fn set_free_hook(hook: Option<FreeHook>) {
        let mut slot = FREE_HOOK.lock();
        if hook.is_some() && slot.is_some() {
            drop(slot);
            terminate(&PartitionError::HookAlreadyInstalled { hook: "free" });
        }
        *slot = hook;
        drop(slot);
        Self::refresh_enabled();
    }

    /// Whether either hook is installed.
    pub fn enabled() -> bool {
        HOOKS_ENABLED.load(Ordering::Acquire)
    }

    fn refresh_enabled() {
        let enabled = ALLOCATION_HOOK.lock().is_some() || FREE_HOOK.lock().is_some();
        HOOKS_ENABLED.store(enabled, Ordering::Release);
    }

    fn allocation(address: NonNull<u8>, size: usize, type_name: &'static str) {
        if !Self::enabled() {
            return;
        }
        // Clone out so a hook may itself touch the registry.
        let hook = ALLOCATION_HOOK.lock().clone();
        if let Some(hook) = hook {
            hook(address, size, type_name);
        }
    }

    fn free(address: NonNull<u8>) {
        if !Self::enabled() {
            return;
        }
        let hook = FREE_HOOK.lock().clone();
        if let Some(hook) = hook {
            hook(address);
        }
    }
}

/// Per-root dispatch to the injected observer and the global hooks.
#[derive(Clone, Default)]
pub(crate) struct HookDispatch {
    observer: Option<Arc<dyn AllocationObserver>>,
}

impl HookDispatch {
    pub(crate) fn new(observer: Option<Arc<dyn AllocationObserver>>) -> Self {
        Self { observer }
    }

    /// Whether any observer or global hook would see an event.
    pub(crate) fn is_active(&self) -> bool {
        self.observer.is_some() || PartitionAllocHooks::enabled()
    }

    pub(crate) fn allocation(&self, address: NonNull<u8>, size: usize, type_name: &'static str) {
        if let Some(ref observer) = self.observer {
            observer.on_allocation(address, size, type_name);
        }
        PartitionAllocHooks::allocation(address, size, type_name);
    }

    pub(crate) fn free(&self, address: NonNull<u8>) {
        if let Some(ref observer) = self.observer {
            observer.on_free(address);
        }
        PartitionAllocHooks::free(address);
    }

    /// A realloc is reported as a free of the old block followed by an
    /// allocation of the new one, even when the address did not change.
    pub(crate) fn realloc(
        &self,
        old: NonNull<u8>,
        new: NonNull<u8>,
        size: usize,
        type_name: &'static str,
    ) {
        self.free(old);
        self.allocation(new, size, type_name);
    }
}
