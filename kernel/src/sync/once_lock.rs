//! Safe global initialization.
//!
//! Provides safe alternatives to `static mut` for the one piece of
//! deliberately global state this crate carries: the log service
//! (see [`crate::log_service`]). Everything else in the timer subsystem is
//! per-record or per-process.

use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

/// A cell that can be written to only once.
///
/// Similar to `std::sync::OnceLock` but works in `no_std` environments.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceLock<T> {
    /// Create a new empty `OnceLock`.
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: a non-null pointer was stored by `set()` via
            // `Box::into_raw()`. The Acquire load synchronizes-with the
            // Release store in `set()`, so the pointee is fully
            // initialized. The allocation is only freed in `Drop`, so the
            // 'static borrow is sound for the OnceLock's lifetime.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell with a value.
    ///
    /// Returns `Ok(())` if initialization succeeds, `Err(value)` if
    /// already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let boxed = alloc::boxed::Box::new(value);
        let ptr = alloc::boxed::Box::into_raw(boxed);

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: `ptr` came from `Box::into_raw()` above and the
                // compare_exchange failed, so no one else took ownership
                // of it; reclaiming it here avoids leaking the
                // allocation.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    /// Get or initialize the value.
    pub fn get_or_init<F>(&self, f: F) -> &'static T
    where
        F: FnOnce() -> T,
    {
        if let Some(val) = self.get() {
            return val;
        }
        let value = f();
        match self.set(value) {
            Ok(()) => self.get().expect("OnceLock get failed after successful set"),
            Err(_) => self.get().expect("OnceLock get failed after concurrent init"),
        }
    }
}

// SAFETY: the inner value is heap-allocated and accessed only through an
// AtomicPtr with Acquire/Release ordering, so transferring an
// `OnceLock<T>` across threads is sound whenever `T: Send`.
unsafe impl<T: Send> Send for OnceLock<T> {}
// SAFETY: concurrent `get()` calls only ever hand out shared references
// to the same fully-initialized `T`; `set()`'s compare_exchange admits at
// most one successful initializer. Requires `T: Sync` because multiple
// threads may hold `&T` simultaneously.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: exclusive access via `&mut self` guarantees no
            // concurrent reader; `ptr` was produced by `Box::into_raw()`
            // in `set()`, so reconstructing the Box here reclaims it
            // exactly once.
            unsafe {
                let _ = alloc::boxed::Box::from_raw(ptr);
            }
        }
    }
}

/// Global state behind a mutex, initialized at most once.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    /// Create new uninitialized global state.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state. A second call is a silent no-op.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    /// Invoke `f` with a shared reference, if initialized.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    /// Invoke `f` with a mutable reference, if initialized.
    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: all access to the inner `Option<T>` is serialized by the
// `spin::Mutex`, so sharing a `GlobalState<T>` across threads is sound
// whenever `T: Send` (no concurrent access ever materializes, so `T`
// need not be `Sync`).
unsafe impl<T: Send> Send for GlobalState<T> {}
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_lock_set_once() {
        let lock = OnceLock::new();
        assert!(lock.get().is_none());
        assert!(lock.set(42).is_ok());
        assert_eq!(*lock.get().unwrap(), 42);
        assert!(lock.set(100).is_err());
    }

    #[test]
    fn global_state_init_and_mutate() {
        let state: GlobalState<alloc::vec::Vec<u32>> = GlobalState::new();
        assert!(state.init(alloc::vec![1, 2, 3]).is_ok());
        state.with_mut(|v| v.push(4));
        assert_eq!(state.with(|v| v.clone()), Some(alloc::vec![1, 2, 3, 4]));
        assert!(state.init(alloc::vec![9]).is_err());
    }
}
