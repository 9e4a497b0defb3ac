//! Fixed-size object cache — §4.1.
//!
//! A direct translation of `aiocb_cache.h`'s `aio_cache<T>` template: a
//! preallocated backing store, a mutex + condvar guarded free list of raw
//! pointers into that store, and a notification policy selecting between
//! waking one waiter or all of them.
//!
//! Invariant: (blocks in the free list) + (blocks in flight) == capacity,
//! always. `acquire()` never fails and never returns without a block —
//! callers block on the condvar instead.

use std::sync::{Condvar, Mutex};

/// Notification policy on `release()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    /// Wake exactly one waiter. Appropriate when waiters rarely race
    /// (e.g. one reaper thread handing blocks back one at a time).
    One,
    /// Wake every waiter. Appropriate where multiple acquirers are
    /// expected to race for newly freed blocks only occasionally.
    All,
}

struct Inner<T> {
    free: Vec<*mut T>,
}

// Safety: `T` values are only ever accessed through a pointer that has
// been exclusively handed out by `acquire()` and not yet returned via
// `release()`; the cache itself only ever touches the free list, never
// the pointee. `T: Send` is required by callers constructing the cache.
unsafe impl<T: Send> Send for Inner<T> {}

/// Bounded pool of preallocated `T`, reused across submit/complete
/// round trips so the fast path never allocates.
pub struct ObjectCache<T> {
    // Backing storage — never resized after construction, so interior
    // pointers into `storage` remain valid for the cache's lifetime.
    storage: Box<[T]>,
    inner: Mutex<Inner<T>>,
    cv: Condvar,
    mode: NotifyMode,
}

// Safety: see `Inner<T>`.
unsafe impl<T: Send> Sync for ObjectCache<T> {}

impl<T: Default> ObjectCache<T> {
    pub fn new(count: usize, mode: NotifyMode) -> Self {
        let mut storage = Vec::with_capacity(count);
        storage.resize_with(count, T::default);
        let storage = storage.into_boxed_slice();

        let free: Vec<*mut T> = storage.iter().map(|slot| slot as *const T as *mut T).collect();

        Self {
            storage,
            inner: Mutex::new(Inner { free }),
            cv: Condvar::new(),
            mode,
        }
    }
}

impl<T> ObjectCache<T> {
    /// Total capacity of the cache.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Remove a block; blocks on the condvar while the free list is empty.
    pub fn acquire(&self) -> *mut T {
        let mut guard = self.inner.lock().unwrap();
        while guard.free.is_empty() {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.free.pop().expect("checked non-empty above")
    }

    /// Return a block to the cache.
    ///
    /// # Safety
    /// `ptr` must have been returned by a previous `acquire()` on this
    /// same cache and must not currently be referenced elsewhere.
    pub unsafe fn release(&self, ptr: *mut T) {
        let mut guard = self.inner.lock().unwrap();
        guard.free.push(ptr);
        match self.mode {
            NotifyMode::One => self.cv.notify_one(),
            NotifyMode::All => {
                if guard.free.len() == 1 {
                    self.cv.notify_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_release_round_trip_preserves_multiset() {
        let cache: ObjectCache<u64> = ObjectCache::new(4, NotifyMode::All);
        let mut acquired = Vec::new();
        for _ in 0..4 {
            acquired.push(cache.acquire());
        }
        // cache should now be empty
        assert_eq!(cache.capacity(), 4);
        for p in acquired {
            unsafe { cache.release(p) };
        }
        // every block acquirable again
        let mut reacquired = Vec::new();
        for _ in 0..4 {
            reacquired.push(cache.acquire());
        }
        assert_eq!(reacquired.len(), 4);
        for p in reacquired {
            unsafe { cache.release(p) };
        }
    }

    #[test]
    fn acquire_blocks_until_release() {
        let cache = Arc::new(ObjectCache::<u64>::new(1, NotifyMode::One));
        let first = cache.acquire();

        let cache2 = cache.clone();
        let handle = thread::spawn(move || {
            // this should block until the main thread releases `first`
            let p = cache2.acquire();
            unsafe { *p = 99 };
            unsafe { cache2.release(p) };
        });

        thread::sleep(std::time::Duration::from_millis(20));
        unsafe { cache.release(first) };
        handle.join().unwrap();
    }
}
