//! Sleep lock: a blocking exclusive lock that remembers its holder.
//!
//! Bucket mutexes are held for a handful of instructions and never across
//! I/O. A slot's content lock is different: it is held for as long as a
//! caller works on the block, including device transfers, so contenders must
//! sleep instead of spin. It is built from a `parking_lot` mutex guarding the
//! holder's thread id plus a condition variable that waiters park on.
//!
//! Recording the holder lets commit and release assert that the calling
//! thread really owns the lock.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A blocking exclusive lock around `T`.
pub struct SleepLock<T: ?Sized> {
    name: &'static str,
    /// Thread currently holding the lock.
    holder: Mutex<Option<ThreadId>>,
    /// Signalled on every unlock.
    released: Condvar,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `holder`; a guard exists only
// while `holder` names the guard's thread.
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// Creates an unlocked sleep lock.
    pub fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            holder: Mutex::new(None),
            released: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// Blocks until the lock is free, then takes it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock; waiting would
    /// never return.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        assert!(
            *holder != Some(me),
            "sleep lock {} re-acquired by its holder",
            self.name
        );
        while holder.is_some() {
            self.released.wait(&mut holder);
        }
        *holder = Some(me);
        SleepLockGuard::new(self)
    }

    /// Like [`lock`](Self::lock), but gives up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<SleepLockGuard<'_, T>> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut holder = self.holder.lock();
        assert!(
            *holder != Some(me),
            "sleep lock {} re-acquired by its holder",
            self.name
        );
        while holder.is_some() {
            if self
                .released
                .wait_until(&mut holder, deadline)
                .timed_out()
                && holder.is_some()
            {
                return None;
            }
        }
        *holder = Some(me);
        Some(SleepLockGuard::new(self))
    }

    /// Takes the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T>> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return None;
        }
        *holder = Some(thread::current().id());
        Some(SleepLockGuard::new(self))
    }

    /// Returns true if the calling thread holds the lock.
    pub fn holding(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    /// Returns true if any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.holder.lock().is_some()
    }

    /// Returns the lock's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn unlock(&self) {
        let mut holder = self.holder.lock();
        debug_assert_eq!(*holder, Some(thread::current().id()));
        *holder = None;
        drop(holder);
        self.released.notify_one();
    }
}

impl<T: ?Sized> std::fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("holder", &*self.holder.lock())
            .finish_non_exhaustive()
    }
}

/// RAII guard for a held [`SleepLock`]; unlocks on drop.
///
/// The guard is tied to the thread that took the lock and cannot be sent to
/// another one.
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> SleepLockGuard<'a, T> {
    fn new(lock: &'a SleepLock<T>) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// Returns true if the calling thread holds the underlying lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<T: ?Sized> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves exclusive ownership.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves exclusive ownership.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lock_and_holding() {
        let lock = SleepLock::new(5u32, "test");
        assert!(!lock.is_locked());
        assert!(!lock.holding());

        {
            let mut guard = lock.lock();
            assert!(guard.holding());
            assert!(lock.is_locked());
            *guard += 1;
        }

        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = Arc::new(SleepLock::new((), "test"));
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            assert!(other.try_lock().is_none());
            assert!(!other.holding());
            other.try_lock_for(Duration::from_millis(20)).is_none()
        });
        assert!(handle.join().unwrap());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let lock = Arc::new(SleepLock::new(0u64, "test"));
        let guard = lock.lock();

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let mut value = other.lock();
            *value += 1;
        });

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        handle.join().unwrap();
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(SleepLock::new(0u64, "test"));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let mut guard = lock.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *guard += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 8 * 200);
    }

    #[test]
    #[should_panic(expected = "re-acquired by its holder")]
    fn test_relock_panics() {
        let lock = SleepLock::new((), "test");
        let _guard = lock.lock();
        let _again = lock.lock();
    }
}
