//! Mutual-exclusion lock with a non-blocking probe variant.
//!
//! [`RawMutex`] is the bare owned/not-owned flag: blocking
//! [`lock`](RawMutex::lock), probing [`try_lock`](RawMutex::try_lock),
//! and [`unlock`](RawMutex::unlock). It also serves as the writer gate
//! inside the reader-writer lock. [`Mutex`] wraps it around a value with
//! RAII guards.
//!
//! # Contract
//!
//! The lock is not re-entrant: a thread that locks a mutex it already
//! holds deadlocks. Unlocking a mutex that is not held is a contract
//! violation and panics.

#![allow(unsafe_code)]

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A blocking mutual-exclusion lock with non-blocking probing.
///
/// The owned/not-owned flag lives in a single atomic. Acquisition takes
/// the fast path — one compare-and-swap — whenever the lock is free;
/// contended callers park on a condvar and re-probe when woken. Probing
/// via [`try_lock`](Self::try_lock) is exactly one compare-and-swap and
/// has no side effects when it fails.
///
/// No fairness is guaranteed among blocked waiters: a fresh caller may
/// take the lock ahead of a parked one.
#[derive(Debug)]
pub struct RawMutex {
    /// True iff some thread holds the lock.
    locked: AtomicBool,
    /// Number of threads parked on `unlocked`.
    parked: ParkingMutex<usize>,
    /// Signalled on unlock when waiters are parked.
    unlocked: Condvar,
}

impl RawMutex {
    /// Creates a new, unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            parked: ParkingMutex::new(0),
            unlocked: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking the calling thread until it is held.
    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.lock_slow();
    }

    #[cold]
    fn lock_slow(&self) {
        let mut parked = self.parked.lock();
        loop {
            // Re-probe under the parked lock: an unlock that stored
            // `false` before we parked cannot slip past this check, and
            // one that stores it afterwards will find our count and
            // signal.
            if self.try_lock() {
                return;
            }
            *parked += 1;
            self.unlocked.wait(&mut parked);
            *parked -= 1;
        }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns true and holds the lock on success. On failure the lock
    /// state is untouched.
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock and wakes one parked waiter, if any.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not locked.
    pub fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        assert!(was_locked, "unlock of an unlocked mutex");
        let waiters = *self.parked.lock();
        if waiters > 0 {
            self.unlocked.notify_one();
        }
    }

    /// Returns true if the mutex is currently locked.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutual-exclusion lock protecting a value of type `T`.
///
/// # Example
///
/// ```
/// use trylock::Mutex;
///
/// let mutex = Mutex::new(41);
/// *mutex.lock() += 1;
/// assert_eq!(*mutex.lock(), 42);
/// ```
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// Safety: the lock serializes access to the data, so sharing the mutex
// across threads only requires the value to be sendable.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the mutex, blocking until the guard can be returned.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Returns true if the mutex is currently locked.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: the exclusive borrow proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// A guard that releases the mutex when dropped.
#[must_use = "guard will be immediately released if not held"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T: Send> Send for MutexGuard<'_, T> {}
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("data", &**self).finish()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}
