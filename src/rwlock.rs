//! Reader-writer lock with non-blocking probe variants.
//!
//! [`RawRwLock`] admits many concurrent readers or one exclusive writer.
//! Writer starvation is prevented: a writer that begins acquiring blocks
//! new readers while it drains the ones already present. [`RwLock`]
//! wraps the raw lock around a value with RAII guards.
//!
//! # Protocol
//!
//! The state machine is carried by two atomic counters and two parking
//! points, coordinated by an embedded [`RawMutex`] writer gate:
//!
//! - `reader_count` holds the number of registered readers. A writer
//!   subtracts [`MAX_READERS`] from it, flipping the sign; a reader that
//!   observes a negative count after registering knows a writer is
//!   active or draining and parks instead of proceeding.
//! - `reader_wait` holds the number of pre-existing readers a draining
//!   writer still has to wait for. Each of those readers decrements it
//!   on departure; the one that brings it to zero wakes the writer.
//!
//! Probes ([`try_lock`](RawRwLock::try_lock),
//! [`try_lock_shared`](RawRwLock::try_lock_shared)) perform the same
//! counter transitions but only when they can complete instantly, so a
//! failed probe leaves no trace for concurrent threads to observe.
//!
//! # Fairness Characteristics
//!
//! | Scenario                  | Behavior                                   |
//! |---------------------------|--------------------------------------------|
//! | No writer active          | Readers acquire immediately                |
//! | Writer draining or active | New readers park until the writer releases |
//! | Existing readers + writer | Writer waits for those readers only        |
//! | Multiple writers          | Serialized on the gate, in no fixed order  |
//!
//! Beyond writer-starvation prevention there is no ordering guarantee,
//! neither among waiting readers nor among waiting writers.
//!
//! # Contract
//!
//! The lock is not re-entrant. Releasing a side that is not held is a
//! contract violation and panics.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::mutex::RawMutex;
use crate::semaphore::Semaphore;

/// Upper bound on concurrently registered readers.
///
/// Doubles as the bias a writer subtracts from the reader count: with at
/// most `MAX_READERS` readers registered, the biased count is negative
/// exactly while a writer is draining or active.
pub const MAX_READERS: i32 = 1 << 30;

/// A blocking reader-writer lock with non-blocking probing.
///
/// Many readers may hold the lock concurrently; a writer excludes
/// readers and other writers. The lock is a fixed-size value with no
/// per-operation allocation, so it can be embedded directly in larger
/// structures.
#[derive(Debug)]
pub struct RawRwLock {
    /// Serializes writers; held for a writer's whole critical section.
    writer_gate: RawMutex,
    /// Registered readers, biased by `-MAX_READERS` while a writer is
    /// draining or active.
    reader_count: AtomicI32,
    /// Departing readers a draining writer still waits for.
    reader_wait: AtomicI32,
    /// A draining writer parks here until the last reader departs.
    writer_parked: Semaphore,
    /// Readers arriving during a write park here until it releases.
    readers_parked: Semaphore,
}

impl RawRwLock {
    /// Creates a new, unlocked reader-writer lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            writer_gate: RawMutex::new(),
            reader_count: AtomicI32::new(0),
            reader_wait: AtomicI32::new(0),
            writer_parked: Semaphore::new(0),
            readers_parked: Semaphore::new(0),
        }
    }

    /// Acquires the lock for writing, blocking until exclusive.
    ///
    /// On return every reader registered before the drain began has
    /// departed, and no new reader can register until
    /// [`unlock`](Self::unlock).
    pub fn lock(&self) {
        // First, resolve competition with other writers.
        self.writer_gate.lock();
        // Announce the write to readers: the bias flips the count
        // negative, and the prior value is the readers already inside.
        let readers = self.reader_count.fetch_sub(MAX_READERS, Ordering::AcqRel);
        // Wait for those readers to depart, unless they already have.
        // Departures that happened between the two counter updates show
        // up as a negative `reader_wait`, cancelling against `readers`.
        if readers != 0
            && self.reader_wait.fetch_add(readers, Ordering::AcqRel) + readers != 0
        {
            self.writer_parked.acquire();
        }
    }

    /// Attempts to acquire the lock for writing without blocking.
    ///
    /// Returns true and holds the lock on success. Fails when another
    /// writer holds the gate or any reader is registered; the failure
    /// path leaves `reader_count` and `reader_wait` untouched, so
    /// concurrent threads never observe a half-made attempt.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if !self.writer_gate.try_lock() {
            return false;
        }
        // The bias may only be applied when no reader is present: the
        // compare-exchange tests for zero readers and flips the count in
        // one step. Entering the drain phase is not an option here —
        // draining means waiting, and a probe must not wait.
        if self
            .reader_count
            .compare_exchange(0, -MAX_READERS, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.writer_gate.unlock();
            return false;
        }
        true
    }

    /// Releases the write lock and admits queued readers.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not write-locked.
    #[allow(clippy::cast_sign_loss)]
    pub fn unlock(&self) {
        // Undo the bias; the unbiased value is the number of readers
        // that registered while the write was in progress.
        let queued = self.reader_count.fetch_add(MAX_READERS, Ordering::AcqRel) + MAX_READERS;
        assert!(queued < MAX_READERS, "unlock of an unlocked RwLock");
        if queued > 0 {
            self.readers_parked.release(queued as u32);
        }
        self.writer_gate.unlock();
    }

    /// Acquires the lock for reading, blocking while a writer is
    /// draining or active.
    pub fn lock_shared(&self) {
        if self.reader_count.fetch_add(1, Ordering::AcqRel) + 1 < 0 {
            // A writer is in charge. The increment above already
            // registered us, so the writer's release hands us the lock
            // by posting one permit per queued reader.
            self.readers_parked.acquire();
        }
    }

    /// Attempts to acquire the lock for reading without blocking.
    ///
    /// Returns true and holds a read lock on success. Fails while a
    /// writer is draining or active; the failure path never touches the
    /// counter, so a draining writer cannot mistake the probe for a
    /// reader it must wait for.
    #[must_use]
    pub fn try_lock_shared(&self) -> bool {
        let mut count = self.reader_count.load(Ordering::Relaxed);
        loop {
            if count < 0 {
                return false;
            }
            match self.reader_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
    }

    /// Releases one read lock.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not read-locked.
    pub fn unlock_shared(&self) {
        let remaining = self.reader_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining < 0 {
            self.unlock_shared_slow(remaining);
        }
    }

    #[cold]
    fn unlock_shared_slow(&self, remaining: i32) {
        // `remaining + 1` recovers the pre-decrement count: zero means
        // no reader was registered at all, and exactly `-MAX_READERS`
        // means a writer held the lock with no readers inside.
        assert!(
            remaining + 1 != 0 && remaining + 1 != -MAX_READERS,
            "read-unlock of an unlocked RwLock"
        );
        // A writer is draining and counted us; the departure that brings
        // its tally to zero wakes it.
        if self.reader_wait.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.writer_parked.release(1);
        }
    }

    #[cfg(test)]
    fn debug_counters(&self) -> (i32, i32) {
        (
            self.reader_count.load(Ordering::SeqCst),
            self.reader_wait.load(Ordering::SeqCst),
        )
    }
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A reader-writer lock protecting a value of type `T`.
///
/// # Example
///
/// ```
/// use trylock::RwLock;
///
/// let lock = RwLock::new(vec![1, 2, 3]);
///
/// {
///     let r1 = lock.read();
///     let r2 = lock.read();
///     assert_eq!(r1.len() + r2.len(), 6);
/// }
///
/// lock.write().push(4);
/// assert_eq!(lock.read().len(), 4);
/// ```
pub struct RwLock<T> {
    raw: RawRwLock,
    data: UnsafeCell<T>,
}

// Safety: readers alias the data, so sharing the lock across threads
// requires the value to be shareable as well as sendable.
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates a new lock containing the given value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawRwLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires a read guard, blocking while a writer is in charge.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.lock_shared();
        RwLockReadGuard { lock: self }
    }

    /// Attempts to acquire a read guard without blocking.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if self.raw.try_lock_shared() {
            Some(RwLockReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires a write guard, blocking until exclusive.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.lock();
        RwLockWriteGuard { lock: self }
    }

    /// Attempts to acquire a write guard without blocking.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(RwLockWriteGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed: the exclusive borrow proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("RwLock").field("data", &&*guard).finish(),
            None => f.debug_struct("RwLock").field("data", &"<locked>").finish(),
        }
    }
}

/// A guard for shared read access, released on drop.
#[must_use = "guard will be immediately released if not held"]
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

unsafe impl<T: Sync> Send for RwLockReadGuard<'_, T> {}
unsafe impl<T: Sync> Sync for RwLockReadGuard<'_, T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLockReadGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock_shared();
    }
}

/// A guard for exclusive write access, released on drop.
#[must_use = "guard will be immediately released if not held"]
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

unsafe impl<T: Send> Send for RwLockWriteGuard<'_, T> {}
unsafe impl<T: Sync> Sync for RwLockWriteGuard<'_, T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLockWriteGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::init_test_logging;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_probe_cycles() {
        init_test_logging();
        let rw = RawRwLock::new();
        assert!(rw.try_lock(), "rw lock must be unlocked");
        assert!(!rw.try_lock(), "rw lock must be locked");

        rw.unlock();
        assert!(rw.try_lock(), "rw lock must be unlocked");
        assert!(!rw.try_lock(), "rw lock must be locked");

        rw.unlock();
        rw.lock();
        assert!(!rw.try_lock(), "rw lock must be locked");
        assert!(!rw.try_lock(), "repeated probes stay false");
        rw.unlock();
    }

    #[test]
    fn read_probe_admits_many_readers() {
        init_test_logging();
        let rw = RawRwLock::new();
        assert!(rw.try_lock_shared(), "rw lock must be unlocked");
        assert!(rw.try_lock_shared(), "readers must coexist");
        assert!(rw.try_lock_shared(), "readers must coexist");
        rw.unlock_shared();
        rw.unlock_shared();
        rw.unlock_shared();

        rw.lock();
        assert!(!rw.try_lock_shared(), "writer excludes readers");
        assert!(!rw.try_lock_shared(), "writer excludes readers");
        rw.unlock();
    }

    #[test]
    fn failed_write_probe_restores_counters_exactly() {
        init_test_logging();
        let rw = RawRwLock::new();
        rw.lock_shared();
        let before = rw.debug_counters();

        for _ in 0..1000 {
            assert!(!rw.try_lock(), "probe must fail while a reader is in");
        }
        assert_eq!(
            rw.debug_counters(),
            before,
            "failed probes must leave both counters untouched"
        );

        rw.unlock_shared();
        // A normal blocking acquire must still work after the probe storm.
        rw.lock();
        assert_eq!(rw.debug_counters().1, 0, "no residual drain tally");
        rw.unlock();
    }

    #[test]
    fn failed_read_probe_restores_counters_exactly() {
        init_test_logging();
        let rw = RawRwLock::new();
        rw.lock();
        let before = rw.debug_counters();

        for _ in 0..1000 {
            assert!(!rw.try_lock_shared(), "probe must fail while writing");
        }
        assert_eq!(rw.debug_counters(), before);

        rw.unlock();
        rw.lock_shared();
        rw.unlock_shared();
    }

    #[test]
    fn writer_waits_for_preexisting_readers() {
        init_test_logging();
        let rw = Arc::new(RawRwLock::new());
        rw.lock_shared();
        rw.lock_shared();

        let writer_acquired = Arc::new(AtomicBool::new(false));
        let rw2 = Arc::clone(&rw);
        let flag = Arc::clone(&writer_acquired);
        let writer = thread::spawn(move || {
            rw2.lock();
            flag.store(true, AtomicOrdering::Release);
            rw2.unlock();
        });

        // Writer must be parked while both readers are inside.
        thread::sleep(Duration::from_millis(50));
        assert!(
            !writer_acquired.load(AtomicOrdering::Acquire),
            "writer must drain readers before acquiring"
        );

        rw.unlock_shared();
        thread::sleep(Duration::from_millis(50));
        assert!(
            !writer_acquired.load(AtomicOrdering::Acquire),
            "one reader still inside"
        );

        rw.unlock_shared();
        writer.join().expect("writer thread failed");
        assert!(writer_acquired.load(AtomicOrdering::Acquire));
    }

    #[test]
    fn draining_writer_blocks_new_readers() {
        init_test_logging();
        let rw = Arc::new(RawRwLock::new());
        rw.lock_shared();

        // Start a writer; it parks draining the reader above.
        let rw2 = Arc::clone(&rw);
        let writer = thread::spawn(move || {
            rw2.lock();
            rw2.unlock();
        });

        // Once the drain has begun, read probes must fail even though
        // the writer has not yet acquired.
        let mut observed_backoff = false;
        for _ in 0..200 {
            if !rw.try_lock_shared() {
                observed_backoff = true;
                break;
            }
            rw.unlock_shared();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(observed_backoff, "drain must turn new read probes away");

        rw.unlock_shared();
        writer.join().expect("writer thread failed");
    }

    #[test]
    fn queued_readers_admitted_on_write_unlock() {
        init_test_logging();
        let rw = Arc::new(RwLock::new(0u32));
        let mut writer = rw.write();
        *writer = 9;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rw = Arc::clone(&rw);
                thread::spawn(move || *rw.read())
            })
            .collect();

        // Readers are parked behind the writer.
        thread::sleep(Duration::from_millis(50));
        drop(writer);

        for handle in handles {
            assert_eq!(handle.join().expect("reader thread failed"), 9);
        }
    }

    #[test]
    #[should_panic(expected = "unlock of an unlocked RwLock")]
    fn write_unlock_of_unlocked_lock_panics() {
        let rw = RawRwLock::new();
        rw.unlock();
    }

    #[test]
    #[should_panic(expected = "read-unlock of an unlocked RwLock")]
    fn read_unlock_of_unlocked_lock_panics() {
        let rw = RawRwLock::new();
        rw.unlock_shared();
    }

    #[test]
    fn guards_release_on_drop() {
        init_test_logging();
        let lock = RwLock::new(1u32);
        {
            let _read = lock.read();
            assert!(lock.try_write().is_none());
            assert!(lock.try_read().is_some());
        }
        {
            let _write = lock.write();
            assert!(lock.try_read().is_none());
            assert!(lock.try_write().is_none());
        }
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn write_mutations_visible_to_readers() {
        init_test_logging();
        let lock = RwLock::new(String::from("a"));
        lock.write().push('b');
        assert_eq!(lock.read().as_str(), "ab");
    }

    #[test]
    fn get_mut_and_into_inner() {
        init_test_logging();
        let mut lock = RwLock::new(10);
        *lock.get_mut() += 1;
        assert_eq!(lock.into_inner(), 11);
    }

    #[test]
    fn rwlock_default_and_debug() {
        let lock: RwLock<u32> = RwLock::default();
        assert!(format!("{lock:?}").contains('0'));
        let _write = lock.write();
        assert!(format!("{lock:?}").contains("<locked>"));
    }

    #[test]
    fn readers_and_writers_interleave_correctly() {
        init_test_logging();
        let lock = Arc::new(RwLock::new(0i64));
        let writers = 4;
        let readers = 4;
        let iters = 500;

        let mut handles = Vec::new();
        for _ in 0..writers {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..iters {
                    *lock.write() += 1;
                }
            }));
        }
        for _ in 0..readers {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..iters {
                    let value = *lock.read();
                    assert!(value >= 0, "torn read observed");
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread failed");
        }
        assert_eq!(*lock.read(), i64::from(writers) * i64::from(iters));
    }
}
