//! Counting semaphore used as the parking point for lock acquisition.
//!
//! A [`Semaphore`] holds a number of permits. [`acquire`](Semaphore::acquire)
//! blocks the calling thread until a permit is available and takes it;
//! [`release`](Semaphore::release) returns permits and wakes sleepers.
//! Permits released before anyone is waiting are banked, so a wake can
//! never be lost to a thread that has not parked yet.
//!
//! The reader-writer lock uses two of these as its wait-points: one a
//! draining writer parks on until the last pre-existing reader departs,
//! and one readers park on until an active writer releases.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore for blocking wait/wake handoffs.
///
/// Unlike a guard-based permit type, this semaphore is a plain
/// acquire/release counter: callers pair each `acquire` with exactly one
/// released permit. That is the shape the lock state machines need — a
/// departing reader posts a permit the draining writer consumes, and a
/// releasing writer posts one permit per queued reader.
#[derive(Debug)]
pub struct Semaphore {
    /// Number of banked permits.
    permits: Mutex<u32>,
    /// Signalled when permits become available.
    available: Condvar,
}

impl Semaphore {
    /// Creates a new semaphore holding `permits` permits.
    #[must_use]
    pub const fn new(permits: u32) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Takes a permit if one is available, without blocking.
    ///
    /// Returns true if a permit was taken.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Returns `n` permits and wakes threads blocked in [`acquire`](Self::acquire).
    pub fn release(&self, n: u32) {
        let mut permits = self.permits.lock();
        *permits += n;
        drop(permits);
        // Wake outside the lock so a woken thread can re-take it immediately.
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Returns a snapshot of the currently banked permits.
    #[must_use]
    pub fn permits(&self) -> u32 {
        *self.permits.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
