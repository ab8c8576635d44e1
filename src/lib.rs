//! Blocking locks with non-blocking probe acquisition.
//!
//! This crate provides a mutual-exclusion lock and a reader-writer lock.
//! Each offers a blocking acquire and a "try" variant that immediately
//! reports success or failure instead of waiting — and a failed probe
//! leaves the lock state exactly as it found it, even under arbitrary
//! interleavings of readers, writers, and other probes.
//!
//! # Primitives
//!
//! - [`Mutex`] / [`RawMutex`]: mutual exclusion with a single-CAS probe
//! - [`RwLock`] / [`RawRwLock`]: many readers or one writer, with probes
//!   on both sides and writer-starvation prevention
//! - [`Semaphore`]: the counting wait/wake primitive the reader-writer
//!   lock parks on
//!
//! The `Raw` types expose the bare lock/unlock protocol for embedding in
//! other synchronization constructs; the generic types wrap a value and
//! release on guard drop.
//!
//! # Writer-Preference Fairness
//!
//! A writer that begins acquiring the [`RwLock`] blocks new readers
//! while it drains the readers already inside. This prevents writer
//! starvation under heavy read load. No further ordering is guaranteed:
//! readers and writers parked at the same time race for the next turn.
//!
//! # Probing
//!
//! `try_lock`, `try_read`, and `try_write` never block and never retry
//! internally. A failed probe is a normal outcome the caller handles —
//! fall back to the blocking acquire, or skip the critical section:
//!
//! ```
//! use trylock::Mutex;
//!
//! let cache = Mutex::new(Vec::<u64>::new());
//!
//! // Opportunistic update: skip if someone else is refreshing.
//! if let Some(mut entries) = cache.try_lock() {
//!     entries.push(7);
//! }
//! ```
//!
//! # Contract
//!
//! These locks are not re-entrant: re-acquiring a lock the current
//! thread already holds deadlocks. Unlocking a lock that is not held
//! panics. Guards release on drop, including during unwinding; there is
//! no poisoning.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

mod mutex;
mod rwlock;
mod semaphore;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use rwlock::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard, MAX_READERS};
pub use semaphore::Semaphore;
