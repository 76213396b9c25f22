/*!
 * Synchronization Traits
 *
 * Seams between the condition variable and the things it borrows:
 * - `NativeLock`: the exclusive lock a waiter holds (minimal contract)
 * - `Timepoint`: an absolute deadline on any clock
 */

use std::time::{Instant, SystemTime};

/// Exclusive lock bound to a native `pthread_mutex_t`
///
/// The condition variable only borrows the lock for the duration of a
/// wait. It checks `owns_lock` first, then hands `native_mutex` to the
/// kernel, which releases and re-acquires it atomically around the
/// suspension.
///
/// # Safety
///
/// Implementors must guarantee that whenever `owns_lock` returns `true`:
/// - `native_mutex` points to an initialized mutex that stays valid and
///   at a fixed address for the lifetime of the lock object
/// - that mutex is currently locked by the calling thread
pub unsafe trait NativeLock {
    /// Whether this lock is held, and held by the calling thread
    fn owns_lock(&self) -> bool;

    /// Raw native mutex handle
    fn native_mutex(&self) -> *mut libc::pthread_mutex_t;

    /// Called right before the kernel releases the mutex for a wait
    fn before_wait(&mut self) {}

    /// Called right after the kernel re-acquired the mutex
    ///
    /// Not called when the native wait fails, since the kernel then makes
    /// no promise about having re-acquired it.
    fn after_wait(&mut self) {}
}

/// Absolute point in time on some clock
///
/// `remaining` is sampled once when a wait starts, then converted to a
/// monotonic deadline. Adjusting the clock the timepoint lives on after
/// that has no effect on how long the wait blocks.
pub trait Timepoint {
    /// Signed time left until this point, measured on its own clock now
    fn remaining(&self) -> time::Duration;
}

impl Timepoint for Instant {
    fn remaining(&self) -> time::Duration {
        let left = self.saturating_duration_since(Instant::now());
        time::Duration::try_from(left).unwrap_or(time::Duration::MAX)
    }
}

impl Timepoint for SystemTime {
    fn remaining(&self) -> time::Duration {
        match self.duration_since(SystemTime::now()) {
            Ok(left) => time::Duration::try_from(left).unwrap_or(time::Duration::MAX),
            Err(past) => -time::Duration::try_from(past.duration()).unwrap_or(time::Duration::MAX),
        }
    }
}

impl Timepoint for time::OffsetDateTime {
    fn remaining(&self) -> time::Duration {
        *self - time::OffsetDateTime::now_utc()
    }
}

impl<T: Timepoint + ?Sized> Timepoint for &T {
    #[inline]
    fn remaining(&self) -> time::Duration {
        (**self).remaining()
    }
}
