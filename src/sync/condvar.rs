/*!
 * Monotonic Condition Variable
 *
 * `pthread_cond_t` configured with `CLOCK_MONOTONIC`, so timed waits
 * measure real elapsed time no matter how the wall clock is stepped
 * (NTP corrections, manual changes, leap seconds).
 *
 * # Design
 *
 * - The native object is boxed: moving a `MonotonicCondvar` never
 *   relocates the `pthread_cond_t` a waiter may be blocked on
 * - Waits borrow `&self`, so the condvar cannot be dropped while any
 *   thread is still inside a wait
 * - Every wait checks lock ownership first and fails with
 *   `SyncError::NotPermitted` instead of handing an unheld mutex to the
 *   kernel
 * - Predicate-guarded timed waits compute one deadline on entry and reuse
 *   it for every retry, so spurious wakeups never extend the total wait
 */

use super::clock::{Deadline, IntoTimeout};
use super::errors::{check, SyncError, SyncResult};
use super::traits::{NativeLock, Timepoint};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ops::DerefMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// Why a timed wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// Woken by a notification (or spuriously) before the deadline
    NoTimeout,
    /// The deadline passed
    Timeout,
}

impl WaitStatus {
    /// Check if the wait ended because the deadline passed
    #[inline(always)]
    pub fn timed_out(&self) -> bool {
        matches!(self, WaitStatus::Timeout)
    }
}

/// Condition variable whose timed waits run on the monotonic clock
///
/// Cooperates with any [`NativeLock`], typically a [`UniqueLock`] from
/// this crate's [`Mutex`]. All threads waiting at the same time must use
/// the same mutex.
///
/// # Examples
///
/// ```
/// use monotonic_condvar::sync::{MonotonicCondvar, Mutex};
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
///
/// let pair = Arc::new((Mutex::new(false).unwrap(), MonotonicCondvar::new().unwrap()));
/// let pair_clone = pair.clone();
///
/// thread::spawn(move || {
///     let (ready, cv) = &*pair_clone;
///     *ready.lock().unwrap() = true;
///     cv.notify_one().unwrap();
/// });
///
/// let (ready, cv) = &*pair;
/// let mut guard = ready.lock().unwrap();
/// let woke = cv
///     .wait_for_with(&mut guard, Duration::from_secs(5), |ready| *ready)
///     .unwrap();
/// assert!(woke);
/// ```
///
/// [`UniqueLock`]: super::UniqueLock
/// [`Mutex`]: super::Mutex
pub struct MonotonicCondvar {
    raw: Box<UnsafeCell<MaybeUninit<libc::pthread_cond_t>>>,
    waiters: AtomicUsize,
}

// SAFETY: the native object is pinned in its box and not tied to the
// creating thread
unsafe impl Send for MonotonicCondvar {}
// SAFETY: pthread condition variables may be signaled and waited on from
// any number of threads at once
unsafe impl Sync for MonotonicCondvar {}

impl MonotonicCondvar {
    /// Create a condition variable bound to `CLOCK_MONOTONIC`
    ///
    /// Fails as a whole if any attribute or init step fails; there is no
    /// fallback to the wall clock.
    pub fn new() -> SyncResult<Self> {
        let raw = Box::new(UnsafeCell::new(MaybeUninit::uninit()));
        // SAFETY: `raw` is a fresh, exclusively owned allocation
        unsafe { init_monotonic_cond(raw.get().cast())? };

        trace!("monotonic condition variable initialized");
        Ok(Self {
            raw,
            waiters: AtomicUsize::new(0),
        })
    }

    #[inline]
    fn raw(&self) -> *mut libc::pthread_cond_t {
        self.raw.get().cast()
    }

    /// Raw native handle
    ///
    /// The pointer stays valid for the lifetime of `self`. Destroying or
    /// re-initializing it through the raw handle is undefined behavior.
    #[inline]
    pub fn native_handle(&self) -> *mut libc::pthread_cond_t {
        self.raw()
    }

    /// Approximate number of threads blocked in a wait (for diagnostics)
    #[inline]
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    /// Wake at most one waiting thread
    ///
    /// Which waiter wakes is up to the OS scheduler. No-op without
    /// waiters.
    #[inline]
    pub fn notify_one(&self) -> SyncResult<()> {
        // SAFETY: initialized in `new`, pinned until drop
        check("pthread_cond_signal", unsafe {
            libc::pthread_cond_signal(self.raw())
        })
    }

    /// Wake every waiting thread
    #[inline]
    pub fn notify_all(&self) -> SyncResult<()> {
        // SAFETY: initialized in `new`, pinned until drop
        check("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.raw())
        })
    }

    /// Atomically release `lock`, block until notified, then re-acquire
    ///
    /// May return spuriously; prefer [`wait_with`](Self::wait_with).
    pub fn wait<L>(&self, lock: &mut L) -> SyncResult<()>
    where
        L: NativeLock + ?Sized,
    {
        ensure_owned(lock)?;
        let mutex = lock.native_mutex();

        self.waiters.fetch_add(1, Ordering::Relaxed);
        lock.before_wait();
        // SAFETY: `ensure_owned` proved the mutex is held by this thread;
        // the condvar is initialized and pinned
        let code = unsafe { libc::pthread_cond_wait(self.raw(), mutex) };
        if code == 0 {
            lock.after_wait();
        }
        self.waiters.fetch_sub(1, Ordering::Relaxed);

        check("pthread_cond_wait", code)
    }

    /// Block until `predicate` holds
    ///
    /// The predicate is checked before the first wait and after every
    /// wakeup, so on return it holds and the lock is held.
    pub fn wait_with<L, F>(&self, lock: &mut L, mut predicate: F) -> SyncResult<()>
    where
        L: NativeLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_owned(lock)?;
        while !predicate(&mut **lock) {
            self.wait(lock)?;
        }
        Ok(())
    }

    /// Wait for a notification for at most `timeout`
    ///
    /// A zero (or negative signed) timeout polls: it never blocks and
    /// reports `Timeout` unless already notified.
    pub fn wait_for<L>(&self, lock: &mut L, timeout: impl IntoTimeout) -> SyncResult<WaitStatus>
    where
        L: NativeLock + ?Sized,
    {
        ensure_owned(lock)?;
        let deadline = Deadline::after(timeout)?;
        self.wait_until_deadline(lock, deadline)
    }

    /// Wait until `predicate` holds or `timeout` elapses
    ///
    /// Returns the predicate's final value: `false` means the timeout
    /// expired with the condition still unmet.
    pub fn wait_for_with<L, F>(
        &self,
        lock: &mut L,
        timeout: impl IntoTimeout,
        predicate: F,
    ) -> SyncResult<bool>
    where
        L: NativeLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_owned(lock)?;
        let deadline = Deadline::after(timeout)?;
        self.wait_until_deadline_with(lock, deadline, predicate)
    }

    /// Wait for a notification until `deadline` on any clock
    ///
    /// The time left is read from the deadline's clock once, at the call,
    /// and the wait itself then runs on the monotonic clock.
    pub fn wait_until<L, T>(&self, lock: &mut L, deadline: &T) -> SyncResult<WaitStatus>
    where
        L: NativeLock + ?Sized,
        T: Timepoint + ?Sized,
    {
        ensure_owned(lock)?;
        let deadline = Deadline::after(deadline.remaining())?;
        self.wait_until_deadline(lock, deadline)
    }

    /// Wait until `predicate` holds or `deadline` on any clock passes
    pub fn wait_until_with<L, T, F>(
        &self,
        lock: &mut L,
        deadline: &T,
        predicate: F,
    ) -> SyncResult<bool>
    where
        L: NativeLock + DerefMut,
        T: Timepoint + ?Sized,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_owned(lock)?;
        let deadline = Deadline::after(deadline.remaining())?;
        self.wait_until_deadline_with(lock, deadline, predicate)
    }

    /// Wait for a notification until an absolute monotonic deadline
    ///
    /// An unexpected OS failure is returned as an error, never reported
    /// as a timeout.
    pub fn wait_until_deadline<L>(&self, lock: &mut L, deadline: Deadline) -> SyncResult<WaitStatus>
    where
        L: NativeLock + ?Sized,
    {
        ensure_owned(lock)?;
        let mutex = lock.native_mutex();
        let abstime = deadline.as_timespec();

        self.waiters.fetch_add(1, Ordering::Relaxed);
        lock.before_wait();
        // SAFETY: `ensure_owned` proved the mutex is held by this thread;
        // the condvar is initialized and pinned
        let code = unsafe { libc::pthread_cond_timedwait(self.raw(), mutex, &abstime) };
        // The mutex is only re-acquired on wakeup or timeout
        if code == 0 || code == libc::ETIMEDOUT {
            lock.after_wait();
        }
        self.waiters.fetch_sub(1, Ordering::Relaxed);

        match code {
            0 => Ok(WaitStatus::NoTimeout),
            libc::ETIMEDOUT => {
                trace!(
                    secs = deadline.secs(),
                    nanos = deadline.subsec_nanos(),
                    "monotonic wait timed out"
                );
                Ok(WaitStatus::Timeout)
            }
            code => Err(SyncError::Os {
                op: "pthread_cond_timedwait",
                code,
            }),
        }
    }

    /// Wait until `predicate` holds or the monotonic `deadline` passes
    ///
    /// The same deadline is reused for every retry. After a timeout the
    /// predicate is evaluated once more and its value returned.
    pub fn wait_until_deadline_with<L, F>(
        &self,
        lock: &mut L,
        deadline: Deadline,
        mut predicate: F,
    ) -> SyncResult<bool>
    where
        L: NativeLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_owned(lock)?;
        while !predicate(&mut **lock) {
            if self.wait_until_deadline(lock, deadline)?.timed_out() {
                return Ok(predicate(&mut **lock));
            }
        }
        Ok(true)
    }
}

/// Initialize `cond` with its timeout clock set to `CLOCK_MONOTONIC`
///
/// # Safety
///
/// `cond` must point to writable, uninitialized storage.
unsafe fn init_monotonic_cond(cond: *mut libc::pthread_cond_t) -> SyncResult<()> {
    let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
    let code = libc::pthread_condattr_init(attr.as_mut_ptr());
    if code != 0 {
        return Err(SyncError::Init {
            op: "pthread_condattr_init",
            code,
        });
    }

    let mut result = match libc::pthread_condattr_setclock(attr.as_mut_ptr(), libc::CLOCK_MONOTONIC) {
        0 => Ok(()),
        code => Err(SyncError::Init {
            op: "pthread_condattr_setclock",
            code,
        }),
    };
    if result.is_ok() {
        result = match libc::pthread_cond_init(cond, attr.as_ptr()) {
            0 => Ok(()),
            code => Err(SyncError::Init {
                op: "pthread_cond_init",
                code,
            }),
        };
    }

    libc::pthread_condattr_destroy(attr.as_mut_ptr());
    result
}

#[inline]
fn ensure_owned<L: NativeLock + ?Sized>(lock: &L) -> SyncResult<()> {
    if lock.owns_lock() {
        Ok(())
    } else {
        Err(SyncError::NotPermitted)
    }
}

impl Drop for MonotonicCondvar {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no wait can be in progress
        let code = unsafe { libc::pthread_cond_destroy(self.raw()) };
        if code != 0 {
            warn!(code, "pthread_cond_destroy failed");
        }
    }
}

impl fmt::Debug for MonotonicCondvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicCondvar")
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}
