/*!
 * Native Mutex
 *
 * Exclusive lock over a heap-pinned `pthread_mutex_t`, the lock type the
 * monotonic condition variable waits with.
 *
 * # Design
 *
 * - The native mutex is boxed so moving the Rust value never relocates it
 * - Created with `PTHREAD_MUTEX_ERRORCHECK`: relocking from the owning
 *   thread fails with `EDEADLK` instead of deadlocking
 * - The owning thread is tracked beside the native mutex so waits can
 *   verify ownership before handing the mutex to the kernel
 * - `UniqueLock` can be unlocked and relocked without being dropped,
 *   and is `!Send` since a pthread mutex must be unlocked by its locker
 */

use super::errors::{check, SyncError, SyncResult};
use super::traits::NativeLock;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// No thread holds the mutex
const NO_OWNER: usize = 0;

static NEXT_THREAD_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<usize> = const { Cell::new(NO_OWNER) };
}

/// Small nonzero identifier for the calling thread
fn current_thread_token() -> usize {
    THREAD_TOKEN.with(|token| {
        let mut value = token.get();
        if value == NO_OWNER {
            value = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
            token.set(value);
        }
        value
    })
}

/// Mutual exclusion lock backed by `pthread_mutex_t`
pub struct Mutex<T: ?Sized> {
    raw: Box<UnsafeCell<MaybeUninit<libc::pthread_mutex_t>>>,
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

// SAFETY: the native mutex is pinned in its box and never locked when moved
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// SAFETY: the native mutex serializes all access to `data`
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new unlocked mutex
    ///
    /// Fails if the native attribute setup or initialization fails; in
    /// that case nothing is left to destroy.
    pub fn new(value: T) -> SyncResult<Self> {
        let raw = Box::new(UnsafeCell::new(MaybeUninit::uninit()));
        // SAFETY: `raw` is a fresh, exclusively owned allocation
        unsafe { init_errorcheck_mutex(raw.get().cast())? };

        Ok(Self {
            raw,
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(value),
        })
    }
}

/// Initialize `mutex` as an error-checking mutex
///
/// # Safety
///
/// `mutex` must point to writable, uninitialized storage.
unsafe fn init_errorcheck_mutex(mutex: *mut libc::pthread_mutex_t) -> SyncResult<()> {
    let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    let code = libc::pthread_mutexattr_init(attr.as_mut_ptr());
    if code != 0 {
        return Err(SyncError::Init {
            op: "pthread_mutexattr_init",
            code,
        });
    }

    let mut result =
        match libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK) {
            0 => Ok(()),
            code => Err(SyncError::Init {
                op: "pthread_mutexattr_settype",
                code,
            }),
        };
    if result.is_ok() {
        result = match libc::pthread_mutex_init(mutex, attr.as_ptr()) {
            0 => Ok(()),
            code => Err(SyncError::Init {
                op: "pthread_mutex_init",
                code,
            }),
        };
    }

    libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
    result
}

impl<T: ?Sized> Mutex<T> {
    #[inline]
    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get().cast()
    }

    /// Block until the mutex is acquired
    ///
    /// Fails with an `EDEADLK` OS error if the calling thread already
    /// holds it.
    pub fn lock(&self) -> SyncResult<UniqueLock<'_, T>> {
        self.raw_lock()?;
        Ok(UniqueLock::acquired(self))
    }

    /// Acquire the mutex if it is free, `None` if it is held
    pub fn try_lock(&self) -> SyncResult<Option<UniqueLock<'_, T>>> {
        // SAFETY: the mutex was initialized in `new` and is pinned in its box
        match unsafe { libc::pthread_mutex_trylock(self.raw()) } {
            0 => {
                self.mark_owned();
                Ok(Some(UniqueLock::acquired(self)))
            }
            libc::EBUSY => Ok(None),
            code => Err(SyncError::Os {
                op: "pthread_mutex_trylock",
                code,
            }),
        }
    }

    /// Whether the calling thread currently holds the mutex
    #[inline]
    pub fn is_locked_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    /// Mutable access without locking; exclusivity comes from `&mut self`
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn raw_lock(&self) -> SyncResult<()> {
        // SAFETY: the mutex was initialized in `new` and is pinned in its box
        check("pthread_mutex_lock", unsafe {
            libc::pthread_mutex_lock(self.raw())
        })?;
        self.mark_owned();
        Ok(())
    }

    fn raw_unlock(&self) -> SyncResult<()> {
        self.mark_released();
        // SAFETY: only called by a guard that holds the mutex
        check("pthread_mutex_unlock", unsafe {
            libc::pthread_mutex_unlock(self.raw())
        })
    }

    #[inline]
    fn mark_owned(&self) {
        self.owner.store(current_thread_token(), Ordering::Relaxed);
    }

    #[inline]
    fn mark_released(&self) {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
    }
}

impl<T: ?Sized> Drop for Mutex<T> {
    fn drop(&mut self) {
        // SAFETY: no guard can outlive the borrow it holds on `self`
        let code = unsafe { libc::pthread_mutex_destroy(self.raw()) };
        if code != 0 {
            warn!(code, "pthread_mutex_destroy failed");
        }
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked_by_current_thread", &self.is_locked_by_current_thread())
            .finish_non_exhaustive()
    }
}

/// Movable ownership of a locked `Mutex`
///
/// Unlocks on drop if still locked. Dereferencing an explicitly unlocked
/// guard panics.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct UniqueLock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    owns: bool,
    _not_send: PhantomData<*const ()>,
}

// SAFETY: shared access to the guard only hands out `&T`
unsafe impl<T: ?Sized + Sync> Sync for UniqueLock<'_, T> {}

impl<'a, T: ?Sized> UniqueLock<'a, T> {
    fn acquired(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            owns: true,
            _not_send: PhantomData,
        }
    }

    /// The mutex this guard belongs to
    #[inline]
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    /// Release the mutex early, keeping the guard for a later `lock`
    pub fn unlock(&mut self) -> SyncResult<()> {
        if !self.owns {
            return Err(SyncError::NotPermitted);
        }
        self.owns = false;
        self.mutex.raw_unlock()
    }

    /// Re-acquire the mutex after `unlock`
    pub fn lock(&mut self) -> SyncResult<()> {
        if self.owns {
            return Err(SyncError::Os {
                op: "pthread_mutex_lock",
                code: libc::EDEADLK,
            });
        }
        self.mutex.raw_lock()?;
        self.owns = true;
        Ok(())
    }
}

// SAFETY: `owns` is only true while this thread holds the pinned native mutex
unsafe impl<T: ?Sized> NativeLock for UniqueLock<'_, T> {
    #[inline]
    fn owns_lock(&self) -> bool {
        self.owns && self.mutex.is_locked_by_current_thread()
    }

    #[inline]
    fn native_mutex(&self) -> *mut libc::pthread_mutex_t {
        self.mutex.raw()
    }

    #[inline]
    fn before_wait(&mut self) {
        self.mutex.mark_released();
    }

    #[inline]
    fn after_wait(&mut self) {
        self.mutex.mark_owned();
    }
}

impl<T: ?Sized> Deref for UniqueLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(self.owns, "UniqueLock dereferenced while unlocked");
        // SAFETY: the mutex is held for as long as `owns` is true
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for UniqueLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        assert!(self.owns, "UniqueLock dereferenced while unlocked");
        // SAFETY: the mutex is held for as long as `owns` is true
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for UniqueLock<'_, T> {
    fn drop(&mut self) {
        if self.owns {
            if let Err(e) = self.mutex.raw_unlock() {
                warn!(error = %e, "failed to release mutex on guard drop");
            }
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for UniqueLock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("UniqueLock");
        if self.owns {
            s.field("data", &&**self);
        }
        s.field("owns", &self.owns).finish()
    }
}
