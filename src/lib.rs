/*!
 * Monotonic Condition Variable
 *
 * Condition variable whose timed waits are measured against
 * `CLOCK_MONOTONIC`, so fixed-duration waits survive wall-clock
 * adjustments.
 */

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
compile_error!("monotonic-condvar requires pthread_condattr_setclock (Linux, Android or FreeBSD)");

pub mod sync;

// Re-exports
pub use sync::{
    Deadline, IntoTimeout, MonotonicCondvar, Mutex, NativeLock, SyncError, SyncResult, Timepoint,
    UniqueLock, WaitStatus,
};
