/*!
 * Monotonic Deadlines
 *
 * Converts relative timeouts into absolute `CLOCK_MONOTONIC` timestamps,
 * the form `pthread_cond_timedwait` expects once the condvar's clock
 * attribute is set to the monotonic clock.
 *
 * # Conversion
 *
 * The clock is sampled once, then whole seconds and sub-second nanoseconds
 * are added separately and the nanosecond field is normalized back into
 * `[0, 1s)`. A timeout of zero (or a negative signed duration) never
 * samples the clock: it maps to `Deadline::EXPIRED`, which the kernel
 * treats as an immediate timeout.
 */

use super::errors::{SyncError, SyncResult};
use nix::time::{clock_gettime, ClockId};
use std::time::Duration;

/// Nanoseconds in one second
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Absolute point on the monotonic clock
///
/// Always normalized: `0 <= nanos < NANOS_PER_SEC`. Ordering follows
/// time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    secs: i64,
    nanos: i64,
}

impl Deadline {
    /// Epoch of the monotonic clock; always in the past for a running system
    pub const EXPIRED: Deadline = Deadline { secs: 0, nanos: 0 };

    /// Build a deadline from raw parts, normalizing the nanosecond field
    pub fn from_parts(secs: i64, nanos: i64) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_SEC);
        Self {
            secs: secs.saturating_add(carry),
            nanos: nanos.rem_euclid(NANOS_PER_SEC),
        }
    }

    /// Deadline `timeout` from now on the monotonic clock
    ///
    /// Zero timeouts return `EXPIRED` without a clock read.
    pub fn after(timeout: impl IntoTimeout) -> SyncResult<Self> {
        let timeout = timeout.into_timeout();
        if timeout.is_zero() {
            return Ok(Self::EXPIRED);
        }
        Ok(deadline_after(monotonic_now()?, timeout))
    }

    /// Whole seconds since the monotonic epoch
    #[inline]
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Sub-second nanoseconds
    #[inline]
    pub fn subsec_nanos(&self) -> i64 {
        self.nanos
    }

    /// Check whether the deadline has passed, sampling the clock
    pub fn has_expired(&self) -> SyncResult<bool> {
        Ok(*self <= monotonic_now()?)
    }

    /// Time left until the deadline, zero if already passed
    pub fn remaining(&self) -> SyncResult<Duration> {
        let now = monotonic_now()?;
        if *self <= now {
            return Ok(Duration::ZERO);
        }
        let mut secs = self.secs - now.secs;
        let mut nanos = self.nanos - now.nanos;
        if nanos < 0 {
            nanos += NANOS_PER_SEC;
            secs -= 1;
        }
        // Both fields are non-negative once normalized
        Ok(Duration::new(secs as u64, nanos as u32))
    }

    pub(crate) fn as_timespec(&self) -> libc::timespec {
        libc::timespec {
            tv_sec: libc::time_t::try_from(self.secs).unwrap_or(libc::time_t::MAX),
            tv_nsec: self.nanos as libc::c_long,
        }
    }
}

/// Sample the monotonic clock
pub fn monotonic_now() -> SyncResult<Deadline> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(|errno| SyncError::Os {
        op: "clock_gettime",
        code: errno as i32,
    })?;
    Ok(Deadline::from_parts(now.tv_sec() as i64, now.tv_nsec() as i64))
}

/// Add a relative timeout to a sampled `now`
///
/// Seconds and nanoseconds are added separately; the sum saturates
/// instead of wrapping for absurdly long timeouts.
pub fn deadline_after(now: Deadline, timeout: Duration) -> Deadline {
    if timeout.is_zero() {
        return Deadline::EXPIRED;
    }

    let add_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
    let mut secs = now.secs.saturating_add(add_secs);
    let mut nanos = now.nanos + i64::from(timeout.subsec_nanos());
    if nanos >= NANOS_PER_SEC {
        nanos -= NANOS_PER_SEC;
        secs = secs.saturating_add(1);
    }
    if secs == i64::MAX {
        nanos = NANOS_PER_SEC - 1;
    }

    Deadline { secs, nanos }
}

/// Relative timeouts accepted by the timed waits
///
/// Non-positive durations collapse to `Duration::ZERO`, which callers
/// treat as an immediate poll.
pub trait IntoTimeout {
    /// Non-negative timeout
    fn into_timeout(self) -> Duration;
}

impl IntoTimeout for Duration {
    #[inline]
    fn into_timeout(self) -> Duration {
        self
    }
}

impl IntoTimeout for time::Duration {
    #[inline]
    fn into_timeout(self) -> Duration {
        if self.is_positive() {
            self.unsigned_abs()
        } else {
            Duration::ZERO
        }
    }
}
