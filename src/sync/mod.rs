/*!
 * Synchronization Primitives
 *
 * A condition variable whose timed waits are anchored to the monotonic
 * clock, plus the native mutex it pairs with.
 *
 * # Architecture
 *
 * - `MonotonicCondvar`: `pthread_cond_t` created with `CLOCK_MONOTONIC`
 * - `Mutex` / `UniqueLock`: error-checking `pthread_mutex_t` with owner tracking
 * - `NativeLock`: what the condvar needs from a lock (ownership query + handle)
 * - `Timepoint`: deadlines on arbitrary clocks, converted once per wait
 *
 * # Use Cases
 *
 * - **Producer/consumer queues**: Block until an item arrives or a timeout hits
 * - **Rate limiters**: Sleep for a fixed interval immune to wall-clock steps
 * - **Worker pools**: Park idle workers until new work is published
 */

mod clock;
mod condvar;
mod errors;
mod mutex;
mod traits;

pub use clock::{deadline_after, monotonic_now, Deadline, IntoTimeout, NANOS_PER_SEC};
pub use condvar::{MonotonicCondvar, WaitStatus};
pub use errors::{SyncError, SyncResult};
pub use mutex::{Mutex, UniqueLock};
pub use traits::{NativeLock, Timepoint};
