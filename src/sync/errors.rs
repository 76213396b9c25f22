/*!
 * Synchronization Errors
 *
 * Error taxonomy shared by the condition variable and its paired mutex.
 * Timeouts are not errors: timed waits report them through `WaitStatus`
 * or a `false` predicate result.
 */

use miette::Diagnostic;
use std::io;
use thiserror::Error;

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronization errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum SyncError {
    /// Native resource setup failed during construction
    #[error("{op} failed during initialization: {}", describe(.code))]
    #[diagnostic(
        code(sync::init_failed),
        help("The native primitive could not be created. Check system resources.")
    )]
    Init { op: &'static str, code: i32 },

    /// A wait was attempted without holding the associated lock
    #[error("condition variable: mutex not locked by the calling thread")]
    #[diagnostic(
        code(sync::not_permitted),
        help("Acquire the lock and keep the guard locked across every wait call.")
    )]
    NotPermitted,

    /// Unexpected failure of an operation on a live native resource
    #[error("{op} failed: {}", describe(.code))]
    #[diagnostic(code(sync::os_error))]
    Os { op: &'static str, code: i32 },
}

impl SyncError {
    /// Underlying errno value
    pub fn code(&self) -> i32 {
        match self {
            Self::Init { code, .. } | Self::Os { code, .. } => *code,
            Self::NotPermitted => libc::EPERM,
        }
    }

    /// Check whether this error reports a misuse rather than an OS failure
    #[inline]
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Self::NotPermitted)
    }
}

impl From<SyncError> for io::Error {
    fn from(err: SyncError) -> Self {
        let kind = io::Error::from_raw_os_error(err.code()).kind();
        io::Error::new(kind, err)
    }
}

fn describe(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

/// Map a pthread-style return code (0 or errno) to a result
#[inline]
pub(crate) fn check(op: &'static str, code: i32) -> SyncResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(SyncError::Os { op, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_permitted_maps_to_eperm() {
        let err = SyncError::NotPermitted;
        assert_eq!(err.code(), libc::EPERM);
        assert!(err.is_precondition_violation());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_os_error_carries_code() {
        let err = SyncError::Os {
            op: "pthread_cond_signal",
            code: libc::EINVAL,
        };
        assert_eq!(err.code(), libc::EINVAL);
        assert!(!err.is_precondition_violation());
        assert!(err.to_string().starts_with("pthread_cond_signal failed"));
    }

    #[test]
    fn test_check_passes_zero() {
        assert_eq!(check("op", 0), Ok(()));
        assert_eq!(
            check("op", libc::EAGAIN),
            Err(SyncError::Os {
                op: "op",
                code: libc::EAGAIN
            })
        );
    }

    #[test]
    fn test_init_error_display() {
        let err = SyncError::Init {
            op: "pthread_condattr_setclock",
            code: libc::EINVAL,
        };
        assert!(err.to_string().contains("pthread_condattr_setclock"));
        assert_eq!(err.code(), libc::EINVAL);
    }
}
