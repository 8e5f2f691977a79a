//! Error types used by the write-behind engine.
//!
//! The engine deliberately keeps runtime errors as a thin `errno` wrapper
//! rather than a rich enum: §7 of the design treats the error taxonomy as
//! documentation for operators, not as something callers pattern-match on.
//! Construction-time misconfiguration, in contrast, gets a real
//! `std::error::Error` type since it is meant to be handled in application
//! code before the engine ever runs.

use std::error::Error;
use std::fmt;

/// A POSIX errno value, as latched on an inode or returned by the lower layer.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// I/O error: used for transport failures and short writes alike.
    pub const EIO: Errno = Errno(libc::EIO);
    /// Out of space, the canonical example of a latched transport failure.
    pub const ENOSPC: Errno = Errno(libc::ENOSPC);
    /// Allocation failure during enqueue.
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    /// No inode state where one was required.
    pub const EINVAL: Errno = Errno(libc::EINVAL);

    /// Raw integer value, as it would be returned to a POSIX caller.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({})", self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

impl From<Errno> for i32 {
    fn from(e: Errno) -> i32 {
        e.0
    }
}

impl From<i32> for Errno {
    fn from(v: i32) -> Errno {
        Errno(v)
    }
}

impl Error for Errno {}

/// Failure validating a [`crate::config::WriteBehindConfig`] at construction time.
///
/// Mirrors the fail-fast checks `init()` performs on the dynamic option bag in
/// the original translator, just against a typed record instead.
#[derive(Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// `window-size` fell below the configured minimum.
    WindowTooSmall {
        /// Smallest permitted window, in bytes.
        min: u64,
        /// The value that was rejected.
        got: u64,
    },
    /// `window-size` exceeded the configured maximum.
    WindowTooLarge {
        /// Largest permitted window, in bytes.
        max: u64,
        /// The value that was rejected.
        got: u64,
    },
    /// `aggregate-size` cannot exceed `window-size`.
    AggregateExceedsWindow {
        /// The rejected `aggregate-size`.
        aggregate: u64,
        /// The `window-size` it was compared against.
        window: u64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::WindowTooSmall { min, got } => write!(
                f,
                "window-size({got}) cannot be less than the minimum({min})"
            ),
            ConfigError::WindowTooLarge { max, got } => write!(
                f,
                "window-size({got}) cannot be more than the maximum({max})"
            ),
            ConfigError::AggregateExceedsWindow { aggregate, window } => write!(
                f,
                "aggregate-size({aggregate}) cannot be more than window-size({window})"
            ),
        }
    }
}

impl Error for ConfigError {}
