//! Typed, validated configuration for a [`crate::WriteBehind`] instance.
//!
//! The original translator keeps options in a dynamic `dict_t` bag parsed at
//! `init()`/`reconfigure()` time. §9's design note asks for a strongly typed
//! record validated up front instead; this module is that record plus the
//! builder that validates it.

use crate::error::ConfigError;

/// Lower bound for `cache-size`/`window-size`, per the option table.
pub const MIN_WINDOW_SIZE: u64 = 512 * 1024;
/// Upper bound for `cache-size`/`window-size`, per the option table.
pub const MAX_WINDOW_SIZE: u64 = 1024 * 1024 * 1024;
/// Default per-inode window, matching `WB_WINDOW_SIZE` in the original.
pub const DEFAULT_WINDOW_SIZE: u64 = 1024 * 1024;
/// Default batched-writev payload cap, matching `WB_AGGREGATE_SIZE`.
pub const DEFAULT_AGGREGATE_SIZE: u64 = 128 * 1024;
/// Hard cap on the number of iovecs concatenated into one downward writev.
pub const MAX_VECTOR_COUNT: usize = 8;

/// Validated, immutable configuration for the engine.
///
/// Built through [`WriteBehindConfig::builder`]; there is no way to
/// construct one that violates `aggregate_size <= window_size` or the
/// window bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBehindConfig {
    window_size: u64,
    aggregate_size: u64,
    flush_behind: bool,
    trickling_writes: bool,
    strict_o_direct: bool,
    strict_write_ordering: bool,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        WriteBehindConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            aggregate_size: DEFAULT_AGGREGATE_SIZE,
            flush_behind: true,
            trickling_writes: true,
            strict_o_direct: false,
            strict_write_ordering: false,
        }
    }
}

impl WriteBehindConfig {
    /// Start building a configuration from the documented defaults.
    pub fn builder() -> WriteBehindConfigBuilder {
        WriteBehindConfigBuilder {
            window_size: None,
            aggregate_size: None,
            flush_behind: true,
            trickling_writes: true,
            strict_o_direct: false,
            strict_write_ordering: false,
        }
    }

    /// Per-inode window bound (`cache-size` / `window-size`), in bytes.
    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Maximum batched writev payload (`aggregate-size`), in bytes.
    pub fn aggregate_size(&self) -> u64 {
        self.aggregate_size
    }

    /// Whether flush is early-acked while the real flush forwards in the background.
    pub fn flush_behind(&self) -> bool {
        self.flush_behind
    }

    /// Whether a lone unsealed holder is dispatched when nothing is in transit.
    pub fn trickling_writes(&self) -> bool {
        self.trickling_writes
    }

    /// Whether write-behind is disabled for fds opened with `O_DIRECT`.
    pub fn strict_o_direct(&self) -> bool {
        self.strict_o_direct
    }

    /// Whether any two generations are forced to conflict regardless of overlap.
    pub fn strict_write_ordering(&self) -> bool {
        self.strict_write_ordering
    }
}

/// Builder for [`WriteBehindConfig`], validated on [`build`](Self::build).
#[derive(Debug, Clone, Copy)]
pub struct WriteBehindConfigBuilder {
    window_size: Option<u64>,
    aggregate_size: Option<u64>,
    flush_behind: bool,
    trickling_writes: bool,
    strict_o_direct: bool,
    strict_write_ordering: bool,
}

impl WriteBehindConfigBuilder {
    /// Set `cache-size` / `window-size`. Leave unset to take the default, or
    /// to be raised to `aggregate_size` if that was set larger.
    pub fn window_size(mut self, bytes: u64) -> Self {
        self.window_size = Some(bytes);
        self
    }

    /// Set `aggregate-size`.
    pub fn aggregate_size(mut self, bytes: u64) -> Self {
        self.aggregate_size = Some(bytes);
        self
    }

    /// Set `flush-behind`.
    pub fn flush_behind(mut self, enabled: bool) -> Self {
        self.flush_behind = enabled;
        self
    }

    /// Set `trickling-writes`.
    pub fn trickling_writes(mut self, enabled: bool) -> Self {
        self.trickling_writes = enabled;
        self
    }

    /// Set `strict-O_DIRECT`.
    pub fn strict_o_direct(mut self, enabled: bool) -> Self {
        self.strict_o_direct = enabled;
        self
    }

    /// Set `strict-write-ordering`.
    pub fn strict_write_ordering(mut self, enabled: bool) -> Self {
        self.strict_write_ordering = enabled;
        self
    }

    /// Validate and produce a [`WriteBehindConfig`].
    ///
    /// Mirrors `init()`: if `window-size` was left unset and `aggregate-size`
    /// was set larger than the default window, the window is raised to match
    /// rather than rejected.
    pub fn build(self) -> Result<WriteBehindConfig, ConfigError> {
        let aggregate_size = self.aggregate_size.unwrap_or(DEFAULT_AGGREGATE_SIZE);

        let window_size = match self.window_size {
            Some(w) => w,
            None if aggregate_size > DEFAULT_WINDOW_SIZE => {
                log::warn!(
                    "raising window-size to aggregate-size({aggregate_size}) since neither cache-size nor window-size was set"
                );
                aggregate_size
            }
            None => DEFAULT_WINDOW_SIZE,
        };

        if window_size < MIN_WINDOW_SIZE {
            return Err(ConfigError::WindowTooSmall {
                min: MIN_WINDOW_SIZE,
                got: window_size,
            });
        }
        if window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowTooLarge {
                max: MAX_WINDOW_SIZE,
                got: window_size,
            });
        }
        if aggregate_size > window_size {
            return Err(ConfigError::AggregateExceedsWindow {
                aggregate: aggregate_size,
                window: window_size,
            });
        }

        Ok(WriteBehindConfig {
            window_size,
            aggregate_size,
            flush_behind: self.flush_behind,
            trickling_writes: self.trickling_writes,
            strict_o_direct: self.strict_o_direct,
            strict_write_ordering: self.strict_write_ordering,
        })
    }

    /// Build without enforcing `MIN_WINDOW_SIZE`/`MAX_WINDOW_SIZE`, so unit
    /// tests can use window sizes small enough to hit their limits in a
    /// handful of bytes. Still enforces `aggregate_size <= window_size`.
    #[cfg(test)]
    pub(crate) fn build_for_test(self) -> WriteBehindConfig {
        let aggregate_size = self.aggregate_size.unwrap_or(DEFAULT_AGGREGATE_SIZE);
        let window_size = self.window_size.unwrap_or(DEFAULT_WINDOW_SIZE);
        assert!(aggregate_size <= window_size, "aggregate_size must not exceed window_size");
        WriteBehindConfig {
            window_size,
            aggregate_size,
            flush_behind: self.flush_behind,
            trickling_writes: self.trickling_writes,
            strict_o_direct: self.strict_o_direct,
            strict_write_ordering: self.strict_write_ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let conf = WriteBehindConfig::builder().build().unwrap();
        assert_eq!(conf.window_size(), DEFAULT_WINDOW_SIZE);
        assert_eq!(conf.aggregate_size(), DEFAULT_AGGREGATE_SIZE);
        assert!(conf.flush_behind());
        assert!(conf.trickling_writes());
        assert!(!conf.strict_o_direct());
        assert!(!conf.strict_write_ordering());
    }

    #[test]
    fn aggregate_raises_default_window() {
        let conf = WriteBehindConfig::builder()
            .aggregate_size(2 * 1024 * 1024)
            .build()
            .unwrap();
        assert_eq!(conf.window_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn aggregate_exceeding_explicit_window_is_rejected() {
        let err = WriteBehindConfig::builder()
            .window_size(MIN_WINDOW_SIZE)
            .aggregate_size(MIN_WINDOW_SIZE + 1)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::AggregateExceedsWindow {
                aggregate: MIN_WINDOW_SIZE + 1,
                window: MIN_WINDOW_SIZE,
            }
        );
    }

    #[test]
    fn window_below_minimum_is_rejected() {
        let err = WriteBehindConfig::builder()
            .window_size(1024)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::WindowTooSmall {
                min: MIN_WINDOW_SIZE,
                got: 1024,
            }
        );
    }

    #[test]
    fn window_above_maximum_is_rejected() {
        let err = WriteBehindConfig::builder()
            .window_size(MAX_WINDOW_SIZE + 1)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::WindowTooLarge {
                max: MAX_WINDOW_SIZE,
                got: MAX_WINDOW_SIZE + 1,
            }
        );
    }
}
