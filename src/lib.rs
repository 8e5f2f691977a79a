//! Per-inode write-behind caching engine for a clustered filesystem client.
//!
//! This crate implements the write-back state machine that sits between a
//! filesystem-facing API and a lower transport that performs remote reads
//! and writes: it acknowledges writes before they are durably transmitted,
//! coalesces small sequential writes into larger wire requests, and
//! preserves the causal ordering a POSIX application expects from its own
//! file descriptors. It does not implement the transport itself, option
//! parsing, memory accounting, or process lifecycle — those are the
//! surrounding translator's job; see [`LowerLayer`] for the only interface
//! this crate needs from it.
//!
//! The entry point is [`WriteBehind`], built from a [`WriteBehindConfig`]
//! and a [`LowerLayer`] implementation.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod config;
mod dump;
mod engine;
mod error;
mod fulfill;
mod inode;
mod lower;
mod manager;
mod oracle;
mod request;
mod stub;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use crate::config::{
    WriteBehindConfig, WriteBehindConfigBuilder, DEFAULT_AGGREGATE_SIZE, DEFAULT_WINDOW_SIZE, MAX_VECTOR_COUNT,
    MAX_WINDOW_SIZE, MIN_WINDOW_SIZE,
};
pub use crate::dump::{InodeDump, RequestDump};
pub use crate::error::{ConfigError, Errno};
pub use crate::lower::{Completion, LowerLayer, ReadvCall, WritevCall};
pub use crate::manager::WriteBehind;
pub use crate::request::{FdId, InodeId, Kind, LockOwner, OrderingKey};
pub use crate::stub::Attr;
