//! Structured error types for stallwatch
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Only caller bugs are errors here. Missing data (empty stacks, absent CPU
//! time, an empty sequence) is an expected input and produces empty results.

use stallwatch_common::{ThreadId, Timestamp};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticsError {
    #[error("Dump {index} captured at {current} precedes the previous dump at {previous}")]
    UnsortedDumps { index: usize, previous: Timestamp, current: Timestamp },

    #[error("Thread {thread} ({name}) reports {observations} simultaneous blocking lock observations")]
    AmbiguousWait { thread: ThreadId, name: String, observations: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("CPU epsilon must be a finite, non-negative number of seconds (got {0})")]
    InvalidCpuEpsilon(f64),

    #[error("top_threads must be at least 1")]
    ZeroTopThreads,

    #[error("Ignored thread names must not be empty strings")]
    EmptyIgnoredName,
}
