//! Domain model for stallwatch
//!
//! This module contains the validated input type and the errors that provide:
//! - A capture-ordered [`DumpSequence`] checked once at the boundary
//! - Structured error handling for caller bugs
//!
//! The raw snapshot records live in `stallwatch-common` and are re-exported
//! here for convenience.

pub mod errors;
pub mod sequence;

pub use sequence::DumpSequence;
pub use stallwatch_common::{
    DumpSnapshot, LockObservation, LockOperation, StackFrame, ThreadId, ThreadSnapshot,
    ThreadState, Timestamp,
};

pub use errors::{ConfigError, DiagnosticsError};
