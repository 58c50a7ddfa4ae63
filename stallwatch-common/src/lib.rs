//! # Shared Snapshot Records (acquisition ↔ diagnostics)
//!
//! Defines the per-dump records handed from the snapshot-acquisition side
//! (attach, invoke the diagnostic command, parse the text) to the diagnostics
//! engine. Everything here is plain data: produced once per dump and never
//! mutated afterwards.
//!
//! ## Key Types
//!
//! - [`DumpSnapshot`] - Every thread's state at one capture instant
//! - [`ThreadSnapshot`] - One thread inside one dump
//! - [`StackFrame`] - One frame; index 0 is the innermost (currently executing) frame
//! - [`LockObservation`] - A lock line attached to a thread (held, or waited on)
//!
//! Enable the `serde` feature to derive `Serialize`/`Deserialize` on all records.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity and Time
// ============================================================================

/// Thread identity, stable across the dumps of one process.
///
/// This is the runtime's own thread id (the `#23` in a thread dump header),
/// not an OS thread id. All cross-dump bookkeeping is keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capture timestamp in nanoseconds.
///
/// Only differences between timestamps are meaningful to the engine, so the
/// epoch is whatever the acquisition side used (typically the Unix epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Build a timestamp from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    /// Build a timestamp from fractional seconds. Negative input clamps to zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs.max(0.0) * 1_000_000_000.0) as u64)
    }

    /// Convert to seconds (f64)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to milliseconds (f64)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_millis(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

// ============================================================================
// Thread State
// ============================================================================

/// Run state reported for a thread at capture time.
///
/// Declaration order is the `Ord` order, which keeps state histograms
/// iterating deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

impl ThreadState {
    /// True for `WAITING` and `TIMED_WAITING`.
    #[must_use]
    pub fn is_waiting(self) -> bool {
        matches!(self, ThreadState::Waiting | ThreadState::TimedWaiting)
    }

    /// The state as it appears in a thread dump.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stack Frames
// ============================================================================

/// One frame of a thread's stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StackFrame {
    /// Fully qualified class name, e.g. `java.net.SocketInputStream`
    pub class_name: String,

    /// Method name, e.g. `read`
    pub method_name: String,

    /// Source file name, if the runtime reported one
    pub file: Option<String>,

    /// Source line, if the runtime reported one
    pub line: Option<u32>,

    /// Whether the frame is a native method
    pub native: bool,
}

impl StackFrame {
    /// Create a frame with no source location.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file: None,
            line: None,
            native: false,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Mark the frame as a native method.
    #[must_use]
    pub fn native(mut self) -> Self {
        self.native = true;
        self
    }

    /// `class.method`, the form rule tables match against.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)?;
        match (&self.file, self.line) {
            _ if self.native => f.write_str("(Native Method)"),
            (Some(file), Some(line)) => write!(f, "({file}:{line})"),
            (Some(file), None) => write!(f, "({file})"),
            (None, _) => f.write_str("(Unknown Source)"),
        }
    }
}

// ============================================================================
// Locks
// ============================================================================

/// What a thread is doing with a lock, as reported under its stack frames.
///
/// ```text
/// - locked <0x000000076ab62208> (a java.lang.Object)          → Locked
/// - waiting to lock <0x000000076ab62208> (a java.lang.Object) → WaitingToLock
/// - parking to wait for <0x...> (a ...ReentrantLock$NonfairSync) → Parking
/// - waiting on <0x...> (a java.lang.Object)                    → WaitingOn
/// - eliminated <owner is scalar replaced> (a ...)              → Eliminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum LockOperation {
    Locked,
    WaitingToLock,
    Parking,
    WaitingOn,
    Eliminated,
    Unknown,
}

impl LockOperation {
    /// True for the three operations that mean "this thread cannot proceed".
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            LockOperation::WaitingToLock | LockOperation::Parking | LockOperation::WaitingOn
        )
    }
}

/// A single lock line attached to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LockObservation {
    /// Lock identity, typically the object address (`0x000000076ab62208`)
    pub lock_id: String,

    /// Class of the lock object, if reported
    pub class_name: Option<String>,

    pub operation: LockOperation,
}

impl LockObservation {
    pub fn new(
        lock_id: impl Into<String>,
        class_name: Option<String>,
        operation: LockOperation,
    ) -> Self {
        Self { lock_id: lock_id.into(), class_name, operation }
    }

    /// `- locked <id> (a class)`
    pub fn locked(lock_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(lock_id, Some(class_name.into()), LockOperation::Locked)
    }

    /// `- waiting to lock <id> (a class)`
    pub fn waiting_to_lock(lock_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(lock_id, Some(class_name.into()), LockOperation::WaitingToLock)
    }

    /// `- parking to wait for <id> (a class)`
    pub fn parking(lock_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(lock_id, Some(class_name.into()), LockOperation::Parking)
    }

    /// `- waiting on <id> (a class)`
    pub fn waiting_on(lock_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(lock_id, Some(class_name.into()), LockOperation::WaitingOn)
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.operation == LockOperation::Locked
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.operation.is_blocking()
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// One thread as captured in one dump.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadSnapshot {
    pub id: ThreadId,

    pub name: String,

    pub state: ThreadState,

    /// Cumulative CPU time in seconds (`cpu=12.34ms` in the dump header).
    ///
    /// `None` when the runtime could not measure it. Absent is NOT zero.
    pub cpu_time_secs: Option<f64>,

    /// Cumulative wall-clock lifetime in seconds (`elapsed=…s`), if reported
    pub elapsed_secs: Option<f64>,

    /// Frames, innermost first
    pub stack: Vec<StackFrame>,

    /// Lock lines, in dump order
    pub locks: Vec<LockObservation>,
}

impl ThreadSnapshot {
    pub fn new(id: ThreadId, name: impl Into<String>, state: ThreadState) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            cpu_time_secs: None,
            elapsed_secs: None,
            stack: Vec::new(),
            locks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cpu_time(mut self, secs: f64) -> Self {
        self.cpu_time_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, secs: f64) -> Self {
        self.elapsed_secs = Some(secs);
        self
    }

    /// Append a frame below the ones already present.
    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack.push(frame);
        self
    }

    #[must_use]
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockObservation) -> Self {
        self.locks.push(lock);
        self
    }

    /// The innermost frame, if the stack is non-empty.
    #[must_use]
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.stack.first()
    }

    /// Locks this thread currently owns.
    pub fn held_locks(&self) -> impl Iterator<Item = &LockObservation> {
        self.locks.iter().filter(|lock| lock.is_held())
    }

    /// Lock lines that block this thread.
    pub fn blocking_locks(&self) -> impl Iterator<Item = &LockObservation> {
        self.locks.iter().filter(|lock| lock.is_blocking())
    }
}

/// Every thread's state at one capture instant.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DumpSnapshot {
    pub timestamp: Timestamp,

    pub threads: Vec<ThreadSnapshot>,
}

impl DumpSnapshot {
    pub fn new(timestamp: Timestamp, threads: Vec<ThreadSnapshot>) -> Self {
        Self { timestamp, threads }
    }

    /// Look up a thread by identity.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|thread| thread.id == id)
    }
}
