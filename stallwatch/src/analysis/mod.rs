//! Analysis over a dump sequence
//!
//! Pure functions and value types: nothing here keeps state between runs or
//! knows how the dumps were captured.

pub mod distribution;
pub mod locks;
pub mod starvation;
pub mod tracker;
pub mod wait_graph;

pub use distribution::{distribution, Share};
pub use locks::{resolve_stalled_lock, resolve_waited_lock, LockResolution};
pub use starvation::{LockStallGroup, StalledThreadRecord, StarvationDetector, StarvationReport};
pub use tracker::{track_with, ActivityRecord, ActivitySink, ThreadActivity};
pub use wait_graph::{Chain, ContentionGroup, DependencyEdge, WaitGraph};
