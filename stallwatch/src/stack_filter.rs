//! Stack noise collapsing.
//!
//! Reduces a full stack trace to an application-focused, bounded view. Each
//! frame is one of:
//!
//! - **Important** - I/O, network, database, threading primitives, process
//!   calls. Always kept.
//! - **Internal** - runtime and framework plumbing (`jdk.internal.*`,
//!   reflection, proxies, servlet container internals). Consecutive runs
//!   collapse into one [`FilteredFrame::Collapsed`] marker.
//! - **Application** - everything else. Always kept.
//!
//! ```text
//! com.example.Handler.handle              → Frame
//! jdk.internal.reflect.Method.invoke      ┐
//! java.lang.reflect.Method.invoke         ├ Collapsed(3)
//! org.apache.catalina.Valve.invoke        ┘
//! com.example.Server.serve                → Frame
//! ```
//!
//! Kept frames count against the budget. Once it is spent, the rest of the
//! stack becomes a single [`FilteredFrame::More`] marker. Every view accounts
//! for every input frame exactly once (see [`accounted_frames`]).

use serde::Serialize;
use stallwatch_common::StackFrame;

// ============================================================================
// Static Pattern Tables
// ============================================================================

/// A match over a frame's `class.method` name.
#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// Name starts with the prefix
    Prefix(&'static str),
    /// Name starts with the prefix and the rest contains the needle
    PrefixThen(&'static str, &'static str),
    /// Name contains the needle anywhere
    Contains(&'static str),
}

impl Pattern {
    fn matches(self, name: &str) -> bool {
        match self {
            Pattern::Prefix(prefix) => name.starts_with(prefix),
            Pattern::PrefixThen(prefix, needle) => {
                name.strip_prefix(prefix).is_some_and(|rest| rest.contains(needle))
            }
            Pattern::Contains(needle) => name.contains(needle),
        }
    }
}

const INTERNAL_PATTERNS: &[Pattern] = &[
    // Runtime internals
    Pattern::Prefix("jdk.internal."),
    Pattern::Prefix("sun."),
    Pattern::Prefix("com.sun."),
    Pattern::Prefix("java.lang.invoke."),
    Pattern::Prefix("java.lang.reflect."),
    Pattern::Prefix("java.lang.Thread.run"),
    Pattern::PrefixThen("kotlin.", "internal"),
    // Framework internals
    Pattern::PrefixThen("org.springframework.", ".support."),
    Pattern::PrefixThen("org.springframework.", ".internal."),
    Pattern::Prefix("org.apache.catalina."),
    Pattern::Prefix("org.apache.coyote."),
    Pattern::Prefix("org.apache.tomcat."),
    Pattern::Prefix("io.netty.util.internal."),
    Pattern::PrefixThen("io.netty.channel.", ".AbstractChannel"),
    // Generated code
    Pattern::Contains("$$Lambda"),
    Pattern::Contains("$Proxy"),
    Pattern::Contains("CGLIB"),
    Pattern::Contains("ByteBuddy"),
];

/// Checked before [`INTERNAL_PATTERNS`]; a match here is never collapsed.
const IMPORTANT_PATTERNS: &[Pattern] = &[
    // I/O
    Pattern::PrefixThen("java.io.", "InputStream.read"),
    Pattern::PrefixThen("java.io.", "OutputStream.write"),
    Pattern::PrefixThen("java.nio.", ".read"),
    Pattern::PrefixThen("java.nio.", ".write"),
    // Network
    Pattern::Prefix("java.net."),
    Pattern::PrefixThen("sun.nio.ch.", "Selector"),
    Pattern::PrefixThen("sun.nio.ch.", "Socket"),
    Pattern::Prefix("io.netty.channel.nio."),
    // Threading
    Pattern::PrefixThen("java.util.concurrent.", "Executor"),
    Pattern::Prefix("java.util.concurrent.locks."),
    // Database
    Pattern::Prefix("java.sql."),
    Pattern::Prefix("javax.sql."),
    // Web
    Pattern::Prefix("javax.servlet."),
    Pattern::Prefix("org.springframework.web."),
    // Processes
    Pattern::Prefix("java.lang.Process"),
];

// ============================================================================
// Frame Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Important,
    Internal,
    Application,
}

impl FrameKind {
    /// Whether the frame survives collapsing.
    #[must_use]
    pub fn is_kept(self) -> bool {
        !matches!(self, FrameKind::Internal)
    }
}

#[must_use]
pub fn frame_kind(frame: &StackFrame) -> FrameKind {
    let name = frame.qualified_name();
    if IMPORTANT_PATTERNS.iter().any(|p| p.matches(&name)) {
        FrameKind::Important
    } else if INTERNAL_PATTERNS.iter().any(|p| p.matches(&name)) {
        FrameKind::Internal
    } else {
        FrameKind::Application
    }
}

// ============================================================================
// Filtered Views
// ============================================================================

/// One entry of a filtered stack view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilteredFrame<'a> {
    /// A frame shown as-is
    Frame(&'a StackFrame),
    /// This many consecutive internal frames were omitted
    Collapsed(usize),
    /// The budget ran out; this many remaining frames were omitted
    More(usize),
}

impl FilteredFrame<'_> {
    /// Number of input frames this entry stands for.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        match self {
            FilteredFrame::Frame(_) => 1,
            FilteredFrame::Collapsed(n) | FilteredFrame::More(n) => *n,
        }
    }
}

/// Total input frames covered by a view. Always equals the input length.
#[must_use]
pub fn accounted_frames(view: &[FilteredFrame<'_>]) -> usize {
    view.iter().map(FilteredFrame::frame_count).sum()
}

fn effective_budget(budget: usize) -> usize {
    if budget == 0 {
        usize::MAX
    } else {
        budget
    }
}

/// Collapse internal frames and keep at most `budget` frames (0 = unlimited).
#[must_use]
pub fn collapse(frames: &[StackFrame], budget: usize) -> Vec<FilteredFrame<'_>> {
    let budget = effective_budget(budget);
    let mut view = Vec::new();
    let mut kept = 0usize;
    let mut pending_internal = 0usize;

    for (index, frame) in frames.iter().enumerate() {
        if !frame_kind(frame).is_kept() {
            pending_internal += 1;
            continue;
        }

        if pending_internal > 0 {
            view.push(FilteredFrame::Collapsed(pending_internal));
            pending_internal = 0;
        }

        if kept >= budget {
            view.push(FilteredFrame::More(frames.len() - index));
            return view;
        }

        view.push(FilteredFrame::Frame(frame));
        kept += 1;
    }

    if pending_internal > 0 {
        view.push(FilteredFrame::Collapsed(pending_internal));
    }
    view
}

/// Keep the first `budget` frames (0 = unlimited) and summarize the rest.
#[must_use]
pub fn truncate(frames: &[StackFrame], budget: usize) -> Vec<FilteredFrame<'_>> {
    let budget = effective_budget(budget);
    let mut view: Vec<_> = frames.iter().take(budget).map(FilteredFrame::Frame).collect();
    if frames.len() > budget {
        view.push(FilteredFrame::More(frames.len() - budget));
    }
    view
}

/// The stack view used for reporting: [`collapse`] when the intelligent
/// filter is on, [`truncate`] otherwise.
#[must_use]
pub fn view(frames: &[StackFrame], intelligent: bool, budget: usize) -> Vec<FilteredFrame<'_>> {
    if intelligent {
        collapse(frames, budget)
    } else {
        truncate(frames, budget)
    }
}
