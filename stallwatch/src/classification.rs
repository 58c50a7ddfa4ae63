//! Activity classification for thread stacks.
//!
//! This module maps a thread's innermost frames plus its run state to one
//! symbolic [`Category`] describing what the thread is doing: reading a
//! socket, waiting on a lock, talking to a database, burning CPU, and so on.
//!
//! # Classification Strategy
//!
//! Frames are scanned innermost first, up to [`CLASSIFICATION_DEPTH`]. For each
//! frame the rule table is tried in priority order and the first matching rule
//! wins. A match at a shallower frame therefore always beats a more specific
//! match deeper in the stack; rule priority only breaks ties within one frame.
//!
//! ```text
//! frame 0  jdk.internal.misc.Unsafe.park          → LOCK_WAIT   ← returned
//! frame 1  java.util.concurrent.locks.LockSupport.park
//! ...
//! frame 8  sun.nio.fs.AbstractWatchService.take   → NETWORK     (never reached)
//! ```
//!
//! When nothing matches inside the window the run state decides:
//! `RUNNABLE` → [`Category::Computation`], anything else → [`Category::Unknown`].
//! An empty stack is always [`Category::Unknown`].

use crate::analysis::distribution::{distribution, Share};
use serde::Serialize;
use stallwatch_common::{StackFrame, ThreadSnapshot, ThreadState};
use std::fmt;

/// Number of innermost frames examined. Not configurable.
pub const CLASSIFICATION_DEPTH: usize = 5;

// ============================================================================
// Categories
// ============================================================================

/// What a thread's stack says it is doing.
///
/// Declaration order is rule priority, and also the `Ord` used to break
/// count ties in distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    ExternalProcess,
    Database,
    Awt,
    Timer,
    VirtualThread,
    ForkJoin,
    NetworkRead,
    NetworkWrite,
    Network,
    IoRead,
    IoWrite,
    Io,
    LockWait,
    Sleep,
    Park,
    Native,
    /// Fallback: nothing matched and the thread is `RUNNABLE`
    Computation,
    /// Fallback: nothing matched (or no stack) and the thread is not running
    Unknown,
}

impl Category {
    /// Human-readable label, e.g. "Network Read".
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Category::ExternalProcess => "External Process",
            Category::Database => "Database",
            Category::Awt => "AWT",
            Category::Timer => "Timer",
            Category::VirtualThread => "Virtual Thread",
            Category::ForkJoin => "Fork/Join",
            Category::NetworkRead => "Network Read",
            Category::NetworkWrite => "Network Write",
            Category::Network => "Network",
            Category::IoRead => "I/O Read",
            Category::IoWrite => "I/O Write",
            Category::Io => "I/O",
            Category::LockWait => "Lock Wait",
            Category::Sleep => "Sleep",
            Category::Park => "Park",
            Category::Native => "Native",
            Category::Computation => "Computation",
            Category::Unknown => "Unknown",
        }
    }

    /// Coarse bucket for summary reporting.
    #[must_use]
    pub fn group(self) -> CategoryGroup {
        match self {
            Category::NetworkRead | Category::NetworkWrite | Category::Network => {
                CategoryGroup::Networking
            }
            Category::IoRead | Category::IoWrite | Category::Io | Category::Database => {
                CategoryGroup::Io
            }
            Category::LockWait | Category::Sleep | Category::Park => CategoryGroup::Locking,
            Category::Awt
            | Category::Timer
            | Category::VirtualThread
            | Category::ForkJoin
            | Category::ExternalProcess => CategoryGroup::JavaRuntime,
            Category::Native => CategoryGroup::Native,
            Category::Computation => CategoryGroup::Computation,
            Category::Unknown => CategoryGroup::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Coarse grouping of [`Category`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryGroup {
    Networking,
    Io,
    Locking,
    JavaRuntime,
    Native,
    Computation,
    Unknown,
}

impl CategoryGroup {
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            CategoryGroup::Networking => "Networking",
            CategoryGroup::Io => "I/O",
            CategoryGroup::Locking => "Locking",
            CategoryGroup::JavaRuntime => "Java Runtime",
            CategoryGroup::Native => "Native",
            CategoryGroup::Computation => "Computation",
            CategoryGroup::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CategoryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Frame Predicates
// ============================================================================

fn class_is(frame: &StackFrame, name: &str) -> bool {
    frame.class_name == name
}

fn class_starts(frame: &StackFrame, prefix: &str) -> bool {
    frame.class_name.starts_with(prefix)
}

fn class_has(frame: &StackFrame, needle: &str) -> bool {
    frame.class_name.contains(needle)
}

fn method_is(frame: &StackFrame, name: &str) -> bool {
    frame.method_name == name
}

fn method_starts(frame: &StackFrame, prefix: &str) -> bool {
    frame.method_name.starts_with(prefix)
}

fn method_has(frame: &StackFrame, needle: &str) -> bool {
    frame.method_name.contains(needle)
}

fn method_has_any(frame: &StackFrame, needles: &[&str]) -> bool {
    needles.iter().any(|needle| method_has(frame, needle))
}

// ============================================================================
// Rules
// ============================================================================

type Rule = fn(&StackFrame) -> bool;

/// Priority-ordered rule table. The first rule accepting a frame wins.
const RULES: &[(Category, Rule)] = &[
    (Category::ExternalProcess, is_external_process),
    (Category::Database, is_database),
    (Category::Awt, is_awt),
    (Category::Timer, is_timer),
    (Category::VirtualThread, is_virtual_thread),
    (Category::ForkJoin, is_fork_join),
    (Category::NetworkRead, is_network_read),
    (Category::NetworkWrite, is_network_write),
    (Category::Network, is_network),
    (Category::IoRead, is_io_read),
    (Category::IoWrite, is_io_write),
    (Category::Io, is_io),
    (Category::LockWait, is_lock_wait),
    (Category::Sleep, is_sleep),
    (Category::Park, is_park),
    (Category::Native, is_native),
];

fn is_external_process(f: &StackFrame) -> bool {
    class_is(f, "java.lang.ProcessHandleImpl")
        || class_is(f, "java.lang.ProcessImpl")
        || class_starts(f, "java.lang.Process")
        || (class_has(f, "Process") && method_has_any(f, &["wait", "reaper"]))
}

fn is_database(f: &StackFrame) -> bool {
    class_starts(f, "java.sql.")
        || class_starts(f, "javax.sql.")
        || class_has(f, "jdbc")
        || class_has(f, "JDBC")
        || class_has(f, ".sql.")
        || (class_has(f, "ResultSet") && !class_has(f, "nio"))
}

fn is_awt(f: &StackFrame) -> bool {
    ["java.awt.", "sun.awt.", "sun.lwawt.", "javax.swing."]
        .iter()
        .any(|prefix| class_starts(f, prefix))
}

fn is_timer(f: &StackFrame) -> bool {
    class_is(f, "java.util.TimerThread")
        || class_is(f, "java.util.concurrent.ScheduledThreadPoolExecutor$DelayedWorkQueue")
}

fn is_virtual_thread(f: &StackFrame) -> bool {
    class_is(f, "java.lang.VirtualThread") || class_starts(f, "jdk.internal.vm.Continuation")
}

fn is_fork_join(f: &StackFrame) -> bool {
    class_starts(f, "java.util.concurrent.ForkJoin")
}

fn is_network_read(f: &StackFrame) -> bool {
    (class_has(f, "Socket") && (method_has_any(f, &["read", "Read"]) || method_is(f, "accept")))
        || (class_is(f, "sun.nio.ch.SocketChannelImpl")
            && (method_is(f, "read") || method_has(f, "Read")))
        || (class_is(f, "java.net.SocketInputStream") && method_has(f, "read"))
        || (class_has(f, "ServerSocket") && method_is(f, "accept"))
        || (class_is(f, "sun.nio.ch.UnixDomainSockets") && method_has_any(f, &["accept", "read"]))
        || (class_starts(f, "io.netty.channel") && method_has(f, "read"))
}

fn is_network_write(f: &StackFrame) -> bool {
    (class_has(f, "Socket") && method_has_any(f, &["write", "Write"]))
        || (class_is(f, "sun.nio.ch.SocketChannelImpl")
            && (method_is(f, "write") || method_has(f, "Write")))
        || (class_is(f, "java.net.SocketOutputStream") && method_has(f, "write"))
        || (class_starts(f, "io.netty.channel") && method_has(f, "write"))
}

fn is_network(f: &StackFrame) -> bool {
    (class_has(f, "Selector") && method_has_any(f, &["select", "poll"]))
        || (class_is(f, "sun.nio.ch.KQueue") && method_is(f, "poll"))
        || (class_is(f, "sun.nio.ch.EPoll") && method_has(f, "wait"))
        || (class_is(f, "sun.nio.ch.WindowsSelectorImpl") && method_has(f, "doSelect"))
        || (class_has(f, "KQueueSelectorImpl") && method_has(f, "doSelect"))
        || (class_has(f, "EPollSelectorImpl") && method_has(f, "doSelect"))
        || (class_starts(f, "io.netty.channel.nio") && !method_has_any(f, &["read", "write"]))
        || class_starts(f, "io.netty.channel.epoll")
        || class_starts(f, "io.netty.channel.kqueue")
        || (class_has(f, "WatchService") && (method_is(f, "take") || method_is(f, "poll")))
}

fn is_io_read(f: &StackFrame) -> bool {
    (class_starts(f, "java.io") && method_has_any(f, &["read", "Read"]))
        || (class_has(f, "InputStream") && !class_has(f, "Socket") && method_has(f, "read"))
        || (class_has(f, "Reader") && method_has(f, "read"))
        || (class_is(f, "sun.nio.ch.FileChannelImpl") && method_is(f, "read"))
        || (class_is(f, "java.nio.channels.FileChannel") && method_has(f, "read"))
}

fn is_io_write(f: &StackFrame) -> bool {
    (class_starts(f, "java.io") && method_has_any(f, &["write", "Write", "flush", "Flush"]))
        || (class_has(f, "OutputStream")
            && !class_has(f, "Socket")
            && method_has_any(f, &["write", "flush"]))
        || (class_has(f, "Writer") && method_has_any(f, &["write", "flush"]))
        || (class_is(f, "sun.nio.ch.FileChannelImpl") && method_is(f, "write"))
        || (class_is(f, "java.nio.channels.FileChannel") && method_has(f, "write"))
}

fn is_io(f: &StackFrame) -> bool {
    class_starts(f, "java.io")
        || class_starts(f, "java.nio.file")
        || (class_has(f, "Channel") && !class_has(f, "Socket") && !class_has(f, "netty"))
}

fn is_lock_wait(f: &StackFrame) -> bool {
    ((class_is(f, "jdk.internal.misc.Unsafe") || class_is(f, "sun.misc.Unsafe"))
        && (method_is(f, "park") || method_has(f, "wait")))
        || (class_is(f, "java.util.concurrent.locks.LockSupport") && method_is(f, "park"))
        // Newer runtimes report `wait0` as the innermost frame
        || (class_is(f, "java.lang.Object") && method_starts(f, "wait"))
}

fn is_sleep(f: &StackFrame) -> bool {
    class_is(f, "java.lang.Thread") && (method_starts(f, "sleep") || method_starts(f, "yield"))
}

/// `parkNanos`/`parkUntil`; plain `park` is already taken by lock-wait.
fn is_park(f: &StackFrame) -> bool {
    class_is(f, "java.util.concurrent.locks.LockSupport") && method_starts(f, "park")
}

fn is_native(f: &StackFrame) -> bool {
    f.native
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a single frame against the rule table, without any fallback.
#[must_use]
pub fn classify_frame(frame: &StackFrame) -> Option<Category> {
    RULES
        .iter()
        .find(|(_, matches)| matches(frame))
        .map(|(category, _)| *category)
}

/// Classify a stack (innermost frame first) together with its run state.
///
/// Always returns a category:
///
/// ```ignore
/// classify(&[], ThreadState::Runnable);                       // → Unknown
/// classify(&[app_frame], ThreadState::Runnable);              // → Computation
/// classify(&[app_frame], ThreadState::Waiting);               // → Unknown
/// classify(&[socket_read, lock_wait], ThreadState::Runnable); // → NetworkRead
/// ```
#[must_use]
pub fn classify(stack: &[StackFrame], state: ThreadState) -> Category {
    if stack.is_empty() {
        return Category::Unknown;
    }

    if let Some(category) = stack.iter().take(CLASSIFICATION_DEPTH).find_map(classify_frame) {
        return category;
    }

    if state == ThreadState::Runnable {
        Category::Computation
    } else {
        Category::Unknown
    }
}

/// Classify one captured thread.
#[must_use]
pub fn classify_thread(thread: &ThreadSnapshot) -> Category {
    classify(&thread.stack, thread.state)
}

/// Category counts across several occurrences of (typically) one thread.
pub fn category_distribution<'a>(
    threads: impl IntoIterator<Item = &'a ThreadSnapshot>,
) -> Vec<Share<Category>> {
    distribution(threads.into_iter().map(classify_thread))
}

/// Reduce categories to their groups and count them.
pub fn group_distribution(
    categories: impl IntoIterator<Item = Category>,
) -> Vec<Share<CategoryGroup>> {
    distribution(categories.into_iter().map(Category::group))
}
