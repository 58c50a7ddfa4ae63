//! Cross-dump starvation detection.
//!
//! A thread is **stalled** when, over the whole sequence, all of these hold:
//!
//! 1. it appears in every dump
//! 2. it is `WAITING` or `TIMED_WAITING` in every occurrence
//! 3. its CPU delta is at most the epsilon, or it has no CPU data at all
//! 4. every occurrence resolves to exactly one waited-on lock, and it is the
//!    same lock each time. An explicit `waiting on` line is preferred over
//!    other blocking lines when picking that lock.
//!
//! Missing lock data in any occurrence fails check 4. The lock check runs
//! last, so [`LockResolution::Strict`] only rejects threads that passed the
//! first three checks.

use super::locks::{resolve_stalled_lock, LockResolution};
use super::tracker::{ActivityRecord, ThreadActivity};
use crate::config::DiagnosticsConfig;
use crate::domain::DiagnosticsError;
use log::{debug, trace};
use serde::Serialize;
use stallwatch_common::{StackFrame, ThreadId};
use std::collections::{BTreeMap, BTreeSet};

/// A thread that waited on one lock for the whole sequence without progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalledThreadRecord<'a> {
    pub id: ThreadId,
    pub name: &'a str,
    /// 0 when the thread has no CPU data
    pub cpu_delta_secs: f64,
    pub has_cpu_data: bool,
    pub lock_id: &'a str,
    /// Stack of the first occurrence
    pub stack: &'a [StackFrame],
}

/// Stalled threads sharing one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStallGroup<'a> {
    pub lock_id: &'a str,
    /// In the same order as [`StarvationReport::stalled`]
    pub threads: Vec<ThreadId>,
}

impl LockStallGroup<'_> {
    /// Two or more stalled threads on the same lock.
    #[must_use]
    pub fn is_contended(&self) -> bool {
        self.threads.len() > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StarvationReport<'a> {
    /// Sorted by thread name, then id
    pub stalled: Vec<StalledThreadRecord<'a>>,

    /// Every lock with at least one stalled thread, largest group first
    /// (ties by lock id)
    pub by_lock: Vec<LockStallGroup<'a>>,
}

impl<'a> StarvationReport<'a> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stalled.is_empty()
    }

    /// Locks with two or more stalled threads.
    pub fn contention_groups(&self) -> impl Iterator<Item = &LockStallGroup<'a>> {
        self.by_lock.iter().filter(|group| group.is_contended())
    }

    #[must_use]
    pub fn stalled_thread(&self, id: ThreadId) -> Option<&StalledThreadRecord<'a>> {
        self.stalled.iter().find(|record| record.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct StarvationDetector {
    cpu_epsilon_secs: f64,
    ignored_thread_names: BTreeSet<String>,
    lock_resolution: LockResolution,
}

impl Default for StarvationDetector {
    fn default() -> Self {
        Self::from_config(&DiagnosticsConfig::default())
    }
}

impl StarvationDetector {
    pub fn new<I, S>(cpu_epsilon_secs: f64, ignored_thread_names: I, lock_resolution: LockResolution) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cpu_epsilon_secs,
            ignored_thread_names: ignored_thread_names.into_iter().map(Into::into).collect(),
            lock_resolution,
        }
    }

    #[must_use]
    pub fn from_config(config: &DiagnosticsConfig) -> Self {
        Self::new(
            config.cpu_epsilon_secs,
            config.ignored_thread_names.iter().cloned(),
            config.lock_resolution,
        )
    }

    /// Find every stalled thread in `activity`.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::AmbiguousWait`] under
    /// [`LockResolution::Strict`] when a candidate thread reports several
    /// blocking lock lines in one occurrence.
    pub fn detect<'a>(
        &self,
        activity: &ThreadActivity<'a>,
    ) -> Result<StarvationReport<'a>, DiagnosticsError> {
        let mut stalled = Vec::new();

        for record in activity.records() {
            if self.ignored_thread_names.contains(record.name()) {
                trace!("{} ({}) is on the ignore list", record.id(), record.name());
                continue;
            }
            if let Some(lock_id) = self.stalled_on(record, activity.dump_count())? {
                stalled.push(StalledThreadRecord {
                    id: record.id(),
                    name: record.name(),
                    cpu_delta_secs: record.cpu_delta_secs(),
                    has_cpu_data: record.has_cpu_data(),
                    lock_id,
                    stack: record.first_sample().map(|s| s.stack.as_slice()).unwrap_or_default(),
                });
            }
        }

        stalled.sort_by(|a, b| a.name.cmp(b.name).then_with(|| a.id.cmp(&b.id)));
        let by_lock = group_by_lock(&stalled);

        debug!(
            "Starvation: {} of {} threads stalled, {} contended locks",
            stalled.len(),
            activity.len(),
            by_lock.iter().filter(|g| g.is_contended()).count()
        );

        Ok(StarvationReport { stalled, by_lock })
    }

    /// The lock `record` is stalled on, or `None` if any check fails.
    fn stalled_on<'a>(
        &self,
        record: &ActivityRecord<'a>,
        dump_count: usize,
    ) -> Result<Option<&'a str>, DiagnosticsError> {
        if record.occurrences() != dump_count {
            trace!("{} seen in {}/{} dumps", record.id(), record.occurrences(), dump_count);
            return Ok(None);
        }

        if !record.is_always_waiting() {
            trace!("{} not waiting in every dump", record.id());
            return Ok(None);
        }

        if record.has_cpu_data() && record.cpu_delta_secs() > self.cpu_epsilon_secs {
            trace!("{} made CPU progress ({:.4}s)", record.id(), record.cpu_delta_secs());
            return Ok(None);
        }

        let mut common: Option<&'a str> = None;
        for sample in record.samples().iter().copied() {
            let lock_id = resolve_stalled_lock(sample, self.lock_resolution)?
                .map(|lock| lock.lock_id.as_str())
                .filter(|id| !id.is_empty());

            match (lock_id, common) {
                (None, _) => {
                    trace!("{} has an occurrence without lock data", record.id());
                    return Ok(None);
                }
                (Some(id), Some(previous)) if id != previous => {
                    trace!("{} moved from <{}> to <{}>", record.id(), previous, id);
                    return Ok(None);
                }
                (Some(id), _) => common = Some(id),
            }
        }

        Ok(common)
    }
}

fn group_by_lock<'a>(stalled: &[StalledThreadRecord<'a>]) -> Vec<LockStallGroup<'a>> {
    let mut by_lock: BTreeMap<&'a str, Vec<ThreadId>> = BTreeMap::new();
    for record in stalled {
        by_lock.entry(record.lock_id).or_default().push(record.id);
    }

    let mut groups: Vec<_> = by_lock
        .into_iter()
        .map(|(lock_id, threads)| LockStallGroup { lock_id, threads })
        .collect();
    groups.sort_by(|a, b| b.threads.len().cmp(&a.threads.len()));
    groups
}
