//! Cross-dump thread tracking.
//!
//! Folds a [`DumpSequence`] into one record per thread identity. Each record
//! keeps borrowed references to every occurrence of its thread, so later
//! analyses (starvation, stack views) can look back at the reported lock lines
//! and stacks without copying them.
//!
//! # Architecture
//!
//! - **[`ActivitySink`]** - anything that can absorb one occurrence of a thread
//! - **[`track_with`]** - the generic fold, parameterized by a record factory
//! - **[`ActivityRecord`]** - the standard record
//! - **[`ThreadActivity`]** - the standard records plus the "most work" queries
//!
//! ## Data Flow
//!
//! ```text
//! dump 0 ──┐
//! dump 1 ──┼──► track_with(factory) ──► BTreeMap<ThreadId, A: ActivitySink>
//! dump 2 ──┘
//! ```

// Percentage calculations intentionally convert to f64
#![allow(clippy::cast_precision_loss)]

use super::distribution::{distribution, percent_of, Share};
use crate::classification::{category_distribution, Category};
use crate::domain::DumpSequence;
use log::debug;
use serde::Serialize;
use stallwatch_common::{StackFrame, ThreadId, ThreadSnapshot, ThreadState};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// =============================================================================
// GENERIC TRACKING
// =============================================================================

/// Absorbs the occurrences of one thread identity, in dump order.
pub trait ActivitySink<'a> {
    fn record(&mut self, thread: &'a ThreadSnapshot);
}

/// Fold every thread of every dump into one sink per thread identity.
///
/// `factory` is called with the first occurrence of each identity and must
/// return an empty sink; that occurrence is then recorded like every other.
/// With `skip_empty_stacks`, threads with no frames are ignored entirely.
pub fn track_with<'a, A, F>(
    dumps: &'a DumpSequence,
    skip_empty_stacks: bool,
    mut factory: F,
) -> BTreeMap<ThreadId, A>
where
    A: ActivitySink<'a>,
    F: FnMut(&'a ThreadSnapshot) -> A,
{
    let mut sinks: BTreeMap<ThreadId, A> = BTreeMap::new();

    for dump in dumps {
        for thread in &dump.threads {
            if skip_empty_stacks && thread.stack.is_empty() {
                continue;
            }
            sinks
                .entry(thread.id)
                .or_insert_with(|| factory(thread))
                .record(thread);
        }
    }

    sinks
}

// =============================================================================
// ACTIVITY RECORD
// =============================================================================

/// Everything observed about one thread across a sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord<'a> {
    id: ThreadId,

    /// Name at first sighting
    name: &'a str,

    occurrences: usize,

    /// First non-absent CPU time seen
    first_cpu_secs: Option<f64>,

    /// Most recent non-absent CPU time seen
    last_cpu_secs: Option<f64>,

    max_elapsed_secs: Option<f64>,

    states: BTreeMap<ThreadState, usize>,

    /// One entry per occurrence, in dump order
    #[serde(skip)]
    samples: Vec<&'a ThreadSnapshot>,
}

impl<'a> ActivityRecord<'a> {
    /// An empty record for `thread`'s identity.
    #[must_use]
    pub fn new(thread: &'a ThreadSnapshot) -> Self {
        Self {
            id: thread.id,
            name: &thread.name,
            occurrences: 0,
            first_cpu_secs: None,
            last_cpu_secs: None,
            max_elapsed_secs: None,
            states: BTreeMap::new(),
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    #[must_use]
    pub fn occurrences(&self) -> usize {
        self.occurrences
    }

    #[must_use]
    pub fn has_cpu_data(&self) -> bool {
        self.first_cpu_secs.is_some()
    }

    #[must_use]
    pub fn has_elapsed_data(&self) -> bool {
        self.max_elapsed_secs.is_some()
    }

    #[must_use]
    pub fn first_cpu_secs(&self) -> Option<f64> {
        self.first_cpu_secs
    }

    #[must_use]
    pub fn last_cpu_secs(&self) -> Option<f64> {
        self.last_cpu_secs
    }

    /// CPU consumed between first and last measurement; 0 without two values.
    #[must_use]
    pub fn cpu_delta_secs(&self) -> f64 {
        match (self.first_cpu_secs, self.last_cpu_secs) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Largest reported thread lifetime.
    #[must_use]
    pub fn max_elapsed_secs(&self) -> Option<f64> {
        self.max_elapsed_secs
    }

    /// Raw state histogram.
    #[must_use]
    pub fn state_counts(&self) -> &BTreeMap<ThreadState, usize> {
        &self.states
    }

    /// Every occurrence, in dump order.
    #[must_use]
    pub fn samples(&self) -> &[&'a ThreadSnapshot] {
        &self.samples
    }

    /// The first occurrence, used as the representative stack.
    #[must_use]
    pub fn first_sample(&self) -> Option<&'a ThreadSnapshot> {
        self.samples.first().copied()
    }

    /// True when every occurrence was `WAITING` or `TIMED_WAITING`.
    #[must_use]
    pub fn is_always_waiting(&self) -> bool {
        let waiting: usize = self
            .states
            .iter()
            .filter(|(state, _)| state.is_waiting())
            .map(|(_, count)| count)
            .sum();
        self.occurrences > 0 && waiting == self.occurrences
    }

    #[must_use]
    pub fn state_distribution(&self) -> Vec<Share<ThreadState>> {
        distribution(
            self.states
                .iter()
                .flat_map(|(state, count)| std::iter::repeat(*state).take(*count)),
        )
    }

    /// Activity category of each occurrence, reduced to shares.
    #[must_use]
    pub fn category_distribution(&self) -> Vec<Share<Category>> {
        category_distribution(self.samples.iter().copied())
    }

    /// Most frequent innermost frame (by `class.method`); ties go to the
    /// frame seen first.
    #[must_use]
    pub fn top_frame(&self) -> Option<&'a StackFrame> {
        let mut counts: Vec<(&'a StackFrame, usize)> = Vec::new();
        for frame in self.samples.iter().copied().filter_map(ThreadSnapshot::top_frame) {
            match counts.iter_mut().find(|(seen, _)| same_method(seen, frame)) {
                Some((_, count)) => *count += 1,
                None => counts.push((frame, 1)),
            }
        }

        let mut best: Option<(&'a StackFrame, usize)> = None;
        for (frame, count) in counts {
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((frame, count)),
            }
        }
        best.map(|(frame, _)| frame)
    }

    /// Longest run of leading frames shared by every occurrence.
    ///
    /// Falls back to the first occurrence's whole stack when the occurrences
    /// share nothing, and to an empty slice when there are no occurrences.
    #[must_use]
    pub fn common_stack_prefix(&self) -> &'a [StackFrame] {
        let Some(first) = self.first_sample() else {
            return &[];
        };

        let common = self.samples[1..].iter().fold(first.stack.len(), |len, sample| {
            first.stack[..len]
                .iter()
                .zip(&sample.stack)
                .take_while(|(a, b)| a == b)
                .count()
        });

        if common == 0 {
            &first.stack
        } else {
            &first.stack[..common]
        }
    }
}

impl<'a> ActivitySink<'a> for ActivityRecord<'a> {
    fn record(&mut self, thread: &'a ThreadSnapshot) {
        self.occurrences += 1;
        *self.states.entry(thread.state).or_default() += 1;

        if let Some(cpu) = thread.cpu_time_secs {
            if self.first_cpu_secs.is_none() {
                self.first_cpu_secs = Some(cpu);
            }
            self.last_cpu_secs = Some(cpu);
        }

        if let Some(elapsed) = thread.elapsed_secs {
            self.max_elapsed_secs = Some(self.max_elapsed_secs.map_or(elapsed, |m| m.max(elapsed)));
        }

        self.samples.push(thread);
    }
}

fn same_method(a: &StackFrame, b: &StackFrame) -> bool {
    a.class_name == b.class_name && a.method_name == b.method_name
}

// =============================================================================
// THREAD ACTIVITY (RANKING VIEW)
// =============================================================================

/// Tracked records for a whole sequence, with ranking and CPU share queries.
#[derive(Debug, Clone)]
pub struct ThreadActivity<'a> {
    records: BTreeMap<ThreadId, ActivityRecord<'a>>,
    dump_count: usize,
    elapsed_secs: f64,
}

impl<'a> ThreadActivity<'a> {
    #[must_use]
    pub fn track(dumps: &'a DumpSequence, skip_empty_stacks: bool) -> Self {
        let records = track_with(dumps, skip_empty_stacks, ActivityRecord::new);
        debug!(
            "Tracked {} threads across {} dumps ({:.3}s)",
            records.len(),
            dumps.len(),
            dumps.elapsed_secs()
        );
        Self { records, dump_count: dumps.len(), elapsed_secs: dumps.elapsed_secs() }
    }

    #[must_use]
    pub fn get(&self, id: ThreadId) -> Option<&ActivityRecord<'a>> {
        self.records.get(&id)
    }

    /// Records in thread-id order.
    pub fn records(&self) -> impl Iterator<Item = &ActivityRecord<'a>> {
        self.records.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn dump_count(&self) -> usize {
        self.dump_count
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    /// Sum of every thread's CPU delta.
    #[must_use]
    pub fn total_cpu_secs(&self) -> f64 {
        self.records.values().map(ActivityRecord::cpu_delta_secs).sum()
    }

    /// Share of the combined CPU time (%) spent by `record`.
    #[must_use]
    pub fn cpu_share(&self, record: &ActivityRecord<'_>) -> Option<f64> {
        if !record.has_cpu_data() {
            return None;
        }
        percent_of(record.cpu_delta_secs(), self.total_cpu_secs())
    }

    /// CPU delta over wall time (%); 100% is one fully busy core.
    #[must_use]
    pub fn core_utilization(&self, record: &ActivityRecord<'_>) -> Option<f64> {
        if !record.has_cpu_data() {
            return None;
        }
        percent_of(record.cpu_delta_secs(), self.elapsed_secs)
    }

    /// [`Self::core_utilization`] rounded to whole cores.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn approx_cores(&self, record: &ActivityRecord<'_>) -> Option<u32> {
        self.core_utilization(record)
            .map(|utilization| (utilization / 100.0).round().max(0.0) as u32)
    }

    /// Combined CPU time over wall time (%).
    #[must_use]
    pub fn overall_utilization(&self) -> Option<f64> {
        percent_of(self.total_cpu_secs(), self.elapsed_secs)
    }

    /// All records, busiest first.
    ///
    /// Order: CPU delta descending, then threads with CPU data before threads
    /// without, then name, then id.
    #[must_use]
    pub fn ranked(&self) -> Vec<&ActivityRecord<'a>> {
        let mut ranked: Vec<_> = self.records.values().collect();
        ranked.sort_by(|a, b| rank_order(a, b));
        ranked
    }

    /// The first `n` of [`Self::ranked`].
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<&ActivityRecord<'a>> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }
}

fn rank_order(a: &ActivityRecord<'_>, b: &ActivityRecord<'_>) -> Ordering {
    b.cpu_delta_secs()
        .total_cmp(&a.cpu_delta_secs())
        .then_with(|| b.has_cpu_data().cmp(&a.has_cpu_data()))
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.id().cmp(&b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stallwatch_common::{DumpSnapshot, Timestamp};

    fn seq(dumps: Vec<Vec<ThreadSnapshot>>) -> DumpSequence {
        let dumps = dumps
            .into_iter()
            .enumerate()
            .map(|(i, threads)| DumpSnapshot::new(Timestamp::from_millis(i as u64 * 1_000), threads))
            .collect();
        DumpSequence::new(dumps).unwrap()
    }

    fn thread(id: u64, name: &str, state: ThreadState) -> ThreadSnapshot {
        ThreadSnapshot::new(ThreadId(id), name, state)
            .with_frame(StackFrame::new("com.example.Worker", "run"))
    }

    #[test]
    fn test_empty_sequence() {
        let dumps = DumpSequence::default();
        let activity = ThreadActivity::track(&dumps, false);
        assert!(activity.is_empty());
        assert!(activity.total_cpu_secs().abs() < f64::EPSILON);
        assert_eq!(activity.overall_utilization(), None);
        assert!(activity.ranked().is_empty());
    }

    #[test]
    fn test_cpu_extremes_skip_absent_values() {
        let dumps = seq(vec![
            vec![thread(1, "a", ThreadState::Runnable)],
            vec![thread(1, "a", ThreadState::Runnable).with_cpu_time(1.0)],
            vec![thread(1, "a", ThreadState::Runnable)],
            vec![thread(1, "a", ThreadState::Runnable).with_cpu_time(3.5)],
            vec![thread(1, "a", ThreadState::Runnable)],
        ]);
        let activity = ThreadActivity::track(&dumps, false);
        let record = activity.get(ThreadId(1)).unwrap();
        assert_eq!(record.occurrences(), 5);
        assert_eq!(record.first_cpu_secs(), Some(1.0));
        assert_eq!(record.last_cpu_secs(), Some(3.5));
        assert!((record.cpu_delta_secs() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_absent_cpu_is_not_zero() {
        let dumps = seq(vec![vec![thread(1, "a", ThreadState::Runnable)]]);
        let activity = ThreadActivity::track(&dumps, false);
        let record = activity.get(ThreadId(1)).unwrap();
        assert!(!record.has_cpu_data());
        assert_eq!(activity.cpu_share(record), None);
        assert_eq!(activity.core_utilization(record), None);
    }

    #[test]
    fn test_elapsed_keeps_maximum_of_reported_values() {
        let dumps = seq(vec![
            vec![thread(1, "a", ThreadState::Runnable).with_elapsed(12.0)],
            vec![thread(1, "a", ThreadState::Runnable)],
            vec![thread(1, "a", ThreadState::Runnable).with_elapsed(14.5)],
            vec![thread(1, "a", ThreadState::Runnable).with_elapsed(3.0), thread(2, "b", ThreadState::Runnable)],
        ]);
        let activity = ThreadActivity::track(&dumps, false);

        let a = activity.get(ThreadId(1)).unwrap();
        assert!(a.has_elapsed_data());
        assert_eq!(a.max_elapsed_secs(), Some(14.5));

        let b = activity.get(ThreadId(2)).unwrap();
        assert!(!b.has_elapsed_data());
        assert_eq!(b.max_elapsed_secs(), None);
    }

    #[test]
    fn test_skip_empty_stacks() {
        let bare = ThreadSnapshot::new(ThreadId(2), "bare", ThreadState::Runnable);
        let dumps = seq(vec![vec![thread(1, "a", ThreadState::Runnable), bare]]);

        assert_eq!(ThreadActivity::track(&dumps, false).len(), 2);
        let filtered = ThreadActivity::track(&dumps, true);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.get(ThreadId(2)).is_none());
    }

    #[test]
    fn test_ranking_order() {
        let dumps = seq(vec![
            vec![
                thread(1, "idle-b", ThreadState::Waiting),
                thread(2, "busy", ThreadState::Runnable).with_cpu_time(0.0),
                thread(3, "idle-a", ThreadState::Waiting),
                thread(4, "measured-idle", ThreadState::Waiting).with_cpu_time(2.0),
            ],
            vec![
                thread(1, "idle-b", ThreadState::Waiting),
                thread(2, "busy", ThreadState::Runnable).with_cpu_time(1.5),
                thread(3, "idle-a", ThreadState::Waiting),
                thread(4, "measured-idle", ThreadState::Waiting).with_cpu_time(2.0),
            ],
        ]);
        let activity = ThreadActivity::track(&dumps, false);
        let names: Vec<_> = activity.ranked().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["busy", "measured-idle", "idle-a", "idle-b"]);

        let top: Vec<_> = activity.top(2).iter().map(|r| r.name()).collect();
        assert_eq!(top, vec!["busy", "measured-idle"]);
    }

    #[test]
    fn test_cpu_share_and_utilization() {
        let dumps = seq(vec![
            vec![
                thread(1, "a", ThreadState::Runnable).with_cpu_time(0.0),
                thread(2, "b", ThreadState::Runnable).with_cpu_time(0.0),
            ],
            vec![
                thread(1, "a", ThreadState::Runnable).with_cpu_time(0.75),
                thread(2, "b", ThreadState::Runnable).with_cpu_time(0.25),
            ],
        ]);
        let activity = ThreadActivity::track(&dumps, false);
        let a = activity.get(ThreadId(1)).unwrap();

        assert!((activity.total_cpu_secs() - 1.0).abs() < 1e-9);
        assert!((activity.cpu_share(a).unwrap() - 75.0).abs() < 1e-9);
        assert!((activity.core_utilization(a).unwrap() - 75.0).abs() < 1e-9);
        assert_eq!(activity.approx_cores(a), Some(1));
        assert!((activity.overall_utilization().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_distribution_and_waiting() {
        let dumps = seq(vec![
            vec![thread(1, "a", ThreadState::Waiting)],
            vec![thread(1, "a", ThreadState::TimedWaiting)],
            vec![thread(1, "a", ThreadState::Waiting)],
        ]);
        let activity = ThreadActivity::track(&dumps, false);
        let record = activity.get(ThreadId(1)).unwrap();
        assert!(record.is_always_waiting());

        let states = record.state_distribution();
        assert_eq!(states[0].value, ThreadState::Waiting);
        assert_eq!(states[0].count, 2);
        assert_eq!(states[1].value, ThreadState::TimedWaiting);
    }

    #[test]
    fn test_top_frame_prefers_most_frequent_then_first_seen() {
        let reading = |id| {
            ThreadSnapshot::new(ThreadId(id), "io", ThreadState::Runnable)
                .with_frame(StackFrame::new("java.io.FileInputStream", "read").with_location("FileInputStream.java", 1))
        };
        let writing = |id| {
            ThreadSnapshot::new(ThreadId(id), "io", ThreadState::Runnable)
                .with_frame(StackFrame::new("java.io.FileOutputStream", "write"))
        };
        let dumps = seq(vec![vec![writing(1)], vec![reading(1)], vec![reading(1)]]);
        let activity = ThreadActivity::track(&dumps, false);
        let top = activity.get(ThreadId(1)).and_then(ActivityRecord::top_frame).unwrap();
        assert_eq!(top.method_name, "read");

        let tied = seq(vec![vec![writing(1)], vec![reading(1)]]);
        let activity = ThreadActivity::track(&tied, false);
        let top = activity.get(ThreadId(1)).and_then(ActivityRecord::top_frame).unwrap();
        assert_eq!(top.method_name, "write");
    }

    #[test]
    fn test_common_stack_prefix() {
        let base = |leaf: &str| {
            ThreadSnapshot::new(ThreadId(1), "w", ThreadState::Runnable).with_stack(vec![
                StackFrame::new("com.example.Loop", "spin"),
                StackFrame::new("com.example.Loop", "run"),
                StackFrame::new("com.example.Main", leaf),
            ])
        };
        let dumps = seq(vec![vec![base("main")], vec![base("other")]]);
        let activity = ThreadActivity::track(&dumps, false);
        let prefix = activity.get(ThreadId(1)).unwrap().common_stack_prefix();
        assert_eq!(prefix.len(), 2);
        assert_eq!(prefix[1].method_name, "run");

        let disjoint = seq(vec![
            vec![thread(1, "w", ThreadState::Runnable)],
            vec![ThreadSnapshot::new(ThreadId(1), "w", ThreadState::Runnable)
                .with_frame(StackFrame::new("com.example.Other", "go"))],
        ]);
        let activity = ThreadActivity::track(&disjoint, false);
        let prefix = activity.get(ThreadId(1)).unwrap().common_stack_prefix();
        assert_eq!(prefix.len(), 1);
        assert_eq!(prefix[0].class_name, "com.example.Worker");
    }

    #[derive(Default)]
    struct CountingSink {
        seen: usize,
    }

    impl<'a> ActivitySink<'a> for CountingSink {
        fn record(&mut self, _thread: &'a ThreadSnapshot) {
            self.seen += 1;
        }
    }

    #[test]
    fn test_track_with_custom_sink() {
        let dumps = seq(vec![
            vec![thread(1, "a", ThreadState::Runnable), thread(2, "b", ThreadState::Runnable)],
            vec![thread(1, "a", ThreadState::Runnable)],
        ]);
        let sinks = track_with(&dumps, false, |_| CountingSink::default());
        assert_eq!(sinks[&ThreadId(1)].seen, 2);
        assert_eq!(sinks[&ThreadId(2)].seen, 1);
    }
}
