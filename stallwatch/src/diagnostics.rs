//! One diagnostics pass over a dump sequence.
//!
//! [`DiagnosticsEngine::run`] tracks thread activity, builds the wait-for graph
//! of the latest dump, and looks for stalled threads when the sequence has
//! enough dumps. The component results are returned as-is, together with a
//! merged, severity-ordered list of [`Finding`]s.
//!
//! ```text
//! DumpSequence ──┬──► ThreadActivity ──► StarvationReport ──┐
//!                │                                          ├──► findings
//!                └──► WaitGraph (latest dump) ──────────────┘
//! ```
//!
//! The engine holds only its configuration. Every result borrows from the
//! caller's sequence, and independent runs share nothing.

use crate::analysis::distribution::{distribution, Share};
use crate::analysis::starvation::{LockStallGroup, StalledThreadRecord, StarvationDetector, StarvationReport};
use crate::analysis::tracker::{ActivityRecord, ThreadActivity};
use crate::analysis::wait_graph::{Chain, ContentionGroup, WaitGraph};
use crate::classification::{classify_thread, group_distribution, Category, CategoryGroup};
use crate::config::DiagnosticsConfig;
use crate::domain::{ConfigError, DiagnosticsError, DumpSequence};
use crate::stack_filter::{self, FilteredFrame};
use log::debug;
use serde::Serialize;
use stallwatch_common::{DumpSnapshot, StackFrame};
use std::fmt;

// ============================================================================
// Analyses and Their Dump Requirements
// ============================================================================

/// How many dumps an analysis needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpRequirement {
    /// At least one dump
    One,
    /// At least two dumps
    Many,
    /// Any number, including none
    Any,
}

impl DumpRequirement {
    #[must_use]
    pub fn is_satisfied_by(self, dump_count: usize) -> bool {
        match self {
            DumpRequirement::One => dump_count >= 1,
            DumpRequirement::Many => dump_count >= 2,
            DumpRequirement::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Analysis {
    ThreadActivity,
    DependencyGraph,
    Starvation,
}

impl Analysis {
    #[must_use]
    pub fn requirement(self) -> DumpRequirement {
        match self {
            Analysis::ThreadActivity | Analysis::DependencyGraph => DumpRequirement::Any,
            // One dump cannot show a lack of progress
            Analysis::Starvation => DumpRequirement::Many,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Analysis::ThreadActivity => "thread-activity",
            Analysis::DependencyGraph => "dependency-graph",
            Analysis::Starvation => "starvation",
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An analysis that did not run because the sequence was too short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkippedAnalysis {
    pub analysis: Analysis,
    pub requirement: DumpRequirement,
    pub dump_count: usize,
}

// ============================================================================
// Findings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding<'a> {
    /// Threads waiting on each other in a loop
    DependencyCycle(Chain),
    /// Three or more threads waiting in a line
    DependencyChain(Chain),
    /// Several threads blocked on one lock in the latest dump
    LockContention(ContentionGroup<'a>),
    /// Several stalled threads sharing one lock
    StalledLockGroup(LockStallGroup<'a>),
    StalledThread(StalledThreadRecord<'a>),
}

impl Finding<'_> {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Finding::DependencyCycle(_) => Severity::Critical,
            Finding::DependencyChain(_)
            | Finding::LockContention(_)
            | Finding::StalledLockGroup(_) => Severity::Warn,
            Finding::StalledThread(_) => Severity::Info,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct DiagnosticsReport<'a> {
    latest: Option<&'a DumpSnapshot>,
    top_threads: usize,

    pub activity: ThreadActivity<'a>,

    /// `None` only if the dependency graph was skipped
    pub wait_graph: Option<WaitGraph<'a>>,

    /// `None` when the sequence has fewer than two dumps
    pub starvation: Option<StarvationReport<'a>>,

    pub skipped: Vec<SkippedAnalysis>,
}

impl<'a> DiagnosticsReport<'a> {
    #[must_use]
    pub fn dump_count(&self) -> usize {
        self.activity.dump_count()
    }

    /// The configured number of busiest threads.
    #[must_use]
    pub fn most_active(&self) -> Vec<&ActivityRecord<'a>> {
        self.activity.top(self.top_threads)
    }

    /// Category of every thread in the latest dump, reduced to shares.
    #[must_use]
    pub fn category_overview(&self) -> Vec<Share<Category>> {
        distribution(self.latest_categories())
    }

    /// [`Self::category_overview`] at group granularity.
    #[must_use]
    pub fn group_overview(&self) -> Vec<Share<CategoryGroup>> {
        group_distribution(self.latest_categories())
    }

    fn latest_categories(&self) -> impl Iterator<Item = Category> + 'a {
        self.latest
            .into_iter()
            .flat_map(|dump| dump.threads.iter().map(classify_thread))
    }

    /// Merged findings, most severe first. Within one severity they keep
    /// component order: graph findings, then starvation findings.
    #[must_use]
    pub fn findings(&self) -> Vec<Finding<'a>> {
        let mut findings = Vec::new();

        if let Some(graph) = &self.wait_graph {
            for chain in graph.chains() {
                if chain.closes_cycle {
                    findings.push(Finding::DependencyCycle(chain));
                } else if chain.is_multi_hop() {
                    findings.push(Finding::DependencyChain(chain));
                }
            }
            findings.extend(graph.contention_groups().into_iter().map(Finding::LockContention));
        }

        if let Some(starvation) = &self.starvation {
            findings.extend(starvation.contention_groups().cloned().map(Finding::StalledLockGroup));
            findings.extend(starvation.stalled.iter().cloned().map(Finding::StalledThread));
        }

        findings.sort_by(|a, b| b.severity().cmp(&a.severity()));
        findings
    }

    /// Highest severity among [`Self::findings`].
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings().iter().map(Finding::severity).max()
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
    starvation: StarvationDetector,
}

impl DiagnosticsEngine {
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found by [`DiagnosticsConfig::validate`].
    pub fn new(config: DiagnosticsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let starvation = StarvationDetector::from_config(&config);
        Ok(Self { config, starvation })
    }

    #[must_use]
    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// Run every analysis the sequence is long enough for.
    ///
    /// # Errors
    ///
    /// Only with [`crate::analysis::locks::LockResolution::Strict`]: returns
    /// [`DiagnosticsError::AmbiguousWait`] for a thread with several blocking
    /// lock lines.
    pub fn run<'a>(&self, dumps: &'a DumpSequence) -> Result<DiagnosticsReport<'a>, DiagnosticsError> {
        let dump_count = dumps.len();
        let mut skipped = Vec::new();
        let mut should_run = |analysis: Analysis| {
            let requirement = analysis.requirement();
            let ok = requirement.is_satisfied_by(dump_count);
            if !ok {
                debug!("Skipping {analysis}: needs {requirement:?} dumps, have {dump_count}");
                skipped.push(SkippedAnalysis { analysis, requirement, dump_count });
            }
            ok
        };

        // Starvation builds on the tracked records, so tracking is never skipped
        debug_assert!(Analysis::ThreadActivity.requirement().is_satisfied_by(dump_count));
        let activity = ThreadActivity::track(dumps, self.config.skip_empty_stacks);

        let wait_graph = if should_run(Analysis::DependencyGraph) {
            Some(WaitGraph::from_sequence(dumps, self.config.lock_resolution)?)
        } else {
            None
        };

        let starvation = if should_run(Analysis::Starvation) {
            Some(self.starvation.detect(&activity)?)
        } else {
            None
        };

        debug!(
            "Diagnostics over {} dumps done, {} analyses skipped",
            dump_count,
            skipped.len()
        );

        Ok(DiagnosticsReport {
            latest: dumps.latest(),
            top_threads: self.config.top_threads,
            activity,
            wait_graph,
            starvation,
            skipped,
        })
    }

    /// The configured presentation view of a stack.
    #[must_use]
    pub fn stack_view<'a>(&self, frames: &'a [StackFrame]) -> Vec<FilteredFrame<'a>> {
        stack_filter::view(frames, self.config.intelligent_filter, self.config.stack_budget)
    }
}

impl Default for DiagnosticsEngine {
    fn default() -> Self {
        let config = DiagnosticsConfig::default();
        let starvation = StarvationDetector::from_config(&config);
        Self { config, starvation }
    }
}
