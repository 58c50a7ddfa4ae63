//! # Stallwatch - Thread Dump Diagnostics
//!
//! Stallwatch reads a sequence of already-parsed JVM thread dumps taken from
//! one process and answers three questions about it:
//!
//! - which threads are doing work, and what kind of work
//! - which threads are blocked waiting on a lock another thread holds
//! - which threads have made no progress at all across the sequence
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            DumpSequence (stallwatch-common records)             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DiagnosticsEngine::run                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Activity   │──▶│  Starvation  │──▶│   Findings   │         │
//! │  │   Tracker    │   │   Detector   │   │  (severity)  │         │
//! │  └──────────────┘   └──────────────┘   └──────▲───────┘         │
//! │  ┌──────────────┐                             │                 │
//! │  │  Wait Graph  │─────────────────────────────┘                 │
//! │  │ (latest dump)│                                               │
//! │  └──────────────┘                                               │
//! │                                                                 │
//! │  Classification and stack filtering are shared helpers          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`domain`]: the validated [`domain::DumpSequence`] and the error types
//! - [`config`]: [`config::DiagnosticsConfig`] with defaults and validation
//! - [`classification`]: maps a stack to an activity [`classification::Category`]
//! - [`stack_filter`]: collapses runtime-internal frames for presentation
//! - [`analysis`]: activity tracking, lock resolution, the wait-for graph and
//!   starvation detection
//! - [`diagnostics`]: runs the analyses and merges their findings
//!
//! ## Typical Usage
//!
//! ```ignore
//! let dumps = DumpSequence::new(snapshots)?;
//! let engine = DiagnosticsEngine::new(DiagnosticsConfig::default())?;
//! let report = engine.run(&dumps)?;
//! for finding in report.findings() {
//!     println!("{:?}: {:?}", finding.severity(), finding);
//! }
//! ```
//!
//! ## Key Concepts
//!
//! - **Dump**: every thread of the process captured at one instant
//! - **Wait-for edge**: thread A waits on a lock that thread B holds
//! - **Stalled thread**: waiting on the same lock in every dump with no CPU progress

pub mod analysis;
pub mod classification;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod stack_filter;

pub use config::DiagnosticsConfig;
pub use diagnostics::{DiagnosticsEngine, DiagnosticsReport, Finding, Severity};
pub use domain::{ConfigError, DiagnosticsError, DumpSequence};
