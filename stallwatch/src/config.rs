//! Configuration for one diagnostics run

use crate::analysis::locks::LockResolution;
use crate::domain::ConfigError;
use serde::Deserialize;

/// Tunables consumed by [`crate::diagnostics::DiagnosticsEngine`].
///
/// Every field has a default, so a partial document deserializes:
///
/// ```ignore
/// let config: DiagnosticsConfig = serde_json::from_str(r#"{ "top_threads": 5 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Frames kept per stack view (0 = keep all)
    pub stack_budget: usize,

    /// Collapse runtime/framework frames in stack views
    pub intelligent_filter: bool,

    /// Tracker ignores threads whose stack is empty
    pub skip_empty_stacks: bool,

    /// CPU progress (seconds) at or below which a thread counts as idle
    pub cpu_epsilon_secs: f64,

    /// Thread names never reported as stalled
    pub ignored_thread_names: Vec<String>,

    /// Size of the "most work" view
    pub top_threads: usize,

    /// How a thread with several blocking lock lines is resolved
    pub lock_resolution: LockResolution,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stack_budget: 10,
            intelligent_filter: false,
            skip_empty_stacks: false,
            cpu_epsilon_secs: 0.0001,
            ignored_thread_names: vec!["Finalizer".to_string()],
            top_threads: 3,
            lock_resolution: LockResolution::TieBreak,
        }
    }
}

impl DiagnosticsConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a negative or non-finite epsilon, a zero
    /// `top_threads`, or an empty ignored name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cpu_epsilon_secs.is_finite() || self.cpu_epsilon_secs < 0.0 {
            return Err(ConfigError::InvalidCpuEpsilon(self.cpu_epsilon_secs));
        }

        if self.top_threads == 0 {
            return Err(ConfigError::ZeroTopThreads);
        }

        if self.ignored_thread_names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::EmptyIgnoredName);
        }

        Ok(())
    }
}
