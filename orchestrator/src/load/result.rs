//! Run and scenario results

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::provision::ProvisioningFailure;
use crate::nodes::NodeFailure;
use crate::scenario::ScenarioSpec;

/// Terminal outcome of one load session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Zero exit status and a non-empty artifact
    Succeeded,
    /// The tool exited non-zero
    Failed { exit_status: i32 },
    /// The tool exited zero but left no artifact behind
    MissingArtifact,
    /// Killed after exceeding its deadline
    TimedOut { termination_failed: bool },
    /// The remote channel broke before an exit status was observed
    Errored { message: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Result of one load session
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub node: String,
    pub artifact_path: String,
    pub outcome: RunOutcome,
    #[serde(serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    /// Last line the tool printed, for triage
    pub output_tail: String,
    #[serde(skip)]
    pub launched_at: Instant,
    #[serde(skip)]
    pub joined_at: Instant,
}

/// Aggregated result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub title: String,
    /// True iff every session succeeded
    pub success: bool,
    pub results: Vec<RunResult>,
    pub endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provisioning_failures: Vec<ProvisioningFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_failures: Vec<NodeFailure>,
}

impl ScenarioResult {
    pub fn from_runs(results: Vec<RunResult>, endpoints: Vec<String>) -> Self {
        let success = !results.is_empty() && results.iter().all(|r| r.outcome.is_success());
        Self {
            title: String::new(),
            success,
            results,
            endpoints,
            provisioning_failures: Vec::new(),
            node_failures: Vec::new(),
        }
    }

    /// Some load nodes were dropped during provisioning
    pub fn is_partial(&self) -> bool {
        !self.provisioning_failures.is_empty()
    }

    pub fn failed_runs(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

/// One line of the suite report
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuiteEntry {
    Completed {
        spec: ScenarioSpec,
        result: ScenarioResult,
    },
    /// The scenario could not run at all
    Aborted { spec: ScenarioSpec, error: String },
}

impl SuiteEntry {
    pub fn passed(&self) -> bool {
        matches!(self, SuiteEntry::Completed { result, .. } if result.success)
    }
}

/// Output artifact of a suite run
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scenarios: Vec<SuiteEntry>,
}

impl SuiteReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            scenarios: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: SuiteEntry) {
        self.scenarios.push(entry);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|e| e.passed()).count()
    }

    pub fn success(&self) -> bool {
        self.passed() == self.scenarios.len()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn as_secs_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
