//! Core data model: runs, steps and their state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Status tokens treated as a successful step outcome. Matching is
/// case-insensitive; the legacy dashboard still stores French labels.
pub const SUCCESS_TOKENS: &[&str] = &["succès", "success", "completed"];

/// Status tokens treated as a failed step outcome.
pub const ERROR_TOKENS: &[&str] = &["échec", "error", "failed", "failure"];

/// True when a textual step status belongs to the success set.
pub fn is_success_token(status: &str) -> bool {
    let norm = status.trim().to_lowercase();
    SUCCESS_TOKENS.iter().any(|t| *t == norm)
}

/// True when a textual step status belongs to the failure set.
pub fn is_error_token(status: &str) -> bool {
    let norm = status.trim().to_lowercase();
    ERROR_TOKENS.iter().any(|t| *t == norm)
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "error" => Some(RunStatus::Error),
            "skipped" => Some(RunStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Skipped
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valid run status transitions. Terminal states never move again.
pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    if from == to {
        return true;
    }
    match from {
        RunStatus::Pending => matches!(
            to,
            RunStatus::Running | RunStatus::Completed | RunStatus::Error | RunStatus::Skipped
        ),
        RunStatus::Running => matches!(to, RunStatus::Completed | RunStatus::Error),
        RunStatus::Completed | RunStatus::Error | RunStatus::Skipped => false,
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Error | StepStatus::Skipped
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    /// Statuses only move forward: pending -> running -> terminal.
    pub fn can_transition(from: StepStatus, to: StepStatus) -> bool {
        match from {
            StepStatus::Pending => !matches!(to, StepStatus::Pending),
            StepStatus::Running => to.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named phase of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    pub status: StepStatus,
    pub result: String,
    /// Artifact id of the capture taken when the step failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Step {
    pub fn pending(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
            result: "Waiting".to_string(),
            screenshot: None,
        }
    }

    /// Move the step forward, rejecting backwards transitions.
    pub fn advance(&mut self, status: StepStatus, result: impl Into<String>) -> Result<()> {
        if !StepStatus::can_transition(self.status, status) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.result = result.into();
        Ok(())
    }
}

/// Aggregate step statistics stored with a finished run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub warning: usize,
    pub success_rate: f64,
}

/// One execution of a scripted UI test scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub status: RunStatus,
    pub progress: u8,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, module: Option<String>, scenario: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            module,
            scenario,
            status: RunStatus::Pending,
            progress: 0,
            steps: Vec::new(),
            execution_time_seconds: None,
            success: None,
            artifact_id: None,
            video_id: None,
            filename: None,
            stats: None,
            error: None,
            created_at: now,
            completed_at: None,
            last_update_at: now,
        }
    }

    /// A run succeeded iff every step terminated in the success set.
    pub fn compute_success(steps: &[Step]) -> bool {
        !steps.is_empty() && steps.iter().all(|s| s.status.is_success())
    }
}

/// floor(completed / total * 100), clamped to 0..=100
pub fn progress_for(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed * 100 / total).min(100)) as u8
}

/// Build a run id from its parts: `{module}_{scenario}_{epoch}`.
pub fn make_run_id(module: &str, scenario: &str) -> String {
    format!("{}_{}_{}", module, scenario, Utc::now().timestamp())
}

/// Split a run id back into `(module, scenario)`.
///
/// The module is the first `_`-delimited token, the scenario everything
/// between the first and last token (the last one being the creation epoch).
pub fn parse_run_id(run_id: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = run_id.split('_').collect();
    if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidRunId(run_id.to_string()));
    }
    let module = parts[0].to_string();
    let scenario = parts[1..parts.len() - 1].join("_");
    Ok((module, scenario))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_tokens_are_case_insensitive() {
        assert!(is_success_token("Succès"));
        assert!(is_success_token("SUCCESS"));
        assert!(is_success_token("completed"));
        assert!(!is_success_token("running"));
        assert!(is_error_token("Échec"));
        assert!(is_error_token("FAILED"));
        assert!(!is_error_token("completed"));
    }

    #[test]
    fn run_transitions_are_monotonic() {
        assert!(can_transition(RunStatus::Pending, RunStatus::Running));
        assert!(can_transition(RunStatus::Running, RunStatus::Error));
        assert!(can_transition(RunStatus::Running, RunStatus::Completed));
        assert!(!can_transition(RunStatus::Completed, RunStatus::Running));
        assert!(!can_transition(RunStatus::Error, RunStatus::Pending));
        assert!(!can_transition(RunStatus::Skipped, RunStatus::Running));
    }

    #[test]
    fn step_never_regresses() {
        let mut step = Step::pending("login");
        step.advance(StepStatus::Running, "in progress").unwrap();
        step.advance(StepStatus::Completed, "done").unwrap();
        assert!(step.advance(StepStatus::Running, "again").is_err());
        assert!(step.advance(StepStatus::Pending, "reset").is_err());
    }

    #[test]
    fn pending_step_can_be_short_circuited_to_error() {
        let mut step = Step::pending("validate");
        step.advance(StepStatus::Error, "aborted by earlier failure")
            .unwrap();
        assert_eq!(step.status, StepStatus::Error);
    }

    #[test]
    fn run_id_round_trip() {
        let id = make_run_id("CTC110M", "demo");
        let (module, scenario) = parse_run_id(&id).unwrap();
        assert_eq!(module, "CTC110M");
        assert_eq!(scenario, "demo");
    }

    #[test]
    fn run_id_with_multi_token_scenario() {
        let (module, scenario) = parse_run_id("COX200M_rent_review_1714000000").unwrap();
        assert_eq!(module, "COX200M");
        assert_eq!(scenario, "rent_review");
    }

    #[test]
    fn malformed_run_ids_rejected() {
        assert!(parse_run_id("CTC110M").is_err());
        assert!(parse_run_id("CTC110M_demo").is_err());
        assert!(parse_run_id("__1714000000").is_err());
    }

    #[test]
    fn success_requires_every_step_green() {
        let mut steps = vec![Step::pending("a"), Step::pending("b"), Step::pending("c")];
        for s in steps.iter_mut() {
            s.status = StepStatus::Completed;
        }
        assert!(Run::compute_success(&steps));

        steps[1].status = StepStatus::Error;
        assert!(!Run::compute_success(&steps));
        assert!(!Run::compute_success(&[]));
    }

    #[test]
    fn progress_rounds_down() {
        assert_eq!(progress_for(0, 5), 0);
        assert_eq!(progress_for(1, 3), 33);
        assert_eq!(progress_for(2, 3), 66);
        assert_eq!(progress_for(5, 5), 100);
        assert_eq!(progress_for(0, 0), 0);
    }
}
