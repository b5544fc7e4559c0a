use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Current challenge schema version
pub const CHALLENGE_SCHEMA_VERSION: u32 = 1;

/// Default passing threshold on the 0-100 total score
pub const DEFAULT_PASSING_SCORE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "beginner"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
            Difficulty::Expert => write!(f, "expert"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
    pub weight: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub criteria_id: String,
    pub name: String,
    pub weight: f64,
    pub max_score: f64,
    #[serde(default)]
    pub description: String,
}

/// A published challenge. Test cases and criteria have no lifecycle of their own.
///
/// Required text fields default to empty on deserialization so that a
/// malformed document reaches the validator instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub challenge_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub skills_targeted: BTreeSet<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub evaluation_criteria: Vec<Criterion>,
    #[serde(default)]
    pub time_limit_seconds: u32,
    #[serde(default)]
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,
}

fn default_schema_version() -> u32 {
    CHALLENGE_SCHEMA_VERSION
}

fn default_true() -> bool {
    true
}

fn default_passing_score() -> f64 {
    DEFAULT_PASSING_SCORE
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_memory_limit_mb() -> u64 {
    128
}

/// Per-evaluation knobs. Zero limits are rejected by the evaluator before execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOptions {
    #[serde(default = "default_true")]
    pub enable_ai_analysis: bool,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            enable_ai_analysis: true,
            strict_mode: false,
            timeout_ms: default_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    None,
    Timeout,
    MemoryExceeded,
    RuntimeError,
    OutputMismatch,
}

impl FailureKind {
    /// Crashes and resource breaches, as opposed to a plain wrong answer
    pub fn is_execution_fault(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::MemoryExceeded | FailureKind::RuntimeError
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_case_index: usize,
    pub passed: bool,
    pub actual_output: String,
    pub execution_time_ms: u64,
    pub failure_kind: FailureKind,
    #[serde(default)]
    pub is_hidden: bool,
    /// First line of stderr, kept only for learner-facing crash explanations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

impl ExecutionResult {
    /// Strip everything a learner must not see about a hidden case
    pub fn redacted(mut self) -> Self {
        if self.is_hidden {
            self.actual_output.clear();
            self.error_summary = None;
        }
        self
    }
}

/// Terminal artifact of one evaluation. Never mutated once created;
/// corrections produce a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub submission_id: Uuid,
    pub challenge_id: String,
    pub user_id: String,
    pub language: String,
    pub test_results: Vec<ExecutionResult>,
    pub objective_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualitative_score: Option<f64>,
    pub total_score: f64,
    pub passed: bool,
    pub feedback: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Identity of the submission under evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub submission_id: Uuid,
    pub user_id: String,
}

/// Queue payload consumed by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub submission_id: Uuid,
    pub user_id: String,
    pub language: String,
    pub source_code: String,
    pub challenge: Challenge,
    #[serde(default)]
    pub options: EvaluationOptions,
    pub queued_at: DateTime<Utc>,
}

impl SubmissionJob {
    pub fn submission(&self) -> SubmissionRef {
        SubmissionRef {
            submission_id: self.submission_id,
            user_id: self.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Evaluated,
    /// Challenge failed validation; nothing was executed
    Rejected,
    /// Evaluation infrastructure failed; the submission was never scored
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub challenge_id: String,
    pub user_id: String,
    pub language: String,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SubmissionRecord {
    pub fn queued(job: &SubmissionJob) -> Self {
        Self {
            submission_id: job.submission_id,
            challenge_id: job.challenge.challenge_id.clone(),
            user_id: job.user_id.clone(),
            language: job.language.clone(),
            status: SubmissionStatus::Queued,
            created_at: job.queued_at,
            evaluation: None,
            errors: Vec::new(),
        }
    }

    /// Learner-facing copy: hidden cases disappear from the per-case results.
    /// Their aggregate pass count stays in the feedback.
    pub fn for_learner(mut self) -> Self {
        if let Some(evaluation) = self.evaluation.as_mut() {
            evaluation.test_results.retain(|result| !result.is_hidden);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: EvaluationOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, EvaluationOptions::default());
        assert!(options.enable_ai_analysis);
        assert!(!options.strict_mode);
        assert_eq!(options.timeout_ms, 5000);
        assert_eq!(options.memory_limit_mb, 128);
    }

    #[test]
    fn test_challenge_missing_fields_still_parses() {
        let challenge: Challenge =
            serde_json::from_str(r#"{"challenge_id": "c1", "difficulty": "beginner"}"#).unwrap();
        assert_eq!(challenge.schema_version, CHALLENGE_SCHEMA_VERSION);
        assert!(challenge.description.is_empty());
        assert!(challenge.is_active);
        assert_eq!(challenge.passing_score, DEFAULT_PASSING_SCORE);
        assert_eq!(challenge.difficulty, Some(Difficulty::Beginner));
    }

    #[test]
    fn test_execution_fault_classification() {
        assert!(FailureKind::Timeout.is_execution_fault());
        assert!(FailureKind::MemoryExceeded.is_execution_fault());
        assert!(FailureKind::RuntimeError.is_execution_fault());
        assert!(!FailureKind::OutputMismatch.is_execution_fault());
        assert!(!FailureKind::None.is_execution_fault());
    }

    #[test]
    fn test_learner_copy_drops_hidden_results() {
        let result = |index: usize, hidden: bool| ExecutionResult {
            test_case_index: index,
            passed: !hidden,
            actual_output: String::new(),
            execution_time_ms: 4,
            failure_kind: if hidden {
                FailureKind::Timeout
            } else {
                FailureKind::None
            },
            is_hidden: hidden,
            error_summary: None,
        };
        let record = SubmissionRecord {
            submission_id: Uuid::new_v4(),
            challenge_id: "c1".to_string(),
            user_id: "u1".to_string(),
            language: "python".to_string(),
            status: SubmissionStatus::Evaluated,
            created_at: Utc::now(),
            evaluation: Some(EvaluationRecord {
                submission_id: Uuid::new_v4(),
                challenge_id: "c1".to_string(),
                user_id: "u1".to_string(),
                language: "python".to_string(),
                test_results: vec![result(0, false), result(1, true), result(2, true)],
                objective_score: 50.0,
                qualitative_score: None,
                total_score: 50.0,
                passed: false,
                feedback: vec!["Hidden tests: 0/2 passed".to_string()],
                evaluated_at: Utc::now(),
            }),
            errors: vec![],
        };

        let evaluation = record.for_learner().evaluation.unwrap();
        assert_eq!(evaluation.test_results.len(), 1);
        assert_eq!(evaluation.test_results[0].test_case_index, 0);
        assert_eq!(evaluation.feedback, vec!["Hidden tests: 0/2 passed".to_string()]);
    }

    #[test]
    fn test_redaction_only_touches_hidden_results() {
        let visible = ExecutionResult {
            test_case_index: 0,
            passed: false,
            actual_output: "42".to_string(),
            execution_time_ms: 3,
            failure_kind: FailureKind::OutputMismatch,
            is_hidden: false,
            error_summary: None,
        };
        let hidden = ExecutionResult {
            is_hidden: true,
            error_summary: Some("Traceback".to_string()),
            ..visible.clone()
        };

        assert_eq!(visible.clone().redacted().actual_output, "42");
        let hidden = hidden.redacted();
        assert!(hidden.actual_output.is_empty());
        assert!(hidden.error_summary.is_none());
        assert_eq!(hidden.failure_kind, FailureKind::OutputMismatch);
    }
}
