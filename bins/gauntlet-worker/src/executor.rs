/// Challenge Evaluator - High-Level Orchestration
///
/// **Responsibility:**
/// Turn (submission, challenge, code, language, options) into an immutable
/// `EvaluationRecord`.
///
/// **Architecture:**
/// 1. Validate the challenge and options (validator)
/// 2. Run test cases through the sandbox pool (evaluator.rs, runner.rs)
/// 3. In parallel, request AI analysis under its own timeout (analysis.rs)
/// 4. Map analysis onto the challenge criteria (criteria.rs)
/// 5. Combine scores with the scoring policy and build feedback
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How outputs are compared (runner's job)
/// - Where records are stored (the worker persists them)
///
/// **Stages:**
/// Validating -> Executing -> ScoringObjective -> ScoringQualitative ->
/// Finalizing -> Done. Failed is reachable from any stage.

use crate::analysis::{analyze_with_timeout, AiAnalysis, AnalysisRequest, CodeAnalyzer};
use crate::config::{SandboxLimits, ScoringPolicy};
use crate::criteria::score_qualitative;
use crate::engine::{CancelSignal, Sandbox, SandboxError, MAX_SOURCE_CODE_BYTES};
use crate::evaluator::{hidden_summary, round_score, score_tests};
use chrono::Utc;
use gauntlet_common::languages::LanguageRegistry;
use gauntlet_common::types::{
    Challenge, EvaluationOptions, EvaluationRecord, ExecutionResult, FailureKind, SubmissionRef,
};
use gauntlet_common::validator::{validate_challenge, ValidationOptions};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

const FEEDBACK_OUTPUT_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStage {
    Validating,
    Executing,
    ScoringObjective,
    ScoringQualitative,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationStage::Validating => "validating",
            EvaluationStage::Executing => "executing",
            EvaluationStage::ScoringObjective => "scoring_objective",
            EvaluationStage::ScoringQualitative => "scoring_qualitative",
            EvaluationStage::Finalizing => "finalizing",
            EvaluationStage::Done => "done",
            EvaluationStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The challenge or options are invalid; nothing was executed
    #[error("challenge failed validation: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    /// The sandbox layer failed; the submission was not scored
    #[error("evaluation infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("evaluation cancelled")]
    Cancelled,
}

impl From<SandboxError> for EvaluationError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Infrastructure(reason) => EvaluationError::Infrastructure(reason),
            SandboxError::Cancelled => EvaluationError::Cancelled,
            SandboxError::Rejected(reason) => EvaluationError::InvalidSubmission(reason),
        }
    }
}

pub struct ChallengeEvaluator {
    sandbox: Arc<dyn Sandbox>,
    analyzer: Option<Arc<dyn CodeAnalyzer>>,
    languages: LanguageRegistry,
    pool: Arc<Semaphore>,
    policy: ScoringPolicy,
    validation: ValidationOptions,
    limits: SandboxLimits,
    analysis_timeout: Duration,
}

impl ChallengeEvaluator {
    pub fn new(sandbox: Arc<dyn Sandbox>, languages: LanguageRegistry, max_parallel: usize) -> Self {
        Self {
            sandbox,
            analyzer: None,
            languages,
            pool: Arc::new(Semaphore::new(max_parallel.max(1))),
            policy: ScoringPolicy::default(),
            validation: ValidationOptions::default(),
            limits: SandboxLimits::default(),
            analysis_timeout: Duration::from_secs(25),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_validation(mut self, validation: ValidationOptions) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    /// Evaluate one submission. Persisting the record is the caller's job.
    #[instrument(
        skip_all,
        fields(
            submission_id = %submission.submission_id,
            challenge_id = %challenge.challenge_id,
            language = %language
        )
    )]
    pub async fn evaluate_submission(
        &self,
        submission: &SubmissionRef,
        challenge: &Challenge,
        source_code: &str,
        language: &str,
        options: &EvaluationOptions,
        cancel: CancelSignal,
    ) -> Result<EvaluationRecord, EvaluationError> {
        let started = Instant::now();
        let result = self
            .run_stages(submission, challenge, source_code, language, options, &cancel)
            .await;

        match &result {
            Ok(record) => {
                enter(EvaluationStage::Done);
                info!(
                    objective_score = record.objective_score,
                    qualitative_score = ?record.qualitative_score,
                    total_score = record.total_score,
                    passed = record.passed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Evaluation complete"
                );
            }
            Err(e) => {
                enter(EvaluationStage::Failed);
                warn!(error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "Evaluation failed");
            }
        }
        result
    }

    async fn run_stages(
        &self,
        submission: &SubmissionRef,
        challenge: &Challenge,
        source_code: &str,
        language: &str,
        options: &EvaluationOptions,
        cancel: &CancelSignal,
    ) -> Result<EvaluationRecord, EvaluationError> {
        enter(EvaluationStage::Validating);
        self.check_preconditions(challenge, source_code, options)?;
        let language_config = self
            .languages
            .get(language)
            .map_err(|_| EvaluationError::UnsupportedLanguage(language.to_string()))?;
        if cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        enter(EvaluationStage::Executing);
        let tests = score_tests(
            self.sandbox.as_ref(),
            &self.pool,
            language_config,
            source_code,
            &challenge.test_cases,
            options,
            cancel,
        );
        let analysis = async {
            match (&self.analyzer, options.enable_ai_analysis) {
                (Some(analyzer), true) => {
                    let request = AnalysisRequest {
                        challenge,
                        language,
                        source_code,
                    };
                    Ok::<_, SandboxError>(Some(
                        analyze_with_timeout(analyzer.as_ref(), request, self.analysis_timeout)
                            .await,
                    ))
                }
                _ => Ok(None),
            }
        };
        let (tests, analysis) = tokio::try_join!(tests, analysis)?;

        enter(EvaluationStage::ScoringObjective);
        let objective_score = tests.objective_score;

        let (qualitative_score, analysis) = match analysis {
            Some(Ok(analysis)) => {
                enter(EvaluationStage::ScoringQualitative);
                let score = score_qualitative(
                    &challenge.evaluation_criteria,
                    objective_score,
                    &analysis,
                    self.policy.neutral_signal,
                );
                (Some(score), AnalysisOutcome::Available(analysis))
            }
            Some(Err(e)) => {
                warn!(error = %e, "AI analysis unavailable, scoring on tests only");
                (None, AnalysisOutcome::Unavailable)
            }
            None => (None, AnalysisOutcome::Disabled),
        };

        enter(EvaluationStage::Finalizing);
        let total_score = round_score(self.policy.combine(objective_score, qualitative_score));
        let passed = total_score >= challenge.passing_score;
        let feedback = build_feedback(
            challenge,
            &tests.results,
            options,
            &analysis,
            total_score,
            passed,
        );

        Ok(EvaluationRecord {
            submission_id: submission.submission_id,
            challenge_id: challenge.challenge_id.clone(),
            user_id: submission.user_id.clone(),
            language: language_config.name.clone(),
            test_results: tests
                .results
                .into_iter()
                .map(ExecutionResult::redacted)
                .collect(),
            objective_score,
            qualitative_score,
            total_score,
            passed,
            feedback,
            evaluated_at: Utc::now(),
        })
    }

    fn check_preconditions(
        &self,
        challenge: &Challenge,
        source_code: &str,
        options: &EvaluationOptions,
    ) -> Result<(), EvaluationError> {
        let report = validate_challenge(challenge, &self.validation);
        let mut violations = report.errors;
        if options.timeout_ms == 0 {
            violations.push("timeout_ms must be greater than 0".to_string());
        }
        if options.memory_limit_mb == 0 {
            violations.push("memory_limit_mb must be greater than 0".to_string());
        }
        if options.timeout_ms > self.limits.max_timeout_ms {
            violations.push(format!(
                "timeout_ms {} exceeds the ceiling of {}",
                options.timeout_ms, self.limits.max_timeout_ms
            ));
        }
        if options.memory_limit_mb > self.limits.max_memory_mb {
            violations.push(format!(
                "memory_limit_mb {} exceeds the ceiling of {}",
                options.memory_limit_mb, self.limits.max_memory_mb
            ));
        }
        if !violations.is_empty() {
            return Err(EvaluationError::Validation { violations });
        }

        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(EvaluationError::InvalidSubmission(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        Ok(())
    }
}

fn enter(stage: EvaluationStage) {
    info!(stage = %stage, "Evaluation stage");
}

enum AnalysisOutcome {
    Available(AiAnalysis),
    Unavailable,
    Disabled,
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= FEEDBACK_OUTPUT_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(FEEDBACK_OUTPUT_PREVIEW_CHARS).collect();
    format!("{}...", cut)
}

fn describe_failure(
    challenge: &Challenge,
    result: &ExecutionResult,
    options: &EvaluationOptions,
) -> String {
    let number = result.test_case_index + 1;
    let label = challenge
        .test_cases
        .get(result.test_case_index)
        .filter(|tc| !tc.description.trim().is_empty())
        .map(|tc| format!("Test case {} ({})", number, tc.description.trim()))
        .unwrap_or_else(|| format!("Test case {}", number));

    match result.failure_kind {
        FailureKind::OutputMismatch => {
            let expected = challenge
                .test_cases
                .get(result.test_case_index)
                .map(|tc| preview(&tc.expected_output))
                .unwrap_or_default();
            format!(
                "{}: wrong answer, expected \"{}\" but got \"{}\"",
                label,
                expected,
                preview(&result.actual_output)
            )
        }
        FailureKind::Timeout => format!(
            "{}: exceeded the time limit of {} ms",
            label, options.timeout_ms
        ),
        FailureKind::MemoryExceeded => format!(
            "{}: exceeded the memory limit of {} MB",
            label, options.memory_limit_mb
        ),
        FailureKind::RuntimeError => match &result.error_summary {
            Some(summary) => format!("{}: runtime error: {}", label, summary),
            None => format!("{}: the program exited with an error", label),
        },
        FailureKind::None => format!("{}: passed", label),
    }
}

fn build_feedback(
    challenge: &Challenge,
    results: &[ExecutionResult],
    options: &EvaluationOptions,
    analysis: &AnalysisOutcome,
    total_score: f64,
    passed: bool,
) -> Vec<String> {
    let mut feedback: Vec<String> = results
        .iter()
        .filter(|r| !r.is_hidden && !r.passed)
        .map(|r| describe_failure(challenge, r, options))
        .collect();

    if let Some((hidden_passed, hidden_total)) = hidden_summary(results) {
        feedback.push(format!(
            "Hidden tests: {}/{} passed",
            hidden_passed, hidden_total
        ));
    }

    if options.strict_mode && results.iter().any(|r| r.failure_kind.is_execution_fault()) {
        feedback.push(
            "Strict mode: a timeout, memory breach or runtime error sets the test score to 0"
                .to_string(),
        );
    }

    match analysis {
        AnalysisOutcome::Available(analysis) => {
            feedback.extend(
                analysis
                    .suggestions
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| format!("Suggestion: {}", s.trim())),
            );
        }
        AnalysisOutcome::Unavailable => {
            feedback.push(
                "Code analysis was unavailable; the score is based on test results only"
                    .to_string(),
            );
        }
        AnalysisOutcome::Disabled => {}
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let verdict = if passed {
        format!(
            "Passed with a score of {:.2} (passing score {:.0})",
            total_score, challenge.passing_score
        )
    } else {
        format!(
            "Not passed: score {:.2} is below the passing score of {:.0}",
            total_score, challenge.passing_score
        )
    };
    feedback.push(format!(
        "{}; {}/{} test cases passed",
        verdict,
        passed_count,
        results.len()
    ));

    feedback
}
