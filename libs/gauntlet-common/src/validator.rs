/// Challenge Validator - Structural Invariants for Authoring
///
/// **Core Responsibility:**
/// Decide whether a challenge is fit to publish or to evaluate against.
///
/// **Critical Properties:**
/// - Pure and synchronous: no I/O, no clock, no randomness
/// - Never fails: every problem is reported in the returned report
/// - Runs at authoring time and again before every evaluation
///
/// **Severity Levels:**
/// - Errors block publication and evaluation
/// - Warnings are quality signals, each paired with a suggestion

use crate::types::{Challenge, Difficulty};
use serde::{Deserialize, Serialize};

/// Allowed drift of a weight sum away from 1.0
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Largest test input the sandbox accepts on stdin
pub const MAX_TEST_INPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOptions {
    pub require_minimum_test_cases: usize,
    pub min_title_len: usize,
    pub min_description_len: usize,
    pub beginner_max_duration_minutes: u32,
    pub beginner_max_prerequisites: usize,
    pub expert_min_duration_minutes: u32,
    pub max_test_input_bytes: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            require_minimum_test_cases: 1,
            min_title_len: 10,
            min_description_len: 50,
            beginner_max_duration_minutes: 60,
            beginner_max_prerequisites: 2,
            expert_min_duration_minutes: 15,
            max_test_input_bytes: MAX_TEST_INPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, warning: impl Into<String>, suggestion: impl Into<String>) {
        self.warnings.push(warning.into());
        self.suggestions.push(suggestion.into());
    }
}

/// Slack for binary rounding, so sums like 0.41 + 0.3 + 0.3 land inside the band
const FLOAT_SLACK: f64 = 1e-9;

fn within_tolerance(sum: f64) -> bool {
    (sum - 1.0).abs() <= WEIGHT_TOLERANCE + FLOAT_SLACK
}

fn weight_in_range(weight: f64) -> bool {
    weight.is_finite() && weight > 0.0 && weight <= 1.0
}

/// Validate a challenge against the authoring invariants
pub fn validate_challenge(challenge: &Challenge, options: &ValidationOptions) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_required_fields(challenge, &mut report);
    check_test_cases(challenge, options, &mut report);
    check_criteria(challenge, &mut report);
    check_quality(challenge, options, &mut report);

    report.is_valid = report.errors.is_empty();
    report
}

fn check_required_fields(challenge: &Challenge, report: &mut ValidationReport) {
    if challenge.title.trim().is_empty() {
        report.error("Missing required field: title");
    }
    if challenge.description.trim().is_empty() {
        report.error("Missing required field: description");
    }
    if challenge.prompt.trim().is_empty() {
        report.error("Missing required field: prompt");
    }
    if challenge.difficulty.is_none() {
        report.error("Missing required field: difficulty");
    }
    if challenge.test_cases.is_empty() {
        report.error("Missing required field: test_cases (at least one test case is required)");
    }
    if challenge.evaluation_criteria.is_empty() {
        report.error(
            "Missing required field: evaluation_criteria (at least one criterion is required)",
        );
    }
    if !(0.0..=100.0).contains(&challenge.passing_score) {
        report.error(format!(
            "passing_score must be between 0 and 100, got {}",
            challenge.passing_score
        ));
    }
}

fn check_test_cases(
    challenge: &Challenge,
    options: &ValidationOptions,
    report: &mut ValidationReport,
) {
    let cases = &challenge.test_cases;
    if cases.is_empty() {
        return;
    }

    if cases.len() < options.require_minimum_test_cases {
        report.error(format!(
            "Challenge has {} test case(s); at least {} required",
            cases.len(),
            options.require_minimum_test_cases
        ));
    }

    for (idx, tc) in cases.iter().enumerate() {
        if !weight_in_range(tc.weight) {
            report.error(format!(
                "Test case {} weight {} is out of range (0, 1]",
                idx + 1,
                tc.weight
            ));
        }
        if tc.input.len() > options.max_test_input_bytes {
            report.error(format!(
                "Test case {} input exceeds {} bytes",
                idx + 1,
                options.max_test_input_bytes
            ));
        }
    }

    let sum: f64 = cases.iter().map(|tc| tc.weight).sum();
    if !within_tolerance(sum) {
        report.error(format!(
            "Test case weights sum to {:.3}; expected 1.0 (+/- {})",
            sum, WEIGHT_TOLERANCE
        ));
    }

    if cases.iter().all(|tc| tc.is_hidden) {
        report.error("At least one test case must be visible to the learner");
    }
}

fn check_criteria(challenge: &Challenge, report: &mut ValidationReport) {
    let criteria = &challenge.evaluation_criteria;
    if criteria.is_empty() {
        return;
    }

    for criterion in criteria {
        if !weight_in_range(criterion.weight) {
            report.error(format!(
                "Criterion '{}' weight {} is out of range (0, 1]",
                criterion.name, criterion.weight
            ));
        }
        if !(criterion.max_score.is_finite() && criterion.max_score > 0.0) {
            report.error(format!(
                "Criterion '{}' max_score must be positive",
                criterion.name
            ));
        }
    }

    let sum: f64 = criteria.iter().map(|c| c.weight).sum();
    if !within_tolerance(sum) {
        report.error(format!(
            "Evaluation criteria weights sum to {:.3}; expected 1.0 (+/- {})",
            sum, WEIGHT_TOLERANCE
        ));
    }
}

fn check_quality(challenge: &Challenge, options: &ValidationOptions, report: &mut ValidationReport) {
    let title_len = challenge.title.trim().chars().count();
    if title_len > 0 && title_len < options.min_title_len {
        report.warn(
            format!("Title is shorter than {} characters", options.min_title_len),
            "Use a descriptive title that tells learners what they will build",
        );
    }

    let description_len = challenge.description.trim().chars().count();
    if description_len > 0 && description_len < options.min_description_len {
        report.warn(
            format!(
                "Description is shorter than {} characters",
                options.min_description_len
            ),
            "Expand the description with context, constraints and an example",
        );
    }

    if !challenge.test_cases.is_empty() && !challenge.test_cases.iter().any(|tc| tc.is_hidden) {
        report.warn(
            "No hidden test cases",
            "Add at least one hidden test case to deter guessing and hard-coded answers",
        );
    }

    match challenge.difficulty {
        Some(Difficulty::Beginner) => {
            if challenge.estimated_duration_minutes > options.beginner_max_duration_minutes {
                report.warn(
                    format!(
                        "Beginner challenge estimated at {} minutes (ceiling {})",
                        challenge.estimated_duration_minutes,
                        options.beginner_max_duration_minutes
                    ),
                    "Split the challenge into smaller steps or raise its difficulty",
                );
            }
            if challenge.prerequisites.len() > options.beginner_max_prerequisites {
                report.warn(
                    format!(
                        "Beginner challenge lists {} prerequisites (at most {} expected)",
                        challenge.prerequisites.len(),
                        options.beginner_max_prerequisites
                    ),
                    "Trim prerequisites or raise the difficulty to intermediate",
                );
            }
        }
        Some(Difficulty::Expert) => {
            if challenge.estimated_duration_minutes < options.expert_min_duration_minutes {
                report.warn(
                    format!(
                        "Expert challenge estimated at only {} minutes",
                        challenge.estimated_duration_minutes
                    ),
                    "Check the duration estimate or lower the difficulty",
                );
            }
        }
        _ => {}
    }
}
