/// Test-Case Scorer - Weighted Objective Score
///
/// **Core Responsibility:**
/// Run every test case of a challenge through the runner and aggregate the
/// results into a 0-100 objective score.
///
/// **Critical Properties:**
/// - Knows nothing about Docker (talks to a `Sandbox`)
/// - Knows nothing about Redis
/// - Scoring itself is a pure function of (test cases, results, strict mode)
///
/// **Scoring Rules:**
/// - objective = 100 * sum(weight of passed cases) / sum(all weights)
/// - A zero weight sum scores 0
/// - Strict mode: any timeout, memory breach or runtime error scores 0
/// - Hidden cases count fully toward the score
///
/// **Concurrency:**
/// Executions are dispatched concurrently but each one must first take a
/// permit from the process-wide sandbox pool. Results are restored to
/// test case order. On an infrastructure error the remaining executions are
/// cancelled and the error propagates.

use crate::engine::{CancelSignal, Sandbox, SandboxError};
use crate::runner::run_test_case;
use futures_util::stream::{FuturesUnordered, StreamExt};
use gauntlet_common::languages::LanguageConfig;
use gauntlet_common::types::{EvaluationOptions, ExecutionResult, TestCase};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TestScore {
    /// One result per test case, in test case order
    pub results: Vec<ExecutionResult>,
    pub objective_score: f64,
}

/// Round a 0-100 score to two decimals
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Weighted objective score over already-classified results
pub fn objective_score(test_cases: &[TestCase], results: &[ExecutionResult], strict: bool) -> f64 {
    if strict && results.iter().any(|r| r.failure_kind.is_execution_fault()) {
        return 0.0;
    }

    let total_weight: f64 = test_cases.iter().map(|tc| tc.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let earned: f64 = results
        .iter()
        .filter(|r| r.passed)
        .filter_map(|r| test_cases.get(r.test_case_index))
        .map(|tc| tc.weight)
        .sum();

    round_score((100.0 * earned / total_weight).clamp(0.0, 100.0))
}

/// Aggregate pass count for hidden cases: (passed, total), None without hidden cases
pub fn hidden_summary(results: &[ExecutionResult]) -> Option<(usize, usize)> {
    let hidden: Vec<&ExecutionResult> = results.iter().filter(|r| r.is_hidden).collect();
    if hidden.is_empty() {
        return None;
    }
    let passed = hidden.iter().filter(|r| r.passed).count();
    Some((passed, hidden.len()))
}

/// Run all test cases and compute the objective score
pub async fn score_tests(
    sandbox: &dyn Sandbox,
    pool: &Semaphore,
    language: &LanguageConfig,
    source_code: &str,
    test_cases: &[TestCase],
    options: &EvaluationOptions,
    cancel: &CancelSignal,
) -> Result<TestScore, SandboxError> {
    let (abort, signal) = cancel.child();

    let mut pending: FuturesUnordered<_> = test_cases
        .iter()
        .enumerate()
        .map(|(index, test_case)| {
            let signal = signal.clone();
            async move {
                let _permit = pool.acquire().await.map_err(|_| {
                    SandboxError::Infrastructure("sandbox pool is closed".to_string())
                })?;
                run_test_case(
                    sandbox,
                    language,
                    source_code,
                    index,
                    test_case,
                    options,
                    signal,
                )
                .await
            }
        })
        .collect();

    let mut results = Vec::with_capacity(test_cases.len());
    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(error = %e, "Aborting remaining test executions");
                abort.cancel();
                // Dropping the pending futures tears down their sandboxes
                drop(pending);
                return Err(e);
            }
        }
    }

    results.sort_by_key(|r| r.test_case_index);
    let objective_score = objective_score(test_cases, &results, options.strict_mode);

    debug!(
        passed = results.iter().filter(|r| r.passed).count(),
        total = results.len(),
        objective_score = objective_score,
        "Test cases scored"
    );

    Ok(TestScore {
        results,
        objective_score,
    })
}
