/// Test Runner - One Test Case, One Result
///
/// **Core Responsibility:**
/// Run the submission against a single test case and turn the raw
/// execution into an `ExecutionResult`.
///
/// **Classification Precedence:**
/// 1. Timeout
/// 2. Memory exceeded
/// 3. Runtime error (non-zero exit, compile failure, rejected request)
/// 4. Output comparison after normalization
///
/// **Normalization Rules (Applied to All Languages):**
/// - Line endings: `\r\n` and `\r` become `\n`
/// - Trailing whitespace on every line is ignored
/// - Leading and trailing whitespace of the whole output is ignored
/// - Case sensitivity: YES (exact match required)
/// - Internal whitespace within a line: preserved
///
/// Sandbox infrastructure failures and cancellation are returned as errors,
/// never recorded as a learner's failed test.

use crate::engine::{CancelSignal, RawExecution, Sandbox, SandboxError, SandboxRequest};
use gauntlet_common::languages::LanguageConfig;
use gauntlet_common::types::{EvaluationOptions, ExecutionResult, FailureKind, TestCase};
use tracing::debug;

const ERROR_SUMMARY_MAX_CHARS: usize = 200;

/// Normalize output string for comparison
pub fn normalize_output(output: &str) -> String {
    let unified = output.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}

fn first_stderr_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(ERROR_SUMMARY_MAX_CHARS).collect())
}

/// Decide pass/fail for one raw execution
pub fn classify(raw: &RawExecution, test_case: &TestCase) -> (bool, FailureKind) {
    if raw.timed_out {
        return (false, FailureKind::Timeout);
    }
    if raw.memory_exceeded {
        return (false, FailureKind::MemoryExceeded);
    }
    if raw.exit_code != Some(0) {
        return (false, FailureKind::RuntimeError);
    }
    if normalize_output(&raw.stdout) == normalize_output(&test_case.expected_output) {
        (true, FailureKind::None)
    } else {
        (false, FailureKind::OutputMismatch)
    }
}

fn into_result(index: usize, test_case: &TestCase, raw: RawExecution) -> ExecutionResult {
    let (passed, failure_kind) = classify(&raw, test_case);
    let error_summary = if failure_kind == FailureKind::RuntimeError {
        first_stderr_line(&raw.stderr)
    } else {
        None
    };

    ExecutionResult {
        test_case_index: index,
        passed,
        actual_output: raw.stdout,
        execution_time_ms: raw.execution_time_ms,
        failure_kind,
        is_hidden: test_case.is_hidden,
        error_summary,
    }
}

/// Execute one test case in the sandbox
pub async fn run_test_case(
    sandbox: &dyn Sandbox,
    language: &LanguageConfig,
    source_code: &str,
    index: usize,
    test_case: &TestCase,
    options: &EvaluationOptions,
    cancel: CancelSignal,
) -> Result<ExecutionResult, SandboxError> {
    let request = SandboxRequest {
        language,
        source_code,
        stdin: &test_case.input,
        timeout_ms: options.timeout_ms,
        memory_limit_mb: options.memory_limit_mb,
    };

    match sandbox.execute(request, cancel).await {
        Ok(raw) => {
            let result = into_result(index, test_case, raw);
            debug!(
                test_case_index = index,
                passed = result.passed,
                failure_kind = ?result.failure_kind,
                execution_time_ms = result.execution_time_ms,
                "Test case executed"
            );
            Ok(result)
        }
        // A request the sandbox refuses is the submission's fault
        Err(SandboxError::Rejected(reason)) => Ok(ExecutionResult {
            test_case_index: index,
            passed: false,
            actual_output: String::new(),
            execution_time_ms: 0,
            failure_kind: FailureKind::RuntimeError,
            is_hidden: test_case.is_hidden,
            error_summary: Some(reason),
        }),
        Err(e) => Err(e),
    }
}
