// Test doubles for the sandbox and analyzer seams
use crate::analysis::{AiAnalysis, AnalysisRequest, AnalysisUnavailable, CodeAnalyzer};
use crate::engine::{CancelSignal, RawExecution, Sandbox, SandboxError, SandboxRequest};
use async_trait::async_trait;
use gauntlet_common::languages::{LanguageConfig, LanguageRegistry};
use gauntlet_common::types::{Challenge, Criterion, Difficulty, TestCase, CHALLENGE_SCHEMA_VERSION};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn python() -> LanguageConfig {
    LanguageConfig {
        name: "python".to_string(),
        version: "3.12".to_string(),
        image: "python:3.12-slim".to_string(),
        source_file: "main.py".to_string(),
        compile_command: None,
        run_command: "python3 -u main.py".to_string(),
        cpu_limit: 0.5,
    }
}

pub fn registry() -> LanguageRegistry {
    LanguageRegistry::from_configs(vec![python()]).unwrap()
}

pub fn test_case(input: &str, expected: &str, weight: f64, is_hidden: bool) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected.to_string(),
        is_hidden,
        weight,
        description: format!("input {}", input),
    }
}

pub fn criterion(id: &str, name: &str, weight: f64) -> Criterion {
    Criterion {
        criteria_id: id.to_string(),
        name: name.to_string(),
        weight,
        max_score: 100.0,
        description: String::new(),
    }
}

/// A valid challenge: sum two integers, one visible and one hidden case
pub fn sample_challenge() -> Challenge {
    Challenge {
        schema_version: CHALLENGE_SCHEMA_VERSION,
        challenge_id: "sum-two".to_string(),
        title: "Sum two integers".to_string(),
        description: "Read two integers separated by a space from stdin and print their sum."
            .to_string(),
        prompt: "Write a program that prints the sum of two integers.".to_string(),
        difficulty: Some(Difficulty::Beginner),
        skills_targeted: BTreeSet::from(["arithmetic".to_string()]),
        test_cases: vec![
            test_case("2 3", "5", 0.5, false),
            test_case("10 -4", "6", 0.5, true),
        ],
        evaluation_criteria: vec![
            criterion("correctness", "Correctness", 0.6),
            criterion("quality", "Code Quality", 0.4),
        ],
        time_limit_seconds: 600,
        estimated_duration_minutes: 10,
        prerequisites: vec![],
        is_active: true,
        passing_score: 60.0,
    }
}

#[derive(Clone)]
enum Scripted {
    Run(RawExecution),
    Reject(String),
    Infrastructure,
    /// Block until cancelled
    Hang,
}

/// Sandbox whose behavior is keyed on the stdin payload.
/// Unscripted inputs exit 0 with empty output.
#[derive(Default)]
pub struct ScriptedSandbox {
    script: HashMap<String, Scripted>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn output(mut self, input: &str, stdout: &str) -> Self {
        self.script.insert(
            input.to_string(),
            Scripted::Run(RawExecution {
                stdout: stdout.to_string(),
                exit_code: Some(0),
                execution_time_ms: 5,
                ..Default::default()
            }),
        );
        self
    }

    pub fn crash(mut self, input: &str, stderr: &str) -> Self {
        self.script.insert(
            input.to_string(),
            Scripted::Run(RawExecution {
                stderr: stderr.to_string(),
                exit_code: Some(1),
                execution_time_ms: 5,
                ..Default::default()
            }),
        );
        self
    }

    pub fn timeout(mut self, input: &str) -> Self {
        self.script.insert(
            input.to_string(),
            Scripted::Run(RawExecution {
                timed_out: true,
                execution_time_ms: 5000,
                ..Default::default()
            }),
        );
        self
    }

    pub fn out_of_memory(mut self, input: &str) -> Self {
        self.script.insert(
            input.to_string(),
            Scripted::Run(RawExecution {
                exit_code: Some(137),
                memory_exceeded: true,
                execution_time_ms: 40,
                ..Default::default()
            }),
        );
        self
    }

    pub fn reject_input(mut self, input: &str, reason: &str) -> Self {
        self.script
            .insert(input.to_string(), Scripted::Reject(reason.to_string()));
        self
    }

    pub fn infrastructure_failure_on(mut self, input: &str) -> Self {
        self.script.insert(input.to_string(), Scripted::Infrastructure);
        self
    }

    pub fn hang_on(mut self, input: &str) -> Self {
        self.script.insert(input.to_string(), Scripted::Hang);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(
        &self,
        request: SandboxRequest<'_>,
        mut cancel: CancelSignal,
    ) -> Result<RawExecution, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            }
        }

        match self.script.get(request.stdin).cloned() {
            Some(Scripted::Run(raw)) => Ok(raw),
            Some(Scripted::Reject(reason)) => Err(SandboxError::Rejected(reason)),
            Some(Scripted::Infrastructure) => Err(SandboxError::Infrastructure(
                "docker daemon went away".to_string(),
            )),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(SandboxError::Cancelled)
            }
            None => Ok(RawExecution {
                exit_code: Some(0),
                execution_time_ms: 1,
                ..Default::default()
            }),
        }
    }
}

/// Analyzer returning a fixed analysis, optionally after a delay
pub struct StaticAnalyzer {
    analysis: AiAnalysis,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl StaticAnalyzer {
    pub fn new(code_quality: f64, efficiency: f64, best_practices: f64) -> Self {
        Self {
            analysis: AiAnalysis {
                code_quality,
                efficiency,
                best_practices,
                suggestions: vec!["Consider descriptive variable names".to_string()],
            },
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(80.0, 80.0, 80.0)
        }
    }
}

#[async_trait]
impl CodeAnalyzer for StaticAnalyzer {
    async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<AiAnalysis, AnalysisUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.analysis.clone())
    }
}

pub struct FailingAnalyzer;

#[async_trait]
impl CodeAnalyzer for FailingAnalyzer {
    async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<AiAnalysis, AnalysisUnavailable> {
        Err(AnalysisUnavailable::Request("connection refused".to_string()))
    }
}
