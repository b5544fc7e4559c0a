// Worker configuration: environment settings and scoring policy
use anyhow::{Context, Result};
use gauntlet_common::languages::DEFAULT_LANGUAGES_PATH;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::analysis::AnalyzerConfig;

/// Read an environment variable, falling back to `default` when unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

/// How objective and qualitative signals combine into the final score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub objective_weight: f64,
    pub qualitative_weight: f64,
    /// Stand-in for criteria the AI analysis has no metric for
    pub neutral_signal: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            objective_weight: 0.7,
            qualitative_weight: 0.3,
            neutral_signal: 50.0,
        }
    }
}

impl ScoringPolicy {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Self {
            objective_weight: env_or("OBJECTIVE_WEIGHT", defaults.objective_weight)?,
            qualitative_weight: env_or("QUALITATIVE_WEIGHT", defaults.qualitative_weight)?,
            neutral_signal: env_or("NEUTRAL_SIGNAL", defaults.neutral_signal)?,
        }
        .checked()
    }

    fn checked(self) -> Result<Self> {
        let finite = self.objective_weight.is_finite()
            && self.qualitative_weight.is_finite()
            && self.neutral_signal.is_finite();
        if !finite {
            anyhow::bail!("OBJECTIVE_WEIGHT, QUALITATIVE_WEIGHT and NEUTRAL_SIGNAL must be finite numbers");
        }
        if self.objective_weight < 0.0
            || self.qualitative_weight < 0.0
            || self.objective_weight + self.qualitative_weight <= 0.0
        {
            anyhow::bail!("OBJECTIVE_WEIGHT and QUALITATIVE_WEIGHT must be non-negative and not both zero");
        }
        if !(0.0..=100.0).contains(&self.neutral_signal) {
            anyhow::bail!("NEUTRAL_SIGNAL must be between 0 and 100");
        }
        Ok(self)
    }

    /// Final 0-100 score; without a qualitative score the objective score stands alone
    pub fn combine(&self, objective: f64, qualitative: Option<f64>) -> f64 {
        let total = match qualitative {
            Some(q) => {
                (self.objective_weight * objective + self.qualitative_weight * q)
                    / (self.objective_weight + self.qualitative_weight)
            }
            None => objective,
        };
        total.clamp(0.0, 100.0)
    }
}

/// Operator ceilings on the per-evaluation sandbox limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_timeout_ms: u64,
    pub max_memory_mb: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_timeout_ms: 30_000,
            max_memory_mb: 2048,
        }
    }
}

impl SandboxLimits {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let limits = Self {
            max_timeout_ms: env_or("MAX_TIMEOUT_MS", defaults.max_timeout_ms)?,
            max_memory_mb: env_or("MAX_MEMORY_MB", defaults.max_memory_mb)?,
        };
        if limits.max_timeout_ms == 0 || limits.max_memory_mb == 0 {
            anyhow::bail!("MAX_TIMEOUT_MS and MAX_MEMORY_MB must be at least 1");
        }
        Ok(limits)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub languages_path: PathBuf,
    /// Size of the sandbox pool shared by every evaluation in this process
    pub max_parallel_sandboxes: usize,
    pub analysis: Option<AnalyzerConfig>,
    pub analysis_timeout: Duration,
    pub policy: ScoringPolicy,
    pub limits: SandboxLimits,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let max_parallel_sandboxes: usize = env_or("MAX_PARALLEL_SANDBOXES", 4)?;
        if max_parallel_sandboxes == 0 {
            anyhow::bail!("MAX_PARALLEL_SANDBOXES must be at least 1");
        }

        Ok(Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379".to_string())?,
            languages_path: env_or("LANGUAGES_CONFIG", PathBuf::from(DEFAULT_LANGUAGES_PATH))?,
            max_parallel_sandboxes,
            analysis: AnalyzerConfig::from_env(),
            analysis_timeout: Duration::from_secs(env_or("AI_TIMEOUT_SECS", 25)?),
            policy: ScoringPolicy::from_env()?,
            limits: SandboxLimits::from_env()?,
        })
    }
}
