use serde::{Deserialize, Serialize};

/// Challenge-level analytics derived from evaluation records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeMetrics {
    pub challenge_id: String,
    pub participant_count: u64,
    pub submission_count: u64,
    pub passed_count: u64,
    pub average_score: f64,
    pub success_rate: f64,
}

impl ChallengeMetrics {
    pub fn new(challenge_id: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            ..Default::default()
        }
    }

    /// Fold one evaluated submission into the running aggregates
    pub fn record(&mut self, total_score: f64, passed: bool) {
        self.submission_count += 1;
        if passed {
            self.passed_count += 1;
        }

        let n = self.submission_count as f64;
        self.average_score += (total_score - self.average_score) / n;
        self.success_rate = self.passed_count as f64 / n;
    }
}
