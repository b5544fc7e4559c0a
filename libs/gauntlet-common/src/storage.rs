//! Persistence capability used by the services around the evaluation engine.
//!
//! The engine itself never touches storage: the API and worker receive a
//! `Storage` implementation and persist what the engine returns.

use crate::redis as keys;
use crate::stats::ChallengeMetrics;
use crate::types::{Challenge, EvaluationRecord, SubmissionRecord, SubmissionStatus};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("submission {0} already exists")]
    DuplicateSubmission(Uuid),

    #[error("submission {0} already has an evaluation record")]
    AlreadyEvaluated(Uuid),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace a challenge document
    async fn put_challenge(&self, challenge: &Challenge) -> Result<(), StorageError>;

    async fn get_challenge(&self, challenge_id: &str) -> Result<Option<Challenge>, StorageError>;

    async fn create_submission_record(&self, record: &SubmissionRecord) -> Result<(), StorageError>;

    /// Attach the evaluation record to its submission. Succeeds at most once
    /// per submission.
    async fn update_submission_results(&self, evaluation: &EvaluationRecord)
        -> Result<(), StorageError>;

    /// Record a terminal non-evaluated outcome (rejected or failed)
    async fn mark_submission(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
        errors: Vec<String>,
    ) -> Result<(), StorageError>;

    async fn get_submission(&self, submission_id: &Uuid)
        -> Result<Option<SubmissionRecord>, StorageError>;

    /// Returns true when the user is a new participant for the challenge
    async fn increment_participant_count(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> Result<bool, StorageError>;

    async fn update_challenge_metrics(
        &self,
        challenge_id: &str,
        total_score: f64,
        passed: bool,
    ) -> Result<(), StorageError>;

    async fn challenge_metrics(&self, challenge_id: &str) -> Result<ChallengeMetrics, StorageError>;
}

/// In-memory implementation for tests and local runs
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    challenges: HashMap<String, Challenge>,
    submissions: HashMap<Uuid, SubmissionRecord>,
    metrics: HashMap<String, ChallengeMetrics>,
    participants: HashMap<String, HashSet<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_challenge(&self, challenge: &Challenge) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner
            .challenges
            .insert(challenge.challenge_id.clone(), challenge.clone());
        Ok(())
    }

    async fn get_challenge(&self, challenge_id: &str) -> Result<Option<Challenge>, StorageError> {
        Ok(self.inner.read().await.challenges.get(challenge_id).cloned())
    }

    async fn create_submission_record(&self, record: &SubmissionRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.submissions.contains_key(&record.submission_id) {
            return Err(StorageError::DuplicateSubmission(record.submission_id));
        }
        inner.submissions.insert(record.submission_id, record.clone());
        Ok(())
    }

    async fn update_submission_results(
        &self,
        evaluation: &EvaluationRecord,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .submissions
            .get_mut(&evaluation.submission_id)
            .ok_or(StorageError::SubmissionNotFound(evaluation.submission_id))?;
        if record.evaluation.is_some() {
            return Err(StorageError::AlreadyEvaluated(evaluation.submission_id));
        }
        record.status = SubmissionStatus::Evaluated;
        record.evaluation = Some(evaluation.clone());
        Ok(())
    }

    async fn mark_submission(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
        errors: Vec<String>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .submissions
            .get_mut(submission_id)
            .ok_or(StorageError::SubmissionNotFound(*submission_id))?;
        if record.evaluation.is_some() {
            return Err(StorageError::AlreadyEvaluated(*submission_id));
        }
        record.status = status;
        record.errors = errors;
        Ok(())
    }

    async fn get_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        Ok(self.inner.read().await.submissions.get(submission_id).cloned())
    }

    async fn increment_participant_count(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        let added = inner
            .participants
            .entry(challenge_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(added)
    }

    async fn update_challenge_metrics(
        &self,
        challenge_id: &str,
        total_score: f64,
        passed: bool,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner
            .metrics
            .entry(challenge_id.to_string())
            .or_insert_with(|| ChallengeMetrics::new(challenge_id))
            .record(total_score, passed);
        Ok(())
    }

    async fn challenge_metrics(&self, challenge_id: &str) -> Result<ChallengeMetrics, StorageError> {
        let inner = self.inner.read().await;
        let mut metrics = inner
            .metrics
            .get(challenge_id)
            .cloned()
            .unwrap_or_else(|| ChallengeMetrics::new(challenge_id));
        metrics.participant_count = inner
            .participants
            .get(challenge_id)
            .map(|users| users.len() as u64)
            .unwrap_or(0);
        Ok(metrics)
    }
}

/// Redis-backed implementation shared by the API and the worker
///
/// Evaluation records live under their own key written with SET NX, which
/// makes "one record per submission" hold even with concurrent writers.
#[derive(Clone)]
pub struct RedisStorage {
    conn: redis::aio::ConnectionManager,
}

impl RedisStorage {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn evaluation_key(submission_id: &Uuid) -> String {
        format!("{}:evaluation", keys::submission_key(submission_id))
    }

    async fn load_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(keys::submission_key(submission_id)).await?;
        payload
            .map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn save_submission(&self, record: &SubmissionRecord) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let _: () = conn
            .set(keys::submission_key(&record.submission_id), payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn put_challenge(&self, challenge: &Challenge) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(challenge)?;
        let _: () = conn
            .set(keys::challenge_key(&challenge.challenge_id), payload)
            .await?;
        Ok(())
    }

    async fn get_challenge(&self, challenge_id: &str) -> Result<Option<Challenge>, StorageError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(keys::challenge_key(challenge_id)).await?;
        payload
            .map(|data| serde_json::from_str(&data))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn create_submission_record(&self, record: &SubmissionRecord) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let created: bool = conn
            .set_nx(keys::submission_key(&record.submission_id), payload)
            .await?;
        if !created {
            return Err(StorageError::DuplicateSubmission(record.submission_id));
        }
        Ok(())
    }

    async fn update_submission_results(
        &self,
        evaluation: &EvaluationRecord,
    ) -> Result<(), StorageError> {
        let mut record = self
            .load_submission(&evaluation.submission_id)
            .await?
            .ok_or(StorageError::SubmissionNotFound(evaluation.submission_id))?;

        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(evaluation)?;
        let stored: bool = conn
            .set_nx(Self::evaluation_key(&evaluation.submission_id), payload)
            .await?;
        if !stored {
            warn!(submission_id = %evaluation.submission_id, "Evaluation already recorded");
            return Err(StorageError::AlreadyEvaluated(evaluation.submission_id));
        }

        record.status = SubmissionStatus::Evaluated;
        self.save_submission(&record).await
    }

    async fn mark_submission(
        &self,
        submission_id: &Uuid,
        status: SubmissionStatus,
        errors: Vec<String>,
    ) -> Result<(), StorageError> {
        let mut record = self
            .load_submission(submission_id)
            .await?
            .ok_or(StorageError::SubmissionNotFound(*submission_id))?;
        if record.status == SubmissionStatus::Evaluated {
            return Err(StorageError::AlreadyEvaluated(*submission_id));
        }
        record.status = status;
        record.errors = errors;
        self.save_submission(&record).await
    }

    async fn get_submission(
        &self,
        submission_id: &Uuid,
    ) -> Result<Option<SubmissionRecord>, StorageError> {
        let Some(mut record) = self.load_submission(submission_id).await? else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let evaluation: Option<String> = conn.get(Self::evaluation_key(submission_id)).await?;
        if let Some(data) = evaluation {
            record.evaluation = Some(serde_json::from_str(&data)?);
            record.status = SubmissionStatus::Evaluated;
        }
        Ok(Some(record))
    }

    async fn increment_participant_count(
        &self,
        challenge_id: &str,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(keys::participants_key(challenge_id), user_id).await?;
        Ok(added > 0)
    }

    async fn update_challenge_metrics(
        &self,
        challenge_id: &str,
        total_score: f64,
        passed: bool,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let key = keys::metrics_key(challenge_id);
        let _: () = redis::pipe()
            .atomic()
            .hincr(&key, "submission_count", 1i64)
            .ignore()
            .hincr(&key, "passed_count", if passed { 1i64 } else { 0i64 })
            .ignore()
            .hincr(&key, "score_sum", total_score)
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!(challenge_id, total_score, passed, "Challenge metrics updated");
        Ok(())
    }

    async fn challenge_metrics(&self, challenge_id: &str) -> Result<ChallengeMetrics, StorageError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::metrics_key(challenge_id)).await?;
        let participants: u64 = conn.scard(keys::participants_key(challenge_id)).await?;

        let read = |name: &str| -> f64 {
            fields
                .get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let submission_count = read("submission_count") as u64;
        let passed_count = read("passed_count") as u64;
        let score_sum = read("score_sum");

        let (average_score, success_rate) = if submission_count > 0 {
            (
                score_sum / submission_count as f64,
                passed_count as f64 / submission_count as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(ChallengeMetrics {
            challenge_id: challenge_id.to_string(),
            participant_count: participants,
            submission_count,
            passed_count,
            average_score,
            success_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission(challenge_id: &str, user_id: &str) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: Uuid::new_v4(),
            challenge_id: challenge_id.to_string(),
            user_id: user_id.to_string(),
            language: "python".to_string(),
            status: SubmissionStatus::Queued,
            created_at: Utc::now(),
            evaluation: None,
            errors: vec![],
        }
    }

    fn evaluation(record: &SubmissionRecord, total: f64) -> EvaluationRecord {
        EvaluationRecord {
            submission_id: record.submission_id,
            challenge_id: record.challenge_id.clone(),
            user_id: record.user_id.clone(),
            language: record.language.clone(),
            test_results: vec![],
            objective_score: total,
            qualitative_score: None,
            total_score: total,
            passed: total >= 60.0,
            feedback: vec![],
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_evaluation_record_is_write_once() {
        let storage = MemoryStorage::new();
        let record = submission("c1", "alice");
        storage.create_submission_record(&record).await.unwrap();

        storage
            .update_submission_results(&evaluation(&record, 70.0))
            .await
            .unwrap();
        let second = storage
            .update_submission_results(&evaluation(&record, 90.0))
            .await;

        assert!(matches!(second, Err(StorageError::AlreadyEvaluated(_))));
        let stored = storage
            .get_submission(&record.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubmissionStatus::Evaluated);
        assert_eq!(stored.evaluation.unwrap().total_score, 70.0);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let storage = MemoryStorage::new();
        let record = submission("c1", "alice");
        storage.create_submission_record(&record).await.unwrap();

        let again = storage.create_submission_record(&record).await;

        assert!(matches!(again, Err(StorageError::DuplicateSubmission(_))));
    }

    #[tokio::test]
    async fn test_results_for_unknown_submission() {
        let storage = MemoryStorage::new();
        let record = submission("c1", "alice");

        let result = storage
            .update_submission_results(&evaluation(&record, 50.0))
            .await;

        assert!(matches!(result, Err(StorageError::SubmissionNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_rejected() {
        let storage = MemoryStorage::new();
        let record = submission("c1", "alice");
        storage.create_submission_record(&record).await.unwrap();

        storage
            .mark_submission(
                &record.submission_id,
                SubmissionStatus::Rejected,
                vec!["Missing required field: description".to_string()],
            )
            .await
            .unwrap();

        let stored = storage
            .get_submission(&record.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubmissionStatus::Rejected);
        assert_eq!(stored.errors.len(), 1);
        assert!(stored.evaluation.is_none());
    }

    #[tokio::test]
    async fn test_participants_are_unique_users() {
        let storage = MemoryStorage::new();

        assert!(storage.increment_participant_count("c1", "alice").await.unwrap());
        assert!(!storage.increment_participant_count("c1", "alice").await.unwrap());
        assert!(storage.increment_participant_count("c1", "bob").await.unwrap());
        storage.update_challenge_metrics("c1", 80.0, true).await.unwrap();
        storage.update_challenge_metrics("c1", 40.0, false).await.unwrap();

        let metrics = storage.challenge_metrics("c1").await.unwrap();
        assert_eq!(metrics.participant_count, 2);
        assert_eq!(metrics.submission_count, 2);
        assert!((metrics.average_score - 60.0).abs() < 1e-9);
        assert!((metrics.success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_challenge_metrics_are_zero() {
        let storage = MemoryStorage::new();
        let metrics = storage.challenge_metrics("nope").await.unwrap();
        assert_eq!(metrics, ChallengeMetrics::new("nope"));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_storage_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let storage = RedisStorage::new(conn);
        let record = submission(&format!("c-{}", Uuid::new_v4()), "alice");

        storage.create_submission_record(&record).await.unwrap();
        storage
            .update_submission_results(&evaluation(&record, 75.0))
            .await
            .unwrap();
        assert!(storage
            .update_submission_results(&evaluation(&record, 10.0))
            .await
            .is_err());
        storage
            .update_challenge_metrics(&record.challenge_id, 75.0, true)
            .await
            .unwrap();
        storage
            .increment_participant_count(&record.challenge_id, "alice")
            .await
            .unwrap();

        let stored = storage
            .get_submission(&record.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.evaluation.unwrap().total_score, 75.0);
        let metrics = storage.challenge_metrics(&record.challenge_id).await.unwrap();
        assert_eq!(metrics.submission_count, 1);
        assert_eq!(metrics.participant_count, 1);
    }
}
