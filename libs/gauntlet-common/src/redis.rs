use crate::types::SubmissionJob;
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only semantics, not runtime logic
/// Ensures API and worker never drift and Redis keys are deterministic

pub const QUEUE_NAME: &str = "gauntlet:queue:submissions";
pub const CHALLENGE_PREFIX: &str = "gauntlet:challenge";
pub const SUBMISSION_PREFIX: &str = "gauntlet:submission";
pub const METRICS_PREFIX: &str = "gauntlet:metrics";
pub const PARTICIPANTS_PREFIX: &str = "gauntlet:participants";

/// Generate challenge document key
pub fn challenge_key(challenge_id: &str) -> String {
    format!("{}:{}", CHALLENGE_PREFIX, challenge_id)
}

/// Generate submission record key
pub fn submission_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, submission_id)
}

/// Generate challenge metrics key
pub fn metrics_key(challenge_id: &str) -> String {
    format!("{}:{}", METRICS_PREFIX, challenge_id)
}

/// Generate the key of the set of users who submitted to a challenge
pub fn participants_key(challenge_id: &str) -> String {
    format!("{}:{}", PARTICIPANTS_PREFIX, challenge_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Push a submission onto the evaluation queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &SubmissionJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.rpush(QUEUE_NAME, payload).await
}

/// Pop a submission from the evaluation queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_NAME, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: SubmissionJob = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}
