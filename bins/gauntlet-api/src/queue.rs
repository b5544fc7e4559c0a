// Submission queue seam: Redis in production, in-memory in tests
use async_trait::async_trait;
use gauntlet_common::redis as keys;
use gauntlet_common::types::SubmissionJob;
use redis::aio::ConnectionManager;
use redis::RedisResult;

#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    async fn enqueue(&self, job: &SubmissionJob) -> RedisResult<()>;
}

pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubmissionQueue for RedisQueue {
    async fn enqueue(&self, job: &SubmissionJob) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        keys::push_job(&mut conn, job).await
    }
}
