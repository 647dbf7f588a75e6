use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{now_rfc3339, PushJob, PushQueue};
use crate::error::QueueError;

/// Redis list consumed by the push worker. Jobs are JSON strings, `LPUSH`ed.
#[derive(Clone)]
pub struct RedisPushQueue {
    conn: MultiplexedConnection,
    queue_key: String,
}

impl RedisPushQueue {
    pub async fn connect(redis_url: &str, queue_key: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::from_connection(conn, queue_key))
    }

    pub fn from_connection(conn: MultiplexedConnection, queue_key: &str) -> Self {
        Self {
            conn,
            queue_key: queue_key.to_string(),
        }
    }
}

#[async_trait]
impl PushQueue for RedisPushQueue {
    async fn enqueue(&self, mut job: PushJob) -> Result<PushJob, QueueError> {
        job.created_at = Some(now_rfc3339());
        let payload = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;

        tracing::debug!(
            user_id = %job.user_id,
            queue = %self.queue_key,
            "Push job enqueued"
        );
        Ok(job)
    }

    async fn peek_pending(&self, n: usize) -> Result<Vec<PushJob>, QueueError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.queue_key)
            .arg(0)
            .arg(n as i64 - 1)
            .query_async::<_, Vec<String>>(&mut conn)
            .await?;

        items
            .iter()
            .map(|raw| serde_json::from_str::<PushJob>(raw).map_err(QueueError::from))
            .collect()
    }
}
