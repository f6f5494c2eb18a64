use super::model::VideoRecord;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("metadata table unavailable: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("invalid video record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Keyed store of video records.
#[async_trait]
pub trait VideoTable: Send + Sync {
    /// Inserts or replaces the record for `record.job_id`.
    async fn put(&self, record: &VideoRecord) -> Result<(), TableError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoRecord>, TableError>;

    /// Every record owned by `owner_id`, most recently updated first.
    async fn query(&self, owner_id: &str) -> Result<Vec<VideoRecord>, TableError>;

    async fn delete(&self, job_id: Uuid, owner_id: &str) -> Result<(), TableError>;
}

fn record_key(job_id: &Uuid) -> String {
    format!("video:{}", job_id)
}

fn owner_index_key(owner_id: &str) -> String {
    format!("videos:owner:{}", owner_id)
}

/// Redis-backed table: one JSON string per job plus a set of job ids per owner.
#[derive(Clone)]
pub struct VideoRepository {
    client: Client,
}

impl VideoRepository {
    pub async fn connect(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;

        // Test connection
        let _conn = client.get_multiplexed_async_connection().await?;

        info!("✅ Connected to Redis");
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl VideoTable for VideoRepository {
    async fn put(&self, record: &VideoRecord) -> Result<(), TableError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn().await?;

        let _: () = conn.set(record_key(&record.job_id), payload).await?;
        let _: () = conn
            .sadd(owner_index_key(&record.owner_id), record.job_id.to_string())
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoRecord>, TableError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(record_key(&job_id)).await?;
        Ok(payload
            .map(|payload| serde_json::from_str::<VideoRecord>(&payload))
            .transpose()?)
    }

    async fn query(&self, owner_id: &str) -> Result<Vec<VideoRecord>, TableError> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.smembers(owner_index_key(owner_id)).await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(job_id) = Uuid::parse_str(&id) else {
                warn!("Skipping malformed job id '{}' in index of {}", id, owner_id);
                continue;
            };
            let payload: Option<String> = conn.get(record_key(&job_id)).await?;
            if let Some(payload) = payload {
                records.push(serde_json::from_str::<VideoRecord>(&payload)?);
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete(&self, job_id: Uuid, owner_id: &str) -> Result<(), TableError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(record_key(&job_id)).await?;
        let _: () = conn
            .srem(owner_index_key(owner_id), job_id.to_string())
            .await?;
        Ok(())
    }
}
