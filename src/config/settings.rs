use serde::Deserialize;
use std::path::PathBuf;
use crate::config::env::{self, EnvKey};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub redis_url: String,
    /// Status notifications are disabled when unset.
    pub rabbitmq_url: Option<String>,
    pub status_queue: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub jwt_secret: String,
    pub work_dir: PathBuf,
    pub ffmpeg_path: String,
    pub max_concurrent_jobs: usize,
    pub job_queue_capacity: usize,
    /// How long finished jobs stay in memory before only their record is left.
    pub job_retention_secs: u64,
    pub progress_buffer: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            redis_url: env::get(EnvKey::RedisUrl)?,
            rabbitmq_url: env::get_optional(EnvKey::RabbitMqUrl),
            status_queue: env::get_or(EnvKey::StatusQueue, "conversion_status"),
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            jwt_secret: env::get(EnvKey::JwtSecret)?,
            work_dir: PathBuf::from(env::get_or(EnvKey::WorkDir, "/tmp/transcoder")),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            max_concurrent_jobs: env::get_parsed(EnvKey::MaxConcurrentJobs, 2usize).max(1),
            job_queue_capacity: env::get_parsed(EnvKey::JobQueueCapacity, 32usize).max(1),
            job_retention_secs: env::get_parsed(EnvKey::JobRetentionSecs, 3600u64),
            progress_buffer: env::get_parsed(EnvKey::ProgressBuffer, 64usize).max(1),
        })
    }

    #[cfg(test)]
    pub fn for_tests(work_dir: PathBuf) -> Self {
        Self {
            server_port: 0,
            redis_url: "redis://127.0.0.1/".to_string(),
            rabbitmq_url: None,
            status_queue: "conversion_status".to_string(),
            minio_url: "http://127.0.0.1:9000".to_string(),
            minio_bucket: "videos".to_string(),
            minio_access_key: "test".to_string(),
            minio_secret_key: "test".to_string(),
            jwt_secret: "test-secret".to_string(),
            work_dir,
            ffmpeg_path: "ffmpeg".to_string(),
            max_concurrent_jobs: 1,
            job_queue_capacity: 8,
            job_retention_secs: 3600,
            progress_buffer: 64,
        }
    }
}
