use super::model::{ConversionJob, Resolution, TargetFormat};
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub const STATUS_STARTED: &str = "Processing started";
pub const STATUS_COMPLETE: &str = "Processing complete";
pub const STATUS_ERROR: &str = "Processing error";

/// Message recorded on the durable queue for each major transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub job_id: Uuid,
    pub status: &'static str,
    pub video: String,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TargetFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusMessage {
    fn base(job: &ConversionJob, status: &'static str) -> Self {
        Self {
            job_id: job.job_id,
            status,
            video: job.source_key.clone(),
            owner_id: job.owner_id.clone(),
            format: None,
            resolution: None,
            output_file_path: None,
            error: None,
        }
    }

    pub fn started(job: &ConversionJob) -> Self {
        Self {
            format: Some(job.target_format),
            resolution: Some(job.target_resolution),
            ..Self::base(job, STATUS_STARTED)
        }
    }

    pub fn completed(job: &ConversionJob) -> Self {
        Self {
            output_file_path: job.output_key.clone(),
            ..Self::base(job, STATUS_COMPLETE)
        }
    }

    pub fn failed(job: &ConversionJob) -> Self {
        Self {
            error: job.error_detail.clone(),
            ..Self::base(job, STATUS_ERROR)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("status notification failed: {0}")]
pub struct NotifierError(pub String);

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifierError>;
}

/// Publishes status messages as persistent JSON messages on a durable queue.
pub struct QueueNotifier {
    queue: RabbitMqService,
    queue_name: String,
}

impl QueueNotifier {
    pub fn new(queue: RabbitMqService, queue_name: &str) -> Self {
        Self {
            queue,
            queue_name: queue_name.to_string(),
        }
    }
}

#[async_trait]
impl StatusNotifier for QueueNotifier {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifierError> {
        let payload = serde_json::to_vec(message).map_err(|e| NotifierError(e.to_string()))?;
        self.queue
            .publish(&self.queue_name, &payload)
            .await
            .map_err(|e| NotifierError(e.to_string()))
    }
}

/// Used when no broker is configured.
pub struct DisabledNotifier;

#[async_trait]
impl StatusNotifier for DisabledNotifier {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifierError> {
        debug!("Status notifications disabled, skipping '{}' for job {}", message.status, message.job_id);
        Ok(())
    }
}

/// Sends `message` and swallows any failure. A job's outcome never depends on
/// the notifier.
pub async fn notify_best_effort(notifier: &dyn StatusNotifier, message: StatusMessage) {
    match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.notify(&message)).await {
        Ok(Ok(())) => info!("📨 Status '{}' sent for job {}", message.status, message.job_id),
        Ok(Err(e)) => error!("❌ {} (job {}, status '{}')", e, message.job_id, message.status),
        Err(_) => error!(
            "❌ Status notification timed out after {:?} (job {}, status '{}')",
            NOTIFY_TIMEOUT, message.job_id, message.status
        ),
    }
}
