use crate::common::response::ApiError;
use axum::http::StatusCode;

/// Rejections raised while accepting a submission. A job refused by a full
/// or closed queue is still recorded, as Failed.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),
    #[error("job queue is full, try again later")]
    QueueFull,
    #[error("service is shutting down")]
    ShuttingDown,
}

/// Terminal failures of an accepted job. The message becomes the job's
/// `errorDetail`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to fetch source video: {0}")]
    SourceFetch(String),
    #[error("conversion failed: {0}")]
    Engine(String),
    #[error("failed to store converted video: {0}")]
    ArtifactStore(String),
    #[error("conversion cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("conversion job not found")]
    NotFound,
    #[error("conversion job already finished")]
    AlreadyFinished,
    #[error("conversion job has not completed")]
    NotCompleted,
    #[error("conversion job is still running")]
    StillRunning,
    #[error("{0}")]
    Storage(String),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        let status = match err {
            SubmitError::Validation(_) => StatusCode::BAD_REQUEST,
            SubmitError::QueueFull | SubmitError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError(err.to_string(), status)
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        let status = match err {
            LookupError::NotFound => StatusCode::NOT_FOUND,
            LookupError::AlreadyFinished | LookupError::NotCompleted | LookupError::StillRunning => StatusCode::CONFLICT,
            LookupError::Storage(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError(err.to_string(), status)
    }
}
