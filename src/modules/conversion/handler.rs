use super::dto::{SubmitConversionRequest, SubmitConversionResponse};
use super::model::{ConversionJob, VideoRecord};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::middleware::auth::TokenClaims;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

/// Submit a conversion job
#[utoipa::path(
    post,
    path = "/api/v1/conversions",
    request_body = SubmitConversionRequest,
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<SubmitConversionResponse>),
        (status = 400, description = "Missing field or unsupported format"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Job queue is full")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn submit_conversion(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    payload: Result<Json<SubmitConversionRequest>, JsonRejection>,
) -> Result<ApiSuccess<SubmitConversionResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    payload
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let job_id = state
        .orchestrator
        .submit(
            &claims.sub,
            payload.source_key.as_deref().unwrap_or_default(),
            payload.target_format.as_deref().unwrap_or_default(),
            payload.target_resolution.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(ApiSuccess(
        ApiResponse::success(SubmitConversionResponse { job_id }, "Conversion queued"),
        StatusCode::ACCEPTED,
    ))
}

/// Get a conversion job
#[utoipa::path(
    get,
    path = "/api/v1/conversions/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job snapshot", body = ApiResponse<ConversionJob>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn get_conversion(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<ApiSuccess<ConversionJob>, ApiError> {
    let job = state.orchestrator.job_for_owner(id, &claims.sub).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Job retrieved successfully"),
        StatusCode::OK,
    ))
}

/// Cancel a conversion job
#[utoipa::path(
    delete,
    path = "/api/v1/conversions/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested", body = ApiResponse<ConversionJob>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already finished")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn cancel_conversion(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<ApiSuccess<ConversionJob>, ApiError> {
    let job = state.orchestrator.cancel(id, &claims.sub).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Cancellation requested"),
        StatusCode::ACCEPTED,
    ))
}

/// List the caller's videos
#[utoipa::path(
    get,
    path = "/api/v1/videos",
    responses(
        (status = 200, description = "Video records, newest first", body = ApiResponse<Vec<VideoRecord>>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Metadata table unavailable")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn list_videos(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<ApiSuccess<Vec<VideoRecord>>, ApiError> {
    let videos = state.orchestrator.list_videos(&claims.sub).await.map_err(|e| {
        tracing::error!("Failed to list videos for {}: {}", claims.sub, e);
        ApiError(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
    })?;
    Ok(ApiSuccess(
        ApiResponse::success(videos, "Videos retrieved successfully"),
        StatusCode::OK,
    ))
}

/// Delete a converted video
#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Video deleted", body = ApiResponse<VideoRecord>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Video not found"),
        (status = 409, description = "Job still running"),
        (status = 502, description = "Object store or metadata table error")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn delete_video(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<ApiSuccess<VideoRecord>, ApiError> {
    let video = state.orchestrator.delete_video(id, &claims.sub).await?;
    Ok(ApiSuccess(
        ApiResponse::success(video, "Video deleted successfully"),
        StatusCode::OK,
    ))
}
