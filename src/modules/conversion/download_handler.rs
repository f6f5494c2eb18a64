use crate::common::response::ApiError;
use crate::middleware::auth::TokenClaims;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use uuid::Uuid;

/// Download a converted video
/// Proxies the artifact from the object store to the client
#[utoipa::path(
    get,
    path = "/api/v1/conversions/{id}/download",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Converted video"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job has not completed"),
        (status = 502, description = "Object store error")
    ),
    tag = "Conversions",
    security(("bearer_auth" = []))
)]
pub async fn download_conversion(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (job, stream) = state.orchestrator.open_artifact(id, &claims.sub).await?;

    let extension = job.target_format.extension();
    let disposition = format!("attachment; filename=\"{}.{}\"", job.job_id, extension);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, job.target_format.content_type()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
