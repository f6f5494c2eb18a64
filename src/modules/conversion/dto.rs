use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Absent fields are reported by the orchestrator as "<field> is required".
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitConversionRequest {
    #[validate(length(max = 1024, message = "sourceKey must be at most 1024 characters"))]
    pub source_key: Option<String>,
    #[validate(length(max = 8, message = "targetFormat must be one of mp4, avi, mov, mkv"))]
    pub target_format: Option<String>,
    #[validate(length(max = 16, message = "targetResolution is too long"))]
    pub target_resolution: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitConversionResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ProgressQuery {
    /// Only relay events of this job. All jobs when omitted.
    pub job_id: Option<Uuid>,
}
