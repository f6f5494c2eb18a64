use utoipa::OpenApi;
use crate::modules::conversion::dto::*;
use crate::modules::conversion::model::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::conversion::handler::submit_conversion,
        crate::modules::conversion::handler::get_conversion,
        crate::modules::conversion::handler::cancel_conversion,
        crate::modules::conversion::handler::list_videos,
        crate::modules::conversion::handler::delete_video,
        crate::modules::conversion::download_handler::download_conversion,
        crate::modules::conversion::progress_handler::progress_socket,
    ),
    components(
        schemas(
            SubmitConversionRequest, SubmitConversionResponse,
            ConversionJob, StatusChange, JobStatus, TargetFormat, Resolution, VideoRecord,
        )
    ),
    tags(
        (name = "Conversions", description = "Video conversion jobs"),
        (name = "Progress", description = "Live conversion progress over WebSocket")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

use utoipa::Modify;
use utoipa::openapi::security::{SecurityScheme, HttpAuthScheme, HttpBuilder};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
