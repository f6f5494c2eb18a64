use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use crate::state::AppState;

pub mod broadcaster;
pub mod download_handler;
pub mod dto;
pub mod engine;
pub mod error;
pub mod handler;
pub mod model;
pub mod notifier;
pub mod orchestrator;
pub mod progress_handler;
pub mod repository;
#[cfg(test)]
pub mod testing;

pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/ws/progress", get(progress_handler::progress_socket));

    let protected_routes = Router::new()
        .route("/conversions", post(handler::submit_conversion))
        .route(
            "/conversions/{id}",
            get(handler::get_conversion).delete(handler::cancel_conversion),
        )
        .route("/conversions/{id}/download", get(download_handler::download_conversion))
        .route("/videos", get(handler::list_videos))
        .route("/videos/{id}", delete(handler::delete_video))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
