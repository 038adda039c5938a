//! Axum Router Configuration
//!
//! HTTP routing for the relay: the feedback endpoint, the `/ws` relay
//! endpoint, and the OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, Feedback, FeedbackAck},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::collect_feedback),
    components(schemas(Feedback, FeedbackAck, ErrorResponse)),
    tags(
        (name = "Livebridge", description = "WebSocket relay between browser clients and an agent backend")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/feedback", post(handlers::collect_feedback))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
