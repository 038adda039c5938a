//! Axum Handlers for the REST API
//!
//! The REST surface is a single feedback endpoint. Records are handed to the
//! logging sink as structured `tracing` events.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use tracing::{info, warn};

use crate::models::{ErrorResponse, Feedback, FeedbackAck};

/// Log target of the feedback sink.
pub const FEEDBACK_TARGET: &str = "livebridge::feedback";

pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "Rejected feedback body");
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Collect feedback about a run.
#[utoipa::path(
    post,
    path = "/feedback",
    request_body = Feedback,
    responses(
        (status = 200, description = "Feedback recorded", body = FeedbackAck),
        (status = 400, description = "Body is not a feedback record", body = ErrorResponse)
    )
)]
pub async fn collect_feedback(
    payload: Result<Json<Feedback>, JsonRejection>,
) -> Result<Json<FeedbackAck>, ApiError> {
    let Json(feedback) = payload?;
    info!(
        target: FEEDBACK_TARGET,
        score = feedback.score,
        text = feedback.text.as_deref().unwrap_or_default(),
        run_id = feedback.run_id.as_deref().unwrap_or_default(),
        user_id = feedback.user_id.as_deref().unwrap_or_default(),
        log_type = %feedback.log_type,
        received_at = %Utc::now().to_rfc3339(),
        "Feedback received"
    );
    Ok(Json(FeedbackAck::success()))
}
