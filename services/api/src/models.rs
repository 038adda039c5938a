//! API Models
//!
//! Request and response bodies of the REST surface, annotated for OpenAPI
//! generation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_log_type() -> String {
    "feedback".to_string()
}

/// User feedback about a run. Accepted as-is; the score range is not checked.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct Feedback {
    #[schema(example = 1)]
    pub score: f64,
    #[serde(default)]
    #[schema(example = "Great answer")]
    pub text: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_log_type")]
    #[schema(example = "feedback")]
    pub log_type: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct FeedbackAck {
    #[schema(example = "success")]
    pub status: String,
}

impl FeedbackAck {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
