//! Request-path error taxonomy and HTTP envelope mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::error;

/// Everything that can go wrong between receiving a request and answering it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing input. The client's fault.
    #[error("{0}")]
    Validation(String),

    /// The completion service was unreachable or returned an unusable envelope.
    #[error("completion service error: {0}")]
    Upstream(String),

    /// Model output could not be parsed as JSON. Carries the raw text so it
    /// can be logged for diagnosis; it is never echoed verbatim to callers.
    #[error("model output is not valid JSON")]
    Decode { raw: String },

    /// Parsed JSON is missing required fields or has the wrong types.
    #[error("model output has unexpected shape: {0}")]
    Schema(String),

    /// The lead store rejected or failed a query.
    #[error("lead store error: {0}")]
    Store(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: msg.clone(),
                    details: None,
                },
            ),
            Error::Upstream(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Failed to reach completion service".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            Error::Decode { raw } => {
                error!("Failed to parse model output as JSON: {}", raw);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Model response parsing failed".to_string(),
                        details: Some(truncate(raw, 200).to_string()),
                    },
                )
            }
            Error::Schema(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Model response has unexpected shape".to_string(),
                    details: Some(msg.clone()),
                },
            ),
            Error::Store(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Lead store operation failed".to_string(),
                    details: Some(msg.clone()),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &text[..end]
}
