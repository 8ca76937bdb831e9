//! Request-level errors and their HTTP mapping.
//!
//! Only errors raised before the first response byte can reach a client as a
//! status code. Once a streamed reply has started, failures are reported by
//! aborting the connection (see [`crate::relay`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use helpdesk_shared::ErrorResponse;
use thiserror::Error;
use tracing::error;

/// Failure of the generation backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend stream failed: {0}")]
    Stream(String),

    #[error("no chunk from backend within {0:?}")]
    Timeout(std::time::Duration),
}

impl From<async_openai::error::OpenAIError> for BackendError {
    fn from(e: async_openai::error::OpenAIError) -> Self {
        match e {
            async_openai::error::OpenAIError::ApiError(api_err) => Self::Request(format!(
                "OpenAI API Error: {} (Code: {:?}, Type: {:?})",
                api_err.message, api_err.code, api_err.r#type
            )),
            other => Self::Request(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed body or unresolvable client identity. Never counted against quota.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limit exceeded")]
    RateLimited,

    /// The backend failed before any reply text was produced.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::RateLimited => return StatusCode::TOO_MANY_REQUESTS.into_response(),
            ServerError::Backend(e) => {
                error!(error = %e, "generation failed before streaming started");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_kind() {
        let cases = [
            (ServerError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServerError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (
                ServerError::Backend(BackendError::Request("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn rate_limited_reply_has_empty_body() {
        let response = ServerError::RateLimited.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn backend_error_message_reaches_the_client() {
        let response = ServerError::Backend(BackendError::Request("quota".into())).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "backend request failed: quota");
    }
}
