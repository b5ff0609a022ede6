//! Error taxonomy and HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures that can occur while running a research turn.
///
/// Search failures are recoverable (the relay degrades to zero sources).
/// Summarization failures before the first fragment surface as an
/// error-content message; mid-stream they terminate the stream but any
/// partial content is still persisted. Timeouts fold into summarization
/// failures.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("chat session not found: {0}")]
    SessionNotFound(String),

    #[error("search provider failure: {0}")]
    SearchProvider(String),

    #[error("summarization failure: {0}")]
    Summarization(String),

    #[error("provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("transport interrupted: {0}")]
    TransportInterrupted(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ResearchError {
    /// Recoverable failures let the turn continue in degraded form.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResearchError::SearchProvider(_) | ResearchError::TransportInterrupted(_)
        )
    }
}

/// Standard API error response format.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status_code: StatusCode,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": true,
            "message": self.message,
            "status": self.status_code.as_u16(),
        });
        (self.status_code, Json(body)).into_response()
    }
}

impl From<ResearchError> for ApiError {
    fn from(err: ResearchError) -> Self {
        match err {
            ResearchError::SessionNotFound(id) => {
                ApiError::not_found(format!("Chat not found: {id}"))
            }
            other => {
                error!("{other}");
                ApiError::internal(other.to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for converting fallible operations into API errors.
pub trait IntoApiError<T> {
    fn into_internal_error(self, message: &str) -> Result<T, ApiError>;
}

impl<T, E> IntoApiError<T> for Result<T, E>
where
    E: std::fmt::Debug,
{
    fn into_internal_error(self, message: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {:?}", message, e);
            ApiError::internal(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_creation() {
        let error = ApiError::internal("boom");
        assert_eq!(error.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_session_not_found_maps_to_404() {
        let api: ApiError = ResearchError::SessionNotFound("abc".into()).into();
        assert_eq!(api.status_code, StatusCode::NOT_FOUND);
        assert!(api.message.contains("abc"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ResearchError::SearchProvider("down".into()).is_recoverable());
        assert!(ResearchError::TransportInterrupted("lost".into()).is_recoverable());
        assert!(!ResearchError::Summarization("bad".into()).is_recoverable());
        assert!(!ResearchError::ProviderTimeout("slow".into()).is_recoverable());
    }
}
