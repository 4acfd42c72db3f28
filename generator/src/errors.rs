use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use postgen_utils::{CacheError, RateLimitError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::api_client::ApiError;
use crate::services::rag::RagError;

/// Terminal error of one `generate_post` call
///
/// Cloneable so one upstream result can be shared between coalesced callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded for '{source_name}', retry in {time_to_wait_ms}ms")]
    RateLimit {
        source_name: String,
        time_to_wait_ms: u64,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status_code}: {message}")]
    Http { status_code: u16, message: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Rag(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Content generation failed: {0}")]
    ContentGeneration(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// JSON body of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "ValidationError",
            PipelineError::Authentication(_) => "AuthenticationError",
            PipelineError::Authorization(_) => "AuthorizationError",
            PipelineError::Security(_) => "SecurityError",
            PipelineError::NotFound(_) => "NotFoundError",
            PipelineError::RateLimit { .. } => "RateLimitError",
            PipelineError::Network(_) => "NetworkError",
            PipelineError::Http { .. } => "HttpError",
            PipelineError::Embedding(_) => "EmbeddingError",
            PipelineError::Rag(_) => "RAGError",
            PipelineError::Database(_) => "DatabaseError",
            PipelineError::ContentGeneration(_) => "ContentGenerationError",
            PipelineError::Cancelled => "CancelledError",
            PipelineError::Unexpected(_) => "UnexpectedError",
        }
    }

    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::RateLimit { .. }
                | PipelineError::Network(_)
                | PipelineError::Http { .. }
                | PipelineError::Embedding(_)
                | PipelineError::Rag(_)
                | PipelineError::ContentGeneration(_)
                | PipelineError::Unexpected(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Authentication(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Authorization(_) | PipelineError::Security(_) => StatusCode::FORBIDDEN,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::Database(_) | PipelineError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds for the `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            PipelineError::RateLimit { time_to_wait_ms, .. } => Some(time_to_wait_ms.div_ceil(1000).max(1)),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs();

        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self);
        } else {
            tracing::warn!("⚠️  Request rejected: {}", self);
        }

        let mut response = (status, Json(self.to_body())).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        PipelineError::Validation(errors.to_string())
    }
}

impl From<RateLimitError> for PipelineError {
    fn from(err: RateLimitError) -> Self {
        PipelineError::RateLimit {
            source_name: err.source_name,
            time_to_wait_ms: err.time_to_wait_ms,
        }
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        PipelineError::Unexpected(err.to_string())
    }
}

impl From<ApiError> for PipelineError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::RateLimited(e) => e.into(),
            ApiError::Network(msg) => PipelineError::Network(msg),
            ApiError::Http { status_code, body } => PipelineError::Http {
                status_code,
                message: body,
            },
            ApiError::UnknownSource(source) => {
                PipelineError::Unexpected(format!("no endpoint registered for source '{}'", source))
            }
            ApiError::Decode(msg) | ApiError::Unexpected(msg) => PipelineError::Unexpected(msg),
        }
    }
}

impl From<RagError> for PipelineError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::InvalidQuery(msg) => PipelineError::Validation(msg),
            RagError::Api(api) => api.into(),
            RagError::Embedding(msg) => PipelineError::Embedding(msg),
            RagError::GenerationFailed { .. } => PipelineError::ContentGeneration(err.to_string()),
            RagError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Rag(other.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
