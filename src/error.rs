use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Why a single generation call (or a whole action) did not produce an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GenerationError {
    #[error("missing required input: {0}")]
    Validation(String),
    #[error("generation blocked by safety policy: {0}")]
    Blocked(String),
    #[error("no artifact returned: {0}")]
    NoArtifact(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("credentials rejected: {0}")]
    Auth(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(#[serde(with = "secs")] Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether the user can reasonably retry with the regenerate action.
    /// Malformed output and rejected credentials need different input first.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Malformed(_) | GenerationError::Auth(_) | GenerationError::Validation(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation",
            GenerationError::Blocked(_) => "blocked",
            GenerationError::NoArtifact(_) => "no_artifact",
            GenerationError::Transport(_) => "transport",
            GenerationError::Auth(_) => "auth",
            GenerationError::Malformed(_) => "malformed",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::Cancelled => "cancelled",
        }
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("export failed: {0}")]
    Export(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Generation(GenerationError::Validation(rejection.body_text()))
    }
}

/// Unknown tool slugs, slot indexes and job ids all name nothing.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::NotFound(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Generation(e) => {
                let status = match e {
                    GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
                    GenerationError::Auth(_) => StatusCode::UNAUTHORIZED,
                    GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    GenerationError::Cancelled => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.kind())
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Export(_) => (StatusCode::INTERNAL_SERVER_ERROR, "export"),
        };
        (status, Json(json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}
