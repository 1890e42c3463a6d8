//! HTTP error mapping for the import, stats and recommendation routes.

use crate::importer::ImportError;
use crate::provider::ProviderError;
use crate::recommend::RecommendError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

/// Route-level error with the status class the failure belongs to. The
/// message is safe to show to clients; internals are logged, not leaked.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed ({}): {}", self.status, self.message);
        } else {
            warn!("Request rejected ({}): {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn provider_status(err: &ProviderError) -> StatusCode {
    match err {
        ProviderError::AuthExpired | ProviderError::NotLinked => StatusCode::UNAUTHORIZED,
        ProviderError::RetryLimitReached => StatusCode::TOO_MANY_REQUESTS,
        ProviderError::ClientRejected { .. } => StatusCode::BAD_REQUEST,
        ProviderError::Unavailable { .. } | ProviderError::Transport(_) => StatusCode::BAD_GATEWAY,
        ProviderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::new(provider_status(&err), err.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let status = match &err {
            ImportError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ImportError::UnsupportedFormat
            | ImportError::MixedFormats
            | ImportError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ImportError::AlreadyRunning => StatusCode::CONFLICT,
            ImportError::Provider(provider_err) => provider_status(provider_err),
            ImportError::DataConsistency | ImportError::RetrySmaller | ImportError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        let status = match &err {
            RecommendError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            RecommendError::NoSeeds | RecommendError::NoStrategyWorked => StatusCode::BAD_REQUEST,
            RecommendError::NoCandidates | RecommendError::AllCandidatesKnown => {
                StatusCode::NOT_FOUND
            }
            RecommendError::Provider(provider_err) => provider_status(provider_err),
            RecommendError::Cache(_) | RecommendError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Unhandled store error: {:#}", err);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}
