//! Unified error handling for the backend API.
//!
//! Collaborator failures (token endpoint, mail API, classifier, store) convert
//! into `ApiError` with `?`. The response carries a stable message only; the
//! upstream error text goes to the log.

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::classifier::ClassificationError;
use crate::graph::GraphError;
use crate::repository::StoreError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// OAuth flow or credential failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Mail API failure
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Classification service failure
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// Scan record store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Authentication required but not provided or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted to access resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Server-side failure reported with a fixed message
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// Status code this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(e) => match e {
                AuthError::MissingCode => StatusCode::BAD_REQUEST,
                AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
                AuthError::TokenMissing | AuthError::InvalidEndpoint(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                AuthError::TokenExchange(_) | AuthError::TokenDecode(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Graph(_) | ApiError::Classification(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(e) => match e {
                StoreError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
                StoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!("Rejected request body: {}", rejection.body_text());
        ApiError::BadRequest("Invalid request body".to_string())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::warn!("Rejected path parameter: {}", rejection.body_text());
        ApiError::BadRequest("Invalid email id".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            ApiError::Auth(e) => {
                match e {
                    AuthError::MissingCode | AuthError::Unauthenticated => {}
                    _ => tracing::error!("OAuth error: {:?}", e),
                }
                match e {
                    AuthError::MissingCode => "Missing code",
                    AuthError::Unauthenticated => "Not authenticated",
                    AuthError::TokenMissing => "Failed to retrieve access token",
                    AuthError::TokenExchange(_) => "Token exchange failed",
                    AuthError::TokenDecode(_) => "Invalid token response",
                    AuthError::InvalidEndpoint(_) => "Identity provider is misconfigured",
                }
                .to_string()
            }
            ApiError::Graph(e) => {
                tracing::error!("Mail API error: {:?}", e);
                match e {
                    GraphError::SubscriptionRequest(_) => "Failed to create subscription",
                    GraphError::Fetch(_) | GraphError::MalformedMessage(_) => {
                        "Failed to fetch message"
                    }
                    GraphError::Profile(_) => "Failed to verify user",
                    GraphError::Rejected { .. } => "Mail provider rejected the request",
                }
                .to_string()
            }
            ApiError::Classification(e) => {
                tracing::error!("Classification error: {:?}", e);
                "Classification service unavailable".to_string()
            }
            ApiError::Store(e) => match e {
                StoreError::InvalidStatus(status) => {
                    tracing::warn!("Invalid status value: {}", status);
                    "Invalid status value".to_string()
                }
                StoreError::NotFound(id) => {
                    tracing::warn!("Scan record {} not found", id);
                    "Email not found".to_string()
                }
                StoreError::Pool(msg) => {
                    tracing::error!("Connection pool error: {}", msg);
                    "Database connection unavailable".to_string()
                }
                StoreError::Persistence(e) => {
                    tracing::error!("Database error: {:?}", e);
                    "Database operation failed".to_string()
                }
            },
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::Internal(msg) => msg.clone(),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details: None,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
