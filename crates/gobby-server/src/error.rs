//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use gobby_mcp::McpError;
use gobby_storage::StorageError;

/// An error ready to leave the HTTP boundary.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Message placed in the `error` field of the JSON body.
    pub message: String,
}

impl ApiError {
    /// Build an error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 404.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 403.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// 409.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// 503.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// 500.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Map an MCP error for discovery/listing endpoints: unknown names
    /// are 404, transport refusals are 503.
    #[must_use]
    pub fn from_mcp_listing(error: &McpError) -> Self {
        match error {
            McpError::ServerNotConfigured { .. } | McpError::ToolNotFound { .. } => {
                Self::not_found(error.to_string())
            }
            McpError::InvalidConfig { .. } => Self::bad_request(error.to_string()),
            McpError::CircuitBreakerOpen { retry_after, .. } => {
                let mut message = error.to_string();
                if let Some(retry_after) = retry_after {
                    message.push_str(&format!("; retry_after={}s", retry_after.as_secs()));
                }
                Self::unavailable(message)
            }
            McpError::Disabled { .. }
            | McpError::ConnectionTimeout
            | McpError::ConnectFailed { .. }
            | McpError::NoSession
            | McpError::Transport(_)
            | McpError::Timeout { .. } => Self::unavailable(error.to_string()),
            McpError::ToolCallFailed { .. } => Self::internal(error.to_string()),
        }
    }

    /// Map an MCP error for call endpoints: unknown names are 404, the
    /// rest is the caller's 500.
    #[must_use]
    pub fn from_mcp_call(error: &McpError) -> Self {
        match error {
            McpError::ServerNotConfigured { .. } | McpError::ToolNotFound { .. } => {
                Self::not_found(error.to_string())
            }
            McpError::CircuitBreakerOpen { .. } => Self::unavailable(error.to_string()),
            _ => Self::internal(error.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match &error {
            StorageError::NotFound { .. } => Self::not_found(error.to_string()),
            StorageError::Conflict(_)
            | StorageError::DependencyCycle { .. }
            | StorageError::IdCollision { .. } => Self::conflict(error.to_string()),
            StorageError::InvalidReference(_) | StorageError::InvalidCommit(_) => {
                Self::bad_request(error.to_string())
            }
            StorageError::Sqlite(_) | StorageError::Json(_) | StorageError::Crypto(_) => {
                Self::internal(error.to_string())
            }
        }
    }
}

impl From<gobby_config::ConfigError> for ApiError {
    fn from(error: gobby_config::ConfigError) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;
