use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Hyperliquid returned {status}: {body}")]
    ExternalApiError { status: u16, body: String },

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Coarse error bucket, used for logging and for the `kind` field shown to
/// clients. Nothing branches on it to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Http,
    Parse,
    Validation,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Http => "http",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) | AppError::ValidationError(_) => ErrorKind::Validation,
            AppError::ExternalApiError { .. } => ErrorKind::Http,
            AppError::RequestError(e) if e.is_decode() => ErrorKind::Parse,
            AppError::RequestError(e) if e.is_status() => ErrorKind::Http,
            AppError::RequestError(_) | AppError::WebSocketError(_) => ErrorKind::Network,
            AppError::SerializationError(_) | AppError::UnexpectedResponse(_) => ErrorKind::Parse,
            AppError::Unavailable(_) => ErrorKind::Unavailable,
            AppError::IoError(_) | AppError::ConfigError(_) | AppError::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalApiError { .. }
            | AppError::RequestError(_)
            | AppError::WebSocketError(_)
            | AppError::UnexpectedResponse(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SerializationError(_)
            | AppError::IoError(_)
            | AppError::ConfigError(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let error_message = match &self {
            AppError::RequestError(e) => {
                tracing::error!(kind = %kind, "Request error: {:?}", e);
                "External request failed".to_string()
            }
            AppError::WebSocketError(e) => {
                tracing::error!(kind = %kind, "WebSocket error: {:?}", e);
                "WebSocket connection failed".to_string()
            }
            AppError::SerializationError(e) => {
                tracing::error!(kind = %kind, "Serialization error: {:?}", e);
                "Serialization error".to_string()
            }
            AppError::IoError(e) => {
                tracing::error!(kind = %kind, "IO error: {:?}", e);
                "Storage error".to_string()
            }
            AppError::InternalError(msg) | AppError::ConfigError(msg) => {
                tracing::error!(kind = %kind, "Internal error: {}", msg);
                msg.clone()
            }
            other => {
                tracing::warn!(kind = %kind, "{}", other);
                other.to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
