use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Download failed: {url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("Response from {0} had no body")]
    MissingBody(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server version check failed: {0}")]
    Probe(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset is not initialized")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for failures reaching or decoding the remote snapshot. These are
    /// tolerated while an existing cache can still be served.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::Http(_)
                | AppError::Unreachable(_)
                | AppError::Status { .. }
                | AppError::MissingBody(_)
                | AppError::Json(_)
                | AppError::Probe(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            e if e.is_remote() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
