//! HTTP error mapping.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use zipcheck_archive::BuildError;

use crate::workspace::{LockError, UploadError};

/// Errors surfaced by handlers as a status plus a plain-text message.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("malformed multipart request: {message}")]
    Multipart { status: StatusCode, message: String },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to build archive: {0}")]
    Build(#[from] BuildError),

    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<MultipartError> for ServerError {
    fn from(err: MultipartError) -> Self {
        ServerError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Multipart { status, .. } => *status,
            ServerError::Upload(UploadError::InvalidName(_))
            | ServerError::Upload(UploadError::UnsupportedType(_)) => StatusCode::BAD_REQUEST,
            ServerError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Upload(UploadError::Io { .. })
            | ServerError::Lock(_)
            | ServerError::Build(_)
            | ServerError::Io(_)
            | ServerError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, format!("{}\n", self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_statuses() {
        let bad = ServerError::from(UploadError::InvalidName("..".to_string()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let big = ServerError::from(UploadError::TooLarge { size: 2, limit: 1 });
        assert_eq!(big.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let io = ServerError::from(UploadError::Io {
            path: "uploads".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "denied"),
        });
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
