//! Crate-wide error taxonomy. Module-local errors convert into `VaultError`
//! via `#[from]`; only the HTTP handler boundary translates it to a status
//! code (§7 of SPEC_FULL.md).

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("malformed request: {0}")]
    ClientMalformed(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("range not satisfiable")]
    RangeUnsatisfiable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for VaultError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            VaultError::ClientMalformed(_) => StatusCode::BAD_REQUEST,
            VaultError::AuthFailed => StatusCode::UNAUTHORIZED,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::RangeUnsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            VaultError::Database(_) | VaultError::Io(_) | VaultError::Zip(_) => {
                tracing::error!(error = %self, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            VaultError::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
