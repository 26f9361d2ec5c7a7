//! Error types.
//!
//! Two layers:
//!
//! - [`Error`] surfaces infrastructure failures of the server itself: binding
//!   to a port or accepting a connection.
//! - [`ApiError`] is the per-request taxonomy. Every handler failure is one
//!   of its variants, and each variant maps to exactly one status code.

use tracing::{debug, error};

use crate::auth::AuthError;
use crate::response::{IntoResponse, Response};
use crate::status::Status;
use crate::store::StoreError;

/// The error type returned by the server's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed request, mapped onto an HTTP status by [`ApiError::status`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Input passed parsing but breaks a business rule (e.g. empty username).
    #[error("{0}")]
    Validation(String),

    /// The body is not a JSON worker document.
    #[error("malformed request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("{0}")]
    Conflict(String),

    #[error("worker `{0}` not found")]
    NotFound(String),

    /// The caller tried to rename a worker through an update.
    #[error("username can't be changed (`{current}` → `{requested}`)")]
    UsernameChange { current: String, requested: String },

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("storage failure")]
    Storage(#[source] StoreError),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_)          => Status::NotAcceptable,
            ApiError::MalformedBody(_)       => Status::BadRequest,
            ApiError::Conflict(_)            => Status::Conflict,
            ApiError::NotFound(_)            => Status::NotFound,
            ApiError::UsernameChange { .. }  => Status::MethodNotAllowed,
            ApiError::Unauthorized(_)        => Status::Unauthorized,
            ApiError::Storage(_)             => Status::InternalServerError,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(_) | StoreError::StaleVersion(_) => {
                ApiError::Conflict(err.to_string())
            }
            StoreError::NotFound(username) => ApiError::NotFound(username),
            StoreError::Database(_) => ApiError::Storage(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            // Store details stay in the log; the client gets a generic line.
            ApiError::Storage(source) => {
                error!(error = %source, "request failed on the store");
                Response::builder().status(status).text("500 - Internal Server Error")
            }
            _ => {
                debug!(status = status.as_u16(), "request rejected: {self}");
                Response::builder().status(status).text(self.to_string())
            }
        }
    }
}
