//! Central error types for the gateway, and their mapping back to HTTP
//! responses. Every per-request failure funnels into [ApiError] so that each
//! request produces exactly one response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, warn};
use thiserror::Error;

use crate::api_types::ErrorBody;

/// Raw failures from the key-record store client. Validity policy (expiry and
/// friends) is layered on top of these by the handlers, not here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no record matches the supplied key")]
    NotFound,

    #[error("record store unreachable: {0}")]
    Unreachable(String),

    #[error("record store returned status {status}")]
    Store { status: u16, detail: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing X-API-Key header")]
    MissingKey,

    #[error("invalid API key")]
    InvalidKey,

    #[error("API key expired")]
    Expired,

    #[error("auth service unavailable")]
    StoreUnreachable,

    #[error("stored expiry timestamp is malformed")]
    MalformedExpiry,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("uploaded file must be an image")]
    NotAnImage,

    #[error("missing multipart field `{0}`")]
    MissingField(&'static str),

    #[error("malformed multipart payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("inference endpoint unreachable: {0}")]
    Unavailable(String),

    #[error("inference endpoint returned status {status}")]
    NonSuccess { status: u16 },

    /// The call succeeded but the model declined to emit a usable image.
    #[error("model response contained no image payload")]
    NoImageProduced,

    #[error("embedded image data is malformed: {0}")]
    MalformedImageData(String),
}

/// Umbrella over everything a handler can fail with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable category string carried in the error body. Callers dispatch on
    /// these, so renaming one is a breaking API change.
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Auth(AuthError::MissingKey) => "missing_key",
            ApiError::Auth(AuthError::InvalidKey) => "invalid_key",
            ApiError::Auth(AuthError::Expired) => "expired_key",
            ApiError::Auth(AuthError::StoreUnreachable) => "store_unreachable",
            ApiError::Auth(AuthError::MalformedExpiry) => "malformed_expiry",
            ApiError::Upload(UploadError::NotAnImage) => "not_an_image",
            ApiError::Upload(_) => "bad_request",
            ApiError::Inference(InferenceError::Unavailable(_)) => "upstream_unavailable",
            ApiError::Inference(InferenceError::NonSuccess { .. }) => "upstream_non_success",
            ApiError::Inference(InferenceError::NoImageProduced) => "no_image_produced",
            ApiError::Inference(InferenceError::MalformedImageData(_)) => "malformed_image_data",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            category: self.category().to_owned(),
            detail: self.to_string(),
        };

        if status.is_server_error() {
            warn!("request failed ({}): {}", body.category, body.detail);
        } else {
            debug!("request rejected ({}): {}", body.category, body.detail);
        }

        (status, Json(body)).into_response()
    }
}
