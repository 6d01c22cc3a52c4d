//! Maps [`crate::error::Error`] onto HTTP status codes and the pack's
//! `{success, error, code}` JSON error body convention.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::Error;

pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotConnected => StatusCode::CONFLICT,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::PortOpenFailed { .. } | Error::BaudSetFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::TransportTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::TransportCorrupt { .. } | Error::TransportRefused { .. } => StatusCode::BAD_GATEWAY,
            Error::ServoNotFound { .. } => StatusCode::NOT_FOUND,
            Error::IdInUse { .. } => StatusCode::CONFLICT,
            Error::EepromProtected { .. } => StatusCode::BAD_GATEWAY,
            Error::RecoveryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            success: false,
            error: self.0.to_string(),
            code: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}
