pub mod codes;
pub mod handlers;

pub use codes::ErrorCode;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Body of every JSON error the services return.
///
/// ```json
/// {
///   "code": 1004,
///   "error": "NOT_FOUND",
///   "message": "The requested resource was not found"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub error: &'static str,
    pub message: String,
}

/// Build a JSON error response with the standard body.
pub fn error_response(status: StatusCode, message: String, error_code: ErrorCode) -> Response {
    let body = Json(ErrorResponse {
        code: error_code.code(),
        error: error_code.as_str(),
        message,
    });

    (status, body).into_response()
}
