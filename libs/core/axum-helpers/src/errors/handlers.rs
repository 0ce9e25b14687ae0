use axum::{http::StatusCode, response::Response};

use super::{ErrorCode, error_response};

/// Fallback for unmatched routes.
pub async fn not_found() -> Response {
    let code = ErrorCode::NotFound;
    error_response(StatusCode::NOT_FOUND, code.default_message().to_string(), code)
}

/// Handler for 405 Method Not Allowed errors.
pub async fn method_not_allowed() -> Response {
    let code = ErrorCode::MethodNotAllowed;
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        code.default_message().to_string(),
        code,
    )
}
