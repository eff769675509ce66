use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use panel_protocol::HttpErrorEnvelope;
use std::fmt::Display;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    json_error_with_details(status, code, message, None)
}

pub(crate) fn json_error_with_details(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
    )
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// 422 carrying a serialized detail object, e.g. a validation result.
pub fn unprocessable(message: impl Into<String>, details: serde_json::Value) -> HttpResponse {
    json_error_with_details(
        StatusCode::UNPROCESSABLE_ENTITY,
        "INVALID_CONFIG",
        message,
        Some(details),
    )
}

pub fn service_unavailable(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
}
