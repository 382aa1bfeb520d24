pub mod auth;
pub mod health;
pub mod session;

use axum::http::HeaderMap;
use service_core::error::AppError;

use crate::models::AppHeaders;

/// Extracts the device headers every mobile endpoint requires.
pub fn app_headers(headers: &HeaderMap) -> Result<AppHeaders, AppError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let mobile_uid = get("mobile-uid")
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("mobile-uid header is required")))?;

    Ok(AppHeaders {
        mobile_uid,
        platform_type: get("platform-type"),
        platform_version: get("platform-version"),
        app_version: get("app-version"),
        trace_id: get("trace-id"),
    })
}

/// Bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized {
            source: anyhow::anyhow!("missing bearer token"),
            process_code: None,
        })
}
