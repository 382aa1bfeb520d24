//! Session credential endpoints: refresh, validate, logouts.

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::{MessageResponse, SessionTokenResponse};
use crate::services::RefreshOps;
use crate::AppState;

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let app_headers = super::app_headers(&headers)?;
    let token = super::bearer_token(&headers)?;
    let claims = state
        .jwt
        .validate_session_token_ignoring_expiry(&token)
        .map_err(AppError::from)?;

    let projection = state
        .tokens
        .refresh(
            &claims.refresh_token,
            claims.session_type,
            RefreshOps {
                mobile_uid: Some(app_headers.mobile_uid.clone()),
                prolong_lifetime: true,
                entry_point: None,
            },
            Some(&app_headers),
        )
        .await
        .map_err(AppError::from)?;

    let token = state
        .jwt
        .generate_session_token(&claims.sub, claims.session_type, &projection.value)
        .map_err(AppError::from)?;

    Ok(Json(SessionTokenResponse {
        token,
        expiration_time: projection.expiration_time,
    }))
}

pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let app_headers = super::app_headers(&headers)?;
    let token = super::bearer_token(&headers)?;
    let claims = state.jwt.validate_session_token(&token)?;

    state
        .tokens
        .validate(&claims.refresh_token, &app_headers, claims.session_type)
        .await
        .map_err(AppError::from)?;

    Ok(Json(MessageResponse {
        message: "Session is active".to_string(),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let app_headers = super::app_headers(&headers)?;
    let token = super::bearer_token(&headers)?;
    let claims = state
        .jwt
        .validate_session_token_ignoring_expiry(&token)
        .map_err(AppError::from)?;

    state
        .tokens
        .logout_user(
            &claims.refresh_token,
            &app_headers.mobile_uid,
            &claims.sub,
            claims.session_type,
        )
        .await
        .map_err(AppError::from)?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

pub async fn logout_portal(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = super::bearer_token(&headers)?;
    let claims = state
        .jwt
        .validate_session_token_ignoring_expiry(&token)
        .map_err(AppError::from)?;

    state
        .tokens
        .logout_portal_user(&claims.refresh_token)
        .await
        .map_err(AppError::from)?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

pub async fn logout_service_entrance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = super::bearer_token(&headers)?;
    let claims = state
        .jwt
        .validate_session_token_ignoring_expiry(&token)
        .map_err(AppError::from)?;

    state
        .tokens
        .service_entrance_logout(&claims.refresh_token)
        .await
        .map_err(AppError::from)?;

    Ok(Json(MessageResponse {
        message: "Session closed".to_string(),
    }))
}
