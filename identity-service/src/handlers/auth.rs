//! Step orchestration endpoints.

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    AcquireTokenRequest, GetMethodsRequest, SelectMethodRequest, SessionTokenResponse,
    VerifyMethodRequest, VerifyMethodResponse,
};
use crate::models::{SchemaCode, SessionType};
use crate::services::{CompleteStepsArgs, ServiceError};
use crate::AppState;

pub async fn get_auth_methods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GetMethodsRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let app_headers = super::app_headers(&headers)?;

    let response = state
        .orchestrator
        .get_auth_methods(&req.code, &app_headers, req.process_id.as_deref(), None)
        .await
        .map_err(AppError::from)?;
    Ok(Json(response))
}

pub async fn select_method(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SelectMethodRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let app_headers = super::app_headers(&headers)?;

    let process = state
        .orchestrator
        .set_step_method(None, &app_headers, req.method, &req.process_id)
        .await
        .map_err(AppError::from)?;
    Ok(Json(serde_json::json!({
        "processId": process.process_id,
        "method": req.method,
    })))
}

pub async fn verify_method(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VerifyMethodRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let app_headers = super::app_headers(&headers)?;

    let process_code = state
        .orchestrator
        .verify_auth_method(
            req.method,
            &req.request_id,
            None,
            &app_headers,
            &req.process_id,
            &req.params,
        )
        .await
        .map_err(AppError::from)?;
    Ok(Json(VerifyMethodResponse { process_code }))
}

/// Completes the successful process and exchanges it for a signed session
/// token.
pub async fn acquire_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AcquireTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let app_headers = super::app_headers(&headers)?;

    let code = SchemaCode::resolve(&req.code).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("unknown auth schema '{}'", req.code))
    })?;

    let process = state
        .orchestrator
        .complete_steps(CompleteStepsArgs {
            codes: vec![code],
            mobile_uid: app_headers.mobile_uid.clone(),
            user_identifier: None,
        })
        .await
        .map_err(AppError::from)?;

    let identity = state
        .provider
        .verified_identity(&process.process_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| {
            AppError::from(ServiceError::access_denied(
                "verified identity data is not available",
            ))
        })?;

    let issued = state
        .issuance
        .issue(&identity, session_type_for(code), &app_headers)
        .await
        .map_err(AppError::from)?;

    Ok(Json(SessionTokenResponse {
        token: issued.token,
        expiration_time: issued.expiration_time,
    }))
}

fn session_type_for(code: SchemaCode) -> SessionType {
    match code {
        SchemaCode::Authorization | SchemaCode::Prolong => SessionType::User,
        SchemaCode::CabinetAuthorization => SessionType::CabinetUser,
        SchemaCode::EResidentAuth => SessionType::EResident,
    }
}
