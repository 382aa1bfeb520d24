//! Request/response shapes of the authentication API.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::AuthMethod;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GetMethodsRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub process_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelectMethodRequest {
    #[validate(length(min = 1, max = 64))]
    pub process_id: String,
    pub method: AuthMethod,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMethodRequest {
    #[validate(length(min = 1, max = 64))]
    pub process_id: String,
    pub method: AuthMethod,
    #[validate(length(min = 1, max = 128))]
    pub request_id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMethodResponse {
    pub process_code: crate::services::process_code::ProcessCode,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AcquireTokenRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 64))]
    pub process_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenResponse {
    pub token: String,
    pub expiration_time: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub message: String,
}
