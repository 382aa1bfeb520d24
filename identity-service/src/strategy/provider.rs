//! Opaque seam to the identity-provider gateway.
//!
//! The gateway owns every provider-specific protocol: bank OAuth handshakes,
//! NFC chip cryptography, photo matching, OTP delivery. This service only
//! consumes confirm/reject outcomes and the identity data captured by a
//! completed verification.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{AppHeaders, AuthMethod, UserInfo, VerifiedIdentity};
use crate::services::error::ServiceError;
use crate::strategy::StrategyRejection;

#[async_trait]
pub trait VerificationProvider: Send + Sync {
    /// Runs the provider-specific verification for one method attempt.
    async fn confirm(
        &self,
        method: AuthMethod,
        request_id: &str,
        params: &serde_json::Value,
        headers: &AppHeaders,
    ) -> Result<(), StrategyRejection>;

    /// Identity data captured by a completed verification of the process.
    async fn verified_identity(
        &self,
        process_id: &str,
    ) -> Result<Option<VerifiedIdentity>, ServiceError>;

    /// Downstream notification that a user exhausted their attempts.
    async fn report_attempts_exceeded(&self, user: &UserInfo) -> Result<(), ServiceError>;
}

/// HTTP client for the verification gateway.
#[derive(Clone)]
pub struct GatewayVerifier {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ConfirmResponse {
    confirmed: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl GatewayVerifier {
    pub fn new(base_url: &str) -> Self {
        tracing::info!(base_url = %base_url, "Verification gateway client configured");
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VerificationProvider for GatewayVerifier {
    async fn confirm(
        &self,
        method: AuthMethod,
        request_id: &str,
        params: &serde_json::Value,
        headers: &AppHeaders,
    ) -> Result<(), StrategyRejection> {
        let url = format!("{}/verification/{}/{}", self.base_url, method, request_id);
        let response = self
            .client
            .post(&url)
            .header("mobile-uid", &headers.mobile_uid)
            .json(params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, method = %method, "Verification gateway unreachable");
                StrategyRejection::new(format!("verification gateway error: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(StrategyRejection::new(format!(
                "verification rejected with status {}",
                response.status()
            )));
        }

        let body: ConfirmResponse = response.json().await.map_err(|e| {
            StrategyRejection::new(format!("malformed verification response: {e}"))
        })?;

        if body.confirmed {
            Ok(())
        } else {
            Err(StrategyRejection::new(
                body.reason
                    .unwrap_or_else(|| "verification not confirmed".to_string()),
            ))
        }
    }

    async fn verified_identity(
        &self,
        process_id: &str,
    ) -> Result<Option<VerifiedIdentity>, ServiceError> {
        let url = format!("{}/verification/identity/{}", self.base_url, process_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let identity = response
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .json::<VerifiedIdentity>()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(Some(identity))
    }

    async fn report_attempts_exceeded(&self, user: &UserInfo) -> Result<(), ServiceError> {
        let url = format!("{}/verification/attempts-exceeded", self.base_url);
        self.client
            .post(&url)
            .json(&serde_json::json!({ "identifier": user.identifier }))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

/// Scripted provider used by tests.
#[derive(Default)]
pub struct MockVerificationProvider {
    /// Methods that should be rejected, with the scripted rejection reason.
    pub reject: std::sync::Mutex<std::collections::HashMap<AuthMethod, String>>,
    pub identity: std::sync::Mutex<Option<VerifiedIdentity>>,
    pub attempts_exceeded_reports: std::sync::Mutex<Vec<String>>,
}

impl MockVerificationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_method(&self, method: AuthMethod, reason: &str) {
        self.reject
            .lock()
            .expect("mock provider mutex")
            .insert(method, reason.to_string());
    }

    pub fn set_identity(&self, identity: VerifiedIdentity) {
        *self.identity.lock().expect("mock provider mutex") = Some(identity);
    }
}

#[async_trait]
impl VerificationProvider for MockVerificationProvider {
    async fn confirm(
        &self,
        method: AuthMethod,
        _request_id: &str,
        _params: &serde_json::Value,
        _headers: &AppHeaders,
    ) -> Result<(), StrategyRejection> {
        let rejects = self.reject.lock().expect("mock provider mutex");
        match rejects.get(&method) {
            Some(reason) => Err(StrategyRejection::new(reason.clone())),
            None => Ok(()),
        }
    }

    async fn verified_identity(
        &self,
        _process_id: &str,
    ) -> Result<Option<VerifiedIdentity>, ServiceError> {
        Ok(self.identity.lock().expect("mock provider mutex").clone())
    }

    async fn report_attempts_exceeded(&self, user: &UserInfo) -> Result<(), ServiceError> {
        self.attempts_exceeded_reports
            .lock()
            .expect("mock provider mutex")
            .push(user.identifier.clone());
        Ok(())
    }
}
