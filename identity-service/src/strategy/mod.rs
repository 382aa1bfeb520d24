//! Per-schema verification strategies.
//!
//! A strategy wraps the provider-specific checks for one schema code and
//! declares its attempt-policy flags and its (status, method) result code
//! table. Dispatch is a closed-set match, so every schema code is statically
//! guaranteed a strategy.

mod authorization;
mod cabinet;
mod eresident;
mod prolong;
pub mod provider;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AppHeaders, AuthMethod, Condition, SchemaCode, Step, UserInfo};
use crate::services::error::ServiceError;
use crate::services::process_code::{ProcessCode, StatusCodeTable};

pub use authorization::AuthorizationStrategy;
pub use cabinet::CabinetAuthorizationStrategy;
pub use eresident::EResidentAuthStrategy;
pub use prolong::ProlongStrategy;
pub use provider::{GatewayVerifier, MockVerificationProvider, VerificationProvider};

/// Context handed to `verify`.
pub struct VerifyContext<'a> {
    pub method: AuthMethod,
    pub request_id: &'a str,
    pub steps: &'a [Step],
    pub user: Option<&'a UserInfo>,
    pub headers: &'a AppHeaders,
    pub params: &'a serde_json::Value,
}

/// Business rejection raised by a strategy, optionally carrying the result
/// code surfaced to the caller.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct StrategyRejection {
    pub code: Option<ProcessCode>,
    pub reason: String,
}

impl StrategyRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn with_code(code: ProcessCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait AuthMethodStrategy: Send + Sync {
    fn schema_code(&self) -> SchemaCode;

    fn is_user_required(&self) -> bool {
        false
    }

    /// Whether a successful process is immediately promoted to `Completed`.
    fn complete_on_success(&self) -> bool {
        false
    }

    fn verify_code_table(&self) -> &StatusCodeTable;

    /// Code surfaced when the step chain runs past the schema tree.
    fn ended_chain_code(&self) -> ProcessCode {
        ProcessCode::WaitingPeriodExpired
    }

    async fn on_attempts_exceeded(
        &self,
        _user: Option<&UserInfo>,
        _headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn verify(&self, ctx: VerifyContext<'_>) -> Result<Vec<Condition>, StrategyRejection>;
}

/// Method-specific rejection code stamped onto provider failures that do
/// not carry their own.
pub(crate) fn fail_code_for(method: AuthMethod) -> ProcessCode {
    match method {
        AuthMethod::BankId | AuthMethod::Monobank | AuthMethod::PrivatBank => {
            ProcessCode::BankVerifyFailed
        }
        AuthMethod::Nfc => ProcessCode::NfcVerifyFailed,
        AuthMethod::PhotoId => ProcessCode::PhotoVerifyFailed,
        AuthMethod::Otp => ProcessCode::OtpVerifyFailed,
        AuthMethod::Qes => ProcessCode::QesVerifyFailed,
    }
}

/// Conditions a confirmed method contributes, shared by all strategies.
pub(crate) fn conditions_for(method: AuthMethod) -> Vec<Condition> {
    match method {
        AuthMethod::BankId | AuthMethod::Monobank | AuthMethod::PrivatBank => {
            vec![Condition::BankAccountVerified]
        }
        AuthMethod::PhotoId => vec![Condition::DocumentPhotoVerified, Condition::LivenessPassed],
        AuthMethod::Nfc => vec![Condition::ChipDataMatched],
        AuthMethod::Otp => vec![Condition::OtpConfirmed],
        AuthMethod::Qes => vec![Condition::SignatureVerified],
    }
}

/// The closed strategy set, one per schema code.
pub struct StrategySet {
    authorization: AuthorizationStrategy,
    cabinet: CabinetAuthorizationStrategy,
    prolong: ProlongStrategy,
    eresident: EResidentAuthStrategy,
}

impl StrategySet {
    pub fn new(provider: Arc<dyn VerificationProvider>) -> Self {
        Self {
            authorization: AuthorizationStrategy::new(provider.clone()),
            cabinet: CabinetAuthorizationStrategy::new(provider.clone()),
            prolong: ProlongStrategy::new(provider.clone()),
            eresident: EResidentAuthStrategy::new(provider),
        }
    }

    pub fn get(&self, code: SchemaCode) -> &dyn AuthMethodStrategy {
        match code {
            SchemaCode::Authorization => &self.authorization,
            SchemaCode::CabinetAuthorization => &self.cabinet,
            SchemaCode::Prolong => &self.prolong,
            SchemaCode::EResidentAuth => &self.eresident,
        }
    }
}
