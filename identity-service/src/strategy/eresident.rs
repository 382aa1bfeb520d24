//! E-resident authorization: passport chip read plus a liveness photo check.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::models::{AppHeaders, AuthMethod, Condition, ProcessStatus, SchemaCode, UserInfo};
use crate::services::error::ServiceError;
use crate::services::process_code::{ProcessCode, StatusCodeTable};
use crate::strategy::{
    conditions_for, AuthMethodStrategy, StrategyRejection, VerificationProvider, VerifyContext,
};

static CODE_TABLE: Lazy<StatusCodeTable> = Lazy::new(|| {
    StatusCodeTable::build([
        (
            ProcessStatus::Success,
            vec![
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
                (AuthMethod::Otp, ProcessCode::OtpVerifySuccess),
            ],
        ),
        (
            ProcessStatus::Processing,
            vec![
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
                (AuthMethod::Otp, ProcessCode::OtpVerifySuccess),
            ],
        ),
    ])
});

pub struct EResidentAuthStrategy {
    provider: Arc<dyn VerificationProvider>,
}

impl EResidentAuthStrategy {
    pub fn new(provider: Arc<dyn VerificationProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthMethodStrategy for EResidentAuthStrategy {
    fn schema_code(&self) -> SchemaCode {
        SchemaCode::EResidentAuth
    }

    fn verify_code_table(&self) -> &StatusCodeTable {
        &CODE_TABLE
    }

    /// Exhausted attempts are reported downstream so the application can be
    /// routed to manual review.
    async fn on_attempts_exceeded(
        &self,
        user: Option<&UserInfo>,
        _headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        if let Some(user) = user {
            self.provider.report_attempts_exceeded(user).await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: VerifyContext<'_>) -> Result<Vec<Condition>, StrategyRejection> {
        self.provider
            .confirm(ctx.method, ctx.request_id, ctx.params, ctx.headers)
            .await
            .map_err(|mut rejection| {
                rejection.code = rejection.code.or(Some(super::fail_code_for(ctx.method)));
                rejection
            })?;
        Ok(conditions_for(ctx.method))
    }
}
