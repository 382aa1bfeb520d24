//! Web-cabinet authorization. Requires a known user and closes the process
//! as soon as it succeeds, since the cabinet session is minted immediately.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::models::{AuthMethod, Condition, ProcessStatus, SchemaCode};
use crate::services::process_code::{ProcessCode, StatusCodeTable};
use crate::strategy::{
    conditions_for, AuthMethodStrategy, StrategyRejection, VerificationProvider, VerifyContext,
};

static CODE_TABLE: Lazy<StatusCodeTable> = Lazy::new(|| {
    StatusCodeTable::build([
        (
            ProcessStatus::Success,
            vec![
                (AuthMethod::Otp, ProcessCode::OtpVerifySuccess),
                (AuthMethod::Qes, ProcessCode::QesVerifySuccess),
            ],
        ),
        (
            ProcessStatus::Completed,
            vec![
                (AuthMethod::Otp, ProcessCode::OtpVerifySuccess),
                (AuthMethod::Qes, ProcessCode::QesVerifySuccess),
            ],
        ),
        (
            ProcessStatus::Processing,
            vec![
                (AuthMethod::Otp, ProcessCode::OtpVerifySuccess),
                (AuthMethod::Qes, ProcessCode::QesVerifySuccess),
            ],
        ),
    ])
});

pub struct CabinetAuthorizationStrategy {
    provider: Arc<dyn VerificationProvider>,
}

impl CabinetAuthorizationStrategy {
    pub fn new(provider: Arc<dyn VerificationProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthMethodStrategy for CabinetAuthorizationStrategy {
    fn schema_code(&self) -> SchemaCode {
        SchemaCode::CabinetAuthorization
    }

    fn is_user_required(&self) -> bool {
        true
    }

    fn complete_on_success(&self) -> bool {
        true
    }

    fn verify_code_table(&self) -> &StatusCodeTable {
        &CODE_TABLE
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
