//! Primary mobile authorization flow.

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
                (AuthMethod::BankId, ProcessCode::BankVerifySuccess),
                (AuthMethod::Monobank, ProcessCode::BankVerifySuccess),
                (AuthMethod::PrivatBank, ProcessCode::BankVerifySuccess),
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
            ],
        ),
        // A verified step with the chain still open resolves through the
        // Processing row.
        (
            ProcessStatus::Processing,
            vec![
                (AuthMethod::BankId, ProcessCode::BankVerifySuccess),
                (AuthMethod::Monobank, ProcessCode::BankVerifySuccess),
                (AuthMethod::PrivatBank, ProcessCode::BankVerifySuccess),
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
            ],
        ),
    ])
});

pub struct AuthorizationStrategy {
    provider: Arc<dyn VerificationProvider>,
}

impl AuthorizationStrategy {
    pub fn new(provider: Arc<dyn VerificationProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthMethodStrategy for AuthorizationStrategy {
    fn schema_code(&self) -> SchemaCode {
        SchemaCode::Authorization
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
