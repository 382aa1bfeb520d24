//! Session prolongation: re-confirms an existing identity on the same device.

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
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
            ],
        ),
        (
            ProcessStatus::Completed,
            vec![
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
            ],
        ),
        (
            ProcessStatus::Processing,
            vec![
                (AuthMethod::Nfc, ProcessCode::NfcVerifySuccess),
                (AuthMethod::PhotoId, ProcessCode::PhotoVerifySuccess),
            ],
        ),
    ])
});

pub struct ProlongStrategy {
    provider: Arc<dyn VerificationProvider>,
}

impl ProlongStrategy {
    pub fn new(provider: Arc<dyn VerificationProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthMethodStrategy for ProlongStrategy {
    fn schema_code(&self) -> SchemaCode {
        SchemaCode::Prolong
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

    // An expired prolongation window sends the user back to full auth.
    fn ended_chain_code(&self) -> ProcessCode {
        ProcessCode::VerificationRequired
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
