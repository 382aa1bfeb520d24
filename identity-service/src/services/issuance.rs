//! Binds a verified identity to a signed session token.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::{AppHeaders, AuthEntryPoint, AuthMethod, SessionType, VerifiedIdentity};
use crate::services::error::ServiceError;
use crate::services::jwt::SessionTokenSigner;
use crate::services::notify::{NotificationProvider, ProfileGateway};
use crate::services::tokens::{CreateTokenOps, RefreshTokenService};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    pub token: String,
    pub expiration_time: i64,
    #[serde(skip)]
    pub refresh_value: String,
    #[serde(skip)]
    pub identifier: String,
}

#[derive(Clone)]
pub struct TokenIssuanceCoordinator {
    tokens: RefreshTokenService,
    signer: Arc<dyn SessionTokenSigner>,
    notify: Arc<dyn NotificationProvider>,
    profile: Arc<dyn ProfileGateway>,
    identifier_salt: SecretString,
}

impl TokenIssuanceCoordinator {
    pub fn new(
        tokens: RefreshTokenService,
        signer: Arc<dyn SessionTokenSigner>,
        notify: Arc<dyn NotificationProvider>,
        profile: Arc<dyn ProfileGateway>,
        identifier_salt: SecretString,
    ) -> Self {
        Self {
            tokens,
            signer,
            notify,
            profile,
            identifier_salt,
        }
    }

    /// Stable identifier: salted hash of the natural key with a
    /// session-class prefix, so the same person gets distinct identities
    /// across session classes.
    pub fn stable_identifier(&self, natural_key: &str, session_type: SessionType) -> String {
        let mut hasher = Sha256::new();
        hasher.update(natural_key.as_bytes());
        hasher.update(self.identifier_salt.expose_secret().as_bytes());
        format!(
            "{}{}",
            session_type.identifier_prefix(),
            hex::encode(hasher.finalize())
        )
    }

    pub async fn issue(
        &self,
        identity: &VerifiedIdentity,
        session_type: SessionType,
        headers: &AppHeaders,
    ) -> Result<IssuedSession, ServiceError> {
        let identifier = self.stable_identifier(&identity.natural_key, session_type);

        // Whatever the device held before this login is void now.
        self.tokens
            .remove_tokens_by_mobile_uid(&headers.mobile_uid)
            .await?;

        let trace_id = headers.trace_id.clone().unwrap_or_default();
        let token = self
            .tokens
            .create(
                &trace_id,
                session_type,
                CreateTokenOps {
                    mobile_uid: Some(headers.mobile_uid.clone()),
                    user_identifier: Some(identifier.clone()),
                    entity_id: None,
                    login: None,
                    custom_lifetime_ms: None,
                    entry_point: Some(entry_point_for(identity)),
                },
                Some(headers),
            )
            .await?;

        let access_token = self
            .signer
            .sign(&identifier, session_type, &token.value)?;

        self.run_side_effects(&identifier, session_type, headers).await;

        tracing::info!(
            session_type = ?session_type,
            method = %identity.method,
            "Session issued"
        );

        Ok(IssuedSession {
            token: access_token,
            expiration_time: token.expiration_time,
            refresh_value: token.value,
            identifier,
        })
    }

    /// Fan-out-and-wait-all: every effect runs, every failure is logged,
    /// none of them gates the issued token.
    async fn run_side_effects(
        &self,
        identifier: &str,
        session_type: SessionType,
        headers: &AppHeaders,
    ) {
        let active_sessions = match self
            .tokens
            .count_active_sessions(identifier, session_type)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to count active sessions");
                1
            }
        };

        let alert = async {
            if active_sessions > 1 {
                self.notify.send_new_device_alert(identifier, headers).await
            } else {
                Ok(())
            }
        };
        let upsert = self.profile.upsert_profile(identifier);
        let push = self.profile.bind_push_token(identifier, headers);

        let (alert_result, upsert_result, push_result) = futures::join!(alert, upsert, push);
        for (effect, result) in [
            ("new-device-alert", alert_result),
            ("profile-upsert", upsert_result),
            ("push-token-binding", push_result),
        ] {
            if let Err(e) = result {
                tracing::error!(error = %e, effect, "Issuance side effect failed");
            }
        }
    }
}

fn entry_point_for(identity: &VerifiedIdentity) -> AuthEntryPoint {
    let is_bank_id = matches!(
        identity.method,
        AuthMethod::BankId | AuthMethod::Monobank | AuthMethod::PrivatBank
    );
    AuthEntryPoint {
        target: identity.method,
        document: identity.document_type.clone(),
        bank: identity.bank_id.clone(),
        is_bank_id,
    }
}
