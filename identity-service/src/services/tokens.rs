//! Refresh token lifecycle: issuance, rotation, revocation, scheduled expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SessionLifetimes;
use crate::models::{AppHeaders, AuthEntryPoint, RefreshToken, SessionType};
use crate::services::error::ServiceError;
use crate::services::process_code::ProcessCode;
use crate::services::revocation::RevocationCache;
use crate::services::token_store::{RemovalFilter, TokenRotation, TokenStore};

/// Issuance options; everything is optional so every session class shares
/// one entry point.
#[derive(Debug, Clone, Default)]
pub struct CreateTokenOps {
    pub mobile_uid: Option<String>,
    pub user_identifier: Option<String>,
    pub entity_id: Option<String>,
    pub login: Option<String>,
    pub custom_lifetime_ms: Option<i64>,
    pub entry_point: Option<AuthEntryPoint>,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOps {
    pub mobile_uid: Option<String>,
    pub prolong_lifetime: bool,
    pub entry_point: Option<AuthEntryPoint>,
}

/// What callers get back from a rotation — a projection, never the row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenProjection {
    pub value: String,
    pub expiration_time: i64,
}

#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn TokenStore>,
    cache: Arc<dyn RevocationCache>,
    lifetimes: SessionLifetimes,
    sweep_batch_size: i64,
}

impl RefreshTokenService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        cache: Arc<dyn RevocationCache>,
        lifetimes: SessionLifetimes,
        sweep_batch_size: i64,
    ) -> Self {
        Self {
            store,
            cache,
            lifetimes,
            sweep_batch_size,
        }
    }

    pub async fn create(
        &self,
        trace_id: &str,
        session_type: SessionType,
        ops: CreateTokenOps,
        headers: Option<&AppHeaders>,
    ) -> Result<RefreshToken, ServiceError> {
        let now = Utc::now();
        let lifetime_ms = ops
            .custom_lifetime_ms
            .unwrap_or_else(|| self.lifetimes.default_ms(session_type));

        let mut token = RefreshToken::new(session_type, lifetime_ms, now);
        token.mobile_uid = ops
            .mobile_uid
            .or_else(|| headers.map(|h| h.mobile_uid.clone()));
        token.user_identifier = ops.user_identifier;
        token.entity_id = ops.entity_id;
        token.login = ops.login;
        if let Some(headers) = headers {
            token.platform_type = headers.platform_type.clone();
            token.platform_version = headers.platform_version.clone();
            token.app_version = headers.app_version.clone();
        }
        if let Some(entry_point) = ops.entry_point {
            token.entry_point_history.push(entry_point.clone());
            token.entry_point = Some(entry_point);
        }
        if let Some(days) = self.lifetimes.absolute_days(session_type) {
            token.expiration_date = Some(now + Duration::days(days));
        }

        // One active credential per session identity: siblings are removed
        // ahead of the insert rather than guarded by a unique index.
        if let Some(mobile_uid) = token.mobile_uid.clone() {
            let deleted = self
                .store
                .delete_siblings(
                    &mobile_uid,
                    session_type,
                    token.user_identifier.as_deref(),
                    None,
                )
                .await?;
            if deleted > 0 {
                tracing::info!(
                    trace_id = %trace_id,
                    deleted,
                    "Discarded sibling refresh tokens before issuance"
                );
            }
        }

        self.store.insert(&token).await?;
        tracing::info!(
            trace_id = %trace_id,
            session_type = ?session_type,
            "Refresh token issued"
        );
        Ok(token)
    }

    pub async fn refresh(
        &self,
        value: &str,
        session_type: SessionType,
        ops: RefreshOps,
        headers: Option<&AppHeaders>,
    ) -> Result<TokenProjection, ServiceError> {
        let now = Utc::now();
        let existing = self
            .store
            .find_active(value, ops.mobile_uid.as_deref())
            .await?
            .ok_or_else(ServiceError::unauthorized)?;

        if existing.is_expired_at(now) {
            return Err(self.expired_error(session_type));
        }

        let new_value = Uuid::new_v4().to_string();
        let new_expiration_time = ops
            .prolong_lifetime
            .then(|| now.timestamp_millis() + self.lifetimes.default_ms(session_type));

        let rotation = TokenRotation {
            new_value: new_value.clone(),
            new_expiration_time,
            entry_point: ops.entry_point,
            platform_type: headers.and_then(|h| h.platform_type.clone()),
            platform_version: headers.and_then(|h| h.platform_version.clone()),
            app_version: headers.and_then(|h| h.app_version.clone()),
            last_activity_date: now,
        };

        // Exactly one of any concurrent refreshes wins this predicate; the
        // rest observe zero matched rows.
        let matched = self
            .store
            .rotate(value, ops.mobile_uid.as_deref(), rotation)
            .await?;
        if matched == 0 {
            tracing::warn!("Refresh token rotation lost the race or value was replayed");
            return Err(ServiceError::unauthorized());
        }

        Ok(TokenProjection {
            value: new_value,
            expiration_time: new_expiration_time.unwrap_or(existing.expiration_time),
        })
    }

    /// Read-only existence and expiry check.
    pub async fn validate(
        &self,
        value: &str,
        headers: &AppHeaders,
        session_type: SessionType,
    ) -> Result<(), ServiceError> {
        let token = self
            .store
            .find_active(value, Some(&headers.mobile_uid))
            .await?
            .ok_or_else(ServiceError::unauthorized)?;

        if token.is_expired_at(Utc::now()) {
            return Err(self.expired_error(session_type));
        }
        Ok(())
    }

    pub async fn logout_user(
        &self,
        value: &str,
        mobile_uid: &str,
        user_identifier: &str,
        session_type: SessionType,
    ) -> Result<(), ServiceError> {
        let token = self
            .store
            .find_active(value, Some(mobile_uid))
            .await?
            .ok_or_else(ServiceError::unauthorized)?;

        let matched = self.store.mark_deleted(value, Some(mobile_uid)).await?;
        if matched == 0 {
            // Replay or a concurrent logout already consumed the value.
            return Err(ServiceError::unauthorized());
        }

        let deleted = self
            .store
            .delete_siblings(mobile_uid, session_type, Some(user_identifier), Some(value))
            .await?;
        tracing::info!(
            session_type = ?session_type,
            siblings_deleted = deleted,
            "User logged out"
        );

        self.revoke_in_cache(token);
        Ok(())
    }

    pub async fn logout_portal_user(&self, value: &str) -> Result<(), ServiceError> {
        let token = self
            .store
            .find_active(value, None)
            .await?
            .ok_or_else(ServiceError::unauthorized)?;

        let matched = self.store.mark_deleted(value, None).await?;
        if matched == 0 {
            return Err(ServiceError::unauthorized());
        }
        tracing::info!("Portal user logged out");

        self.revoke_in_cache(token);
        Ok(())
    }

    pub async fn service_entrance_logout(&self, value: &str) -> Result<(), ServiceError> {
        let token = self
            .store
            .find_active(value, None)
            .await?
            .ok_or_else(ServiceError::unauthorized)?;

        let matched = self.store.mark_deleted(value, None).await?;
        if matched == 0 {
            return Err(ServiceError::unauthorized());
        }
        tracing::info!("Service entrance session closed");

        self.revoke_in_cache(token);
        Ok(())
    }

    /// Scheduled sweep flagging overdue mobile-bound tokens as expired.
    /// Pages in fixed batches; idempotent, a no-op when nothing is overdue.
    pub async fn check_refresh_tokens_expiration(&self) -> Result<u64, ServiceError> {
        let now_ms = Utc::now().timestamp_millis();
        let overdue = self.store.count_overdue(now_ms).await?;
        if overdue == 0 {
            tracing::info!("Refresh token sweep: nothing overdue");
            return Ok(0);
        }

        tracing::info!(overdue, "Refresh token sweep started");
        let mut flagged = 0;
        loop {
            let batch = self
                .store
                .expire_batch(now_ms, self.sweep_batch_size)
                .await?;
            if batch == 0 {
                break;
            }
            flagged += batch;
        }
        tracing::info!(flagged, "Refresh token sweep finished");
        Ok(flagged)
    }

    pub async fn remove_tokens_by_mobile_uid(&self, mobile_uid: &str) -> Result<u64, ServiceError> {
        self.remove_and_revoke(RemovalFilter::ByMobileUid(mobile_uid.to_string()))
            .await
    }

    pub async fn remove_tokens_by_user_identifier(
        &self,
        user_identifier: &str,
    ) -> Result<u64, ServiceError> {
        self.remove_and_revoke(RemovalFilter::ByUserIdentifier(user_identifier.to_string()))
            .await
    }

    pub async fn remove_tokens_by_login(&self, login: &str) -> Result<u64, ServiceError> {
        self.remove_and_revoke(RemovalFilter::ByLogin(login.to_string()))
            .await
    }

    pub async fn remove_tokens_by_entity_id(&self, entity_id: &str) -> Result<u64, ServiceError> {
        self.remove_and_revoke(RemovalFilter::ByEntityId(entity_id.to_string()))
            .await
    }

    pub async fn count_active_sessions(
        &self,
        user_identifier: &str,
        session_type: SessionType,
    ) -> Result<u64, ServiceError> {
        self.store.count_active(user_identifier, session_type).await
    }

    async fn remove_and_revoke(&self, filter: RemovalFilter) -> Result<u64, ServiceError> {
        let removed = self.store.find_and_remove(filter.clone()).await?;
        let count = removed.len() as u64;
        if count == 0 {
            return Ok(0);
        }

        let now = Utc::now();
        let results = futures::future::join_all(removed.into_iter().map(|token| {
            let cache = self.cache.clone();
            async move {
                cache
                    .revoke(&token.value, token.remaining_seconds(now))
                    .await
            }
        }))
        .await;
        for result in results {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to push removed token onto revocation cache");
            }
        }

        tracing::info!(count, filter = ?filter, "Bulk-removed refresh tokens");
        Ok(count)
    }

    /// Cache revocation never gates the caller; failures are logged.
    fn revoke_in_cache(&self, token: RefreshToken) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let ttl = token.remaining_seconds(Utc::now());
            if let Err(e) = cache.revoke(&token.value, ttl).await {
                tracing::error!(error = %e, "Failed to push token onto revocation cache");
            }
        });
    }

    /// Mobile user sessions report "verification required" on expiry so the
    /// client routes into re-authentication instead of plain sign-in.
    fn expired_error(&self, session_type: SessionType) -> ServiceError {
        match session_type {
            SessionType::User | SessionType::EResident => {
                ServiceError::unauthorized_with(ProcessCode::VerificationRequired)
            }
            _ => ServiceError::unauthorized(),
        }
    }
}
