//! Pre-condition checks run once before the first step of a process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};

use crate::models::{CheckCode, UserInfo};
use crate::services::error::ServiceError;
use crate::services::process_code::ProcessCode;

/// External registries consulted by the checks. Duplicate-identity and
/// termination state live in systems this service does not own.
#[async_trait]
pub trait PreconditionGateway: Send + Sync {
    async fn has_valid_document(&self, user: &UserInfo) -> Result<bool, ServiceError>;
    async fn has_duplicate_identity(&self, user: &UserInfo) -> Result<bool, ServiceError>;
    async fn is_eresident_terminated(&self, user: &UserInfo) -> Result<bool, ServiceError>;
}

pub struct CheckExecutor {
    gateway: Arc<dyn PreconditionGateway>,
    minimum_age_years: u32,
}

impl CheckExecutor {
    pub fn new(gateway: Arc<dyn PreconditionGateway>, minimum_age_years: u32) -> Self {
        Self {
            gateway,
            minimum_age_years,
        }
    }

    /// Runs all schema checks concurrently. The first check that fails with
    /// a carried result code yields that code without failing the method
    /// list; any other error propagates unchanged.
    pub async fn run(
        &self,
        checks: &[CheckCode],
        user: Option<&UserInfo>,
    ) -> Result<Option<ProcessCode>, ServiceError> {
        let Some(user) = user else {
            // Checks are user-scoped; nothing to verify before the user is known.
            return Ok(None);
        };

        let results = futures::future::join_all(
            checks.iter().map(|check| self.run_one(*check, user)),
        )
        .await;

        let mut carried = None;
        for result in results {
            match result? {
                Some(code) if carried.is_none() => carried = Some(code),
                _ => {}
            }
        }
        Ok(carried)
    }

    async fn run_one(
        &self,
        check: CheckCode,
        user: &UserInfo,
    ) -> Result<Option<ProcessCode>, ServiceError> {
        match check {
            CheckCode::DocumentAvailability => {
                if self.gateway.has_valid_document(user).await? {
                    Ok(None)
                } else {
                    Ok(Some(ProcessCode::DocumentNotAvailable))
                }
            }
            CheckCode::DuplicateIdentity => {
                if self.gateway.has_duplicate_identity(user).await? {
                    Ok(Some(ProcessCode::DuplicateIdentity))
                } else {
                    Ok(None)
                }
            }
            CheckCode::EResidentTermination => {
                if self.gateway.is_eresident_terminated(user).await? {
                    Ok(Some(ProcessCode::EResidentTerminated))
                } else {
                    Ok(None)
                }
            }
            CheckCode::MinimumAge => Ok(self.check_minimum_age(user.birth_day)),
        }
    }

    fn check_minimum_age(&self, birth_day: Option<NaiveDate>) -> Option<ProcessCode> {
        let birth_day = birth_day?;
        let today = Utc::now().date_naive();
        let mut age = today.year() - birth_day.year();
        if (today.month(), today.day()) < (birth_day.month(), birth_day.day()) {
            age -= 1;
        }
        if age < self.minimum_age_years as i32 {
            Some(ProcessCode::UnderageUser)
        } else {
            None
        }
    }
}

/// HTTP gateway to the registries backing the checks.
#[derive(Clone)]
pub struct HttpPreconditionGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPreconditionGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn ask(&self, path: &str, user: &UserInfo) -> Result<bool, ServiceError> {
        let url = format!("{}/checks/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "identifier": user.identifier }))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(body.get("result").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[async_trait]
impl PreconditionGateway for HttpPreconditionGateway {
    async fn has_valid_document(&self, user: &UserInfo) -> Result<bool, ServiceError> {
        self.ask("document-availability", user).await
    }

    async fn has_duplicate_identity(&self, user: &UserInfo) -> Result<bool, ServiceError> {
        self.ask("duplicate-identity", user).await
    }

    async fn is_eresident_terminated(&self, user: &UserInfo) -> Result<bool, ServiceError> {
        self.ask("e-resident-termination", user).await
    }
}

/// Scripted gateway used by tests.
pub struct MockPreconditionGateway {
    pub valid_document: std::sync::atomic::AtomicBool,
    pub duplicate_identity: std::sync::atomic::AtomicBool,
    pub eresident_terminated: std::sync::atomic::AtomicBool,
}

impl Default for MockPreconditionGateway {
    fn default() -> Self {
        Self {
            valid_document: std::sync::atomic::AtomicBool::new(true),
            duplicate_identity: std::sync::atomic::AtomicBool::new(false),
            eresident_terminated: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl MockPreconditionGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreconditionGateway for MockPreconditionGateway {
    async fn has_valid_document(&self, _user: &UserInfo) -> Result<bool, ServiceError> {
        Ok(self.valid_document.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn has_duplicate_identity(&self, _user: &UserInfo) -> Result<bool, ServiceError> {
        Ok(self
            .duplicate_identity
            .load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn is_eresident_terminated(&self, _user: &UserInfo) -> Result<bool, ServiceError> {
        Ok(self
            .eresident_terminated
            .load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn user_with_age(years: i32) -> UserInfo {
        let today = Utc::now().date_naive();
        UserInfo {
            identifier: "user-1".to_string(),
            birth_day: NaiveDate::from_ymd_opt(today.year() - years, 1, 1),
            document_number: None,
        }
    }

    #[tokio::test]
    async fn no_user_skips_all_checks() {
        let executor = CheckExecutor::new(Arc::new(MockPreconditionGateway::new()), 14);
        let code = executor
            .run(&[CheckCode::DuplicateIdentity], None)
            .await
            .unwrap();
        assert!(code.is_none());
    }

    #[tokio::test]
    async fn duplicate_identity_carries_its_code() {
        let gateway = Arc::new(MockPreconditionGateway::new());
        gateway.duplicate_identity.store(true, Ordering::SeqCst);
        let executor = CheckExecutor::new(gateway, 14);

        let code = executor
            .run(
                &[CheckCode::DuplicateIdentity, CheckCode::MinimumAge],
                Some(&user_with_age(30)),
            )
            .await
            .unwrap();
        assert_eq!(code, Some(ProcessCode::DuplicateIdentity));
    }

    #[tokio::test]
    async fn underage_user_is_flagged() {
        let executor = CheckExecutor::new(Arc::new(MockPreconditionGateway::new()), 14);
        let code = executor
            .run(&[CheckCode::MinimumAge], Some(&user_with_age(12)))
            .await
            .unwrap();
        assert_eq!(code, Some(ProcessCode::UnderageUser));
    }

    #[tokio::test]
    async fn passing_checks_carry_nothing() {
        let executor = CheckExecutor::new(Arc::new(MockPreconditionGateway::new()), 14);
        let code = executor
            .run(
                &[
                    CheckCode::DocumentAvailability,
                    CheckCode::DuplicateIdentity,
                    CheckCode::MinimumAge,
                ],
                Some(&user_with_age(30)),
            )
            .await
            .unwrap();
        assert!(code.is_none());
    }
}
