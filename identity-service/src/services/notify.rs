//! Best-effort side-effect collaborators fired around token issuance.

use async_trait::async_trait;

use crate::models::AppHeaders;
use crate::services::error::ServiceError;

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Alerts the user that a new device opened a session.
    async fn send_new_device_alert(
        &self,
        user_identifier: &str,
        headers: &AppHeaders,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ProfileGateway: Send + Sync {
    async fn upsert_profile(&self, user_identifier: &str) -> Result<(), ServiceError>;

    /// Re-binds the device push token to the authenticated user.
    async fn bind_push_token(
        &self,
        user_identifier: &str,
        headers: &AppHeaders,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct HttpNotificationProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationProvider {
    pub fn new(base_url: &str) -> Self {
        tracing::info!(base_url = %base_url, "Notification client configured");
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpNotificationProvider {
    async fn send_new_device_alert(
        &self,
        user_identifier: &str,
        headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        let url = format!("{}/notifications/new-device", self.base_url);
        self.client
            .post(&url)
            .json(&serde_json::json!({
                "userIdentifier": user_identifier,
                "mobileUid": headers.mobile_uid,
                "platformType": headers.platform_type,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct HttpProfileGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileGateway {
    pub fn new(base_url: &str) -> Self {
        tracing::info!(base_url = %base_url, "Profile gateway client configured");
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProfileGateway for HttpProfileGateway {
    async fn upsert_profile(&self, user_identifier: &str) -> Result<(), ServiceError> {
        let url = format!("{}/profiles", self.base_url);
        self.client
            .put(&url)
            .json(&serde_json::json!({ "userIdentifier": user_identifier }))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn bind_push_token(
        &self,
        user_identifier: &str,
        headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        let url = format!("{}/profiles/push-token", self.base_url);
        self.client
            .post(&url)
            .json(&serde_json::json!({
                "userIdentifier": user_identifier,
                "mobileUid": headers.mobile_uid,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?
            .error_for_status()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

/// Recording mocks for tests.
#[derive(Default)]
pub struct MockNotificationProvider {
    pub alerts: std::sync::Mutex<Vec<String>>,
}

impl MockNotificationProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationProvider for MockNotificationProvider {
    async fn send_new_device_alert(
        &self,
        user_identifier: &str,
        _headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        self.alerts
            .lock()
            .expect("mock notifications mutex")
            .push(user_identifier.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockProfileGateway {
    pub upserts: std::sync::Mutex<Vec<String>>,
    pub push_bindings: std::sync::Mutex<Vec<String>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockProfileGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileGateway for MockProfileGateway {
    async fn upsert_profile(&self, user_identifier: &str) -> Result<(), ServiceError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "profile gateway unavailable"
            )));
        }
        self.upserts
            .lock()
            .expect("mock profile mutex")
            .push(user_identifier.to_string());
        Ok(())
    }

    async fn bind_push_token(
        &self,
        user_identifier: &str,
        _headers: &AppHeaders,
    ) -> Result<(), ServiceError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "profile gateway unavailable"
            )));
        }
        self.push_bindings
            .lock()
            .expect("mock profile mutex")
            .push(user_identifier.to_string());
        Ok(())
    }
}
