//! Refresh token document backing short-lived signed access tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::auth_schema::AuthMethod;

/// Classification of the credential holder, driving default lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    User,
    CabinetUser,
    EResident,
    EResidentApplicant,
    PortalUser,
    Partner,
    Acquirer,
    ServiceEntrance,
}

impl SessionType {
    /// Prefix baked into the stable user identifier for this session class.
    pub fn identifier_prefix(&self) -> &'static str {
        match self {
            Self::User => "",
            Self::CabinetUser => "cab.",
            Self::EResident => "er.",
            Self::EResidentApplicant => "era.",
            Self::PortalUser => "portal.",
            Self::Partner => "partner.",
            Self::Acquirer => "acq.",
            Self::ServiceEntrance => "svc.",
        }
    }

    /// Session types whose tokens also carry an absolute expiration date.
    pub fn has_absolute_expiration(&self) -> bool {
        matches!(self, Self::CabinetUser | Self::ServiceEntrance)
    }
}

/// Audit descriptor of how a session was established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEntryPoint {
    pub target: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    pub is_bank_id: bool,
}

/// Long-lived session credential. The `value` is what callers present and
/// is rotated in place on every refresh; the row identity (`id`) never
/// changes for the lifetime of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshToken {
    #[serde(rename = "_id")]
    pub id: String,
    pub value: String,
    pub session_type: SessionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Epoch milliseconds.
    pub expiration_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<AuthEntryPoint>,
    #[serde(default)]
    pub entry_point_history: Vec<AuthEntryPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_compromised: bool,
    #[serde(default)]
    pub expired: bool,
    pub last_activity_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(session_type: SessionType, lifetime_ms: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            value: Uuid::new_v4().to_string(),
            session_type,
            mobile_uid: None,
            user_identifier: None,
            entity_id: None,
            login: None,
            expiration_time: now.timestamp_millis() + lifetime_ms,
            expiration_date: None,
            entry_point: None,
            entry_point_history: Vec::new(),
            platform_type: None,
            platform_version: None,
            app_version: None,
            is_deleted: false,
            is_compromised: false,
            expired: false,
            last_activity_date: now,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.expired || self.expiration_time <= now.timestamp_millis() {
            return true;
        }
        match self.expiration_date {
            Some(date) => date <= now,
            None => false,
        }
    }

    /// Remaining lifetime in whole seconds, never negative. Used as the TTL
    /// when the value is pushed onto the revocation cache.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        ((self.expiration_time - now.timestamp_millis()) / 1000).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_token_is_not_expired() {
        let now = Utc::now();
        let token = RefreshToken::new(SessionType::User, 60_000, now);
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::milliseconds(60_001)));
    }

    #[test]
    fn absolute_expiration_date_caps_the_lifetime() {
        let now = Utc::now();
        let mut token = RefreshToken::new(SessionType::CabinetUser, 3_600_000, now);
        token.expiration_date = Some(now + Duration::minutes(5));
        assert!(!token.is_expired_at(now + Duration::minutes(4)));
        assert!(token.is_expired_at(now + Duration::minutes(6)));
    }

    #[test]
    fn remaining_seconds_never_negative() {
        let now = Utc::now();
        let token = RefreshToken::new(SessionType::User, 30_000, now);
        assert_eq!(token.remaining_seconds(now), 30);
        assert_eq!(token.remaining_seconds(now + Duration::seconds(60)), 0);
    }

    #[test]
    fn identifier_prefix_varies_by_session_type() {
        assert_eq!(SessionType::User.identifier_prefix(), "");
        assert_eq!(SessionType::EResident.identifier_prefix(), "er.");
        assert!(SessionType::CabinetUser.has_absolute_expiration());
        assert!(!SessionType::User.has_absolute_expiration());
    }
}
