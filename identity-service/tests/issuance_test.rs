mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{headers, token_harness};
use identity_service::models::{AuthMethod, RefreshToken, SessionType, VerifiedIdentity};
use identity_service::services::{
    MockNotificationProvider, MockProfileGateway, MockSessionSigner, TokenIssuanceCoordinator,
};
use secrecy::SecretString;

struct IssuanceHarness {
    coordinator: TokenIssuanceCoordinator,
    tokens: common::TokenHarness,
    notify: Arc<MockNotificationProvider>,
    profile: Arc<MockProfileGateway>,
}

fn issuance_harness() -> IssuanceHarness {
    let tokens = token_harness();
    let notify = Arc::new(MockNotificationProvider::new());
    let profile = Arc::new(MockProfileGateway::new());
    let coordinator = TokenIssuanceCoordinator::new(
        tokens.tokens.clone(),
        Arc::new(MockSessionSigner),
        notify.clone(),
        profile.clone(),
        SecretString::new("pepper".to_string()),
    );
    IssuanceHarness {
        coordinator,
        tokens,
        notify,
        profile,
    }
}

fn bank_identity() -> VerifiedIdentity {
    VerifiedIdentity {
        natural_key: "1234567890".to_string(),
        method: AuthMethod::BankId,
        document_type: Some("internal-passport".to_string()),
        bank_id: Some("bank-77".to_string()),
    }
}

#[test]
fn stable_identifier_is_deterministic_and_prefixed() {
    let h = issuance_harness();

    let a = h.coordinator.stable_identifier("1234567890", SessionType::User);
    let b = h.coordinator.stable_identifier("1234567890", SessionType::User);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64); // bare hex digest, no prefix for end users

    let er = h
        .coordinator
        .stable_identifier("1234567890", SessionType::EResident);
    assert!(er.starts_with("er."));
    assert_ne!(a, er);

    let other = h.coordinator.stable_identifier("0987654321", SessionType::User);
    assert_ne!(a, other);
}

#[tokio::test]
async fn issue_creates_one_token_with_entry_point_and_signs_it() {
    let h = issuance_harness();
    let hdrs = headers();

    let issued = h
        .coordinator
        .issue(&bank_identity(), SessionType::User, &hdrs)
        .await
        .unwrap();

    let stored = h.tokens.store.tokens.lock().unwrap();
    assert_eq!(stored.len(), 1);
    let row = &stored[0];
    assert_eq!(row.value, issued.refresh_value);
    assert_eq!(row.mobile_uid.as_deref(), Some("device-1"));
    assert_eq!(row.user_identifier.as_deref(), Some(issued.identifier.as_str()));

    let entry_point = row.entry_point.as_ref().unwrap();
    assert_eq!(entry_point.target, AuthMethod::BankId);
    assert_eq!(entry_point.bank.as_deref(), Some("bank-77"));
    assert!(entry_point.is_bank_id);

    assert_eq!(
        issued.token,
        format!("signed.{}.{}", issued.identifier, issued.refresh_value)
    );
}

#[tokio::test]
async fn issue_clears_prior_device_sessions() {
    let h = issuance_harness();
    let hdrs = headers();

    let mut stale = RefreshToken::new(SessionType::User, 60_000, Utc::now());
    stale.mobile_uid = Some(hdrs.mobile_uid.clone());
    stale.user_identifier = Some("someone-else".to_string());
    h.tokens.store.tokens.lock().unwrap().push(stale.clone());

    h.coordinator
        .issue(&bank_identity(), SessionType::User, &hdrs)
        .await
        .unwrap();

    let stored = h.tokens.store.tokens.lock().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored.iter().all(|t| t.value != stale.value));
    // The discarded credential lands on the revocation list.
    drop(stored);
    let entries = h.tokens.cache.entries.lock().unwrap();
    assert!(entries.contains_key(&stale.value));
}

#[tokio::test]
async fn profile_side_effects_run_and_new_device_alert_requires_other_sessions() {
    let h = issuance_harness();
    let hdrs = headers();

    let issued = h
        .coordinator
        .issue(&bank_identity(), SessionType::User, &hdrs)
        .await
        .unwrap();

    assert_eq!(
        h.profile.upserts.lock().unwrap().as_slice(),
        [issued.identifier.clone()]
    );
    assert_eq!(
        h.profile.push_bindings.lock().unwrap().as_slice(),
        [issued.identifier.clone()]
    );
    // Single active session: no alert.
    assert!(h.notify.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_device_login_triggers_the_new_device_alert() {
    let h = issuance_harness();

    let mut first_device = headers();
    first_device.mobile_uid = "device-1".to_string();
    h.coordinator
        .issue(&bank_identity(), SessionType::User, &first_device)
        .await
        .unwrap();

    let mut second_device = headers();
    second_device.mobile_uid = "device-2".to_string();
    let issued = h
        .coordinator
        .issue(&bank_identity(), SessionType::User, &second_device)
        .await
        .unwrap();

    assert_eq!(
        h.notify.alerts.lock().unwrap().as_slice(),
        [issued.identifier]
    );
}

#[tokio::test]
async fn side_effect_failures_do_not_block_the_token() {
    let h = issuance_harness();
    h.profile.fail.store(true, std::sync::atomic::Ordering::SeqCst);

    let issued = h
        .coordinator
        .issue(&bank_identity(), SessionType::User, &headers())
        .await
        .unwrap();
    assert!(!issued.token.is_empty());
}
