mod common;

use chrono::Utc;
use common::token_harness;
use identity_service::models::{AuthEntryPoint, AuthMethod, RefreshToken, SessionType};
use identity_service::services::{CreateTokenOps, ProcessCode, RefreshOps, ServiceError};

use common::headers;

fn user_ops(mobile_uid: &str, user: &str) -> CreateTokenOps {
    CreateTokenOps {
        mobile_uid: Some(mobile_uid.to_string()),
        user_identifier: Some(user.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_uses_session_type_default_lifetime() {
    let h = token_harness();
    let before = Utc::now().timestamp_millis();

    let token = h
        .tokens
        .create("trace-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    let lifetime = token.expiration_time - before;
    assert!(lifetime >= 2_592_000_000 && lifetime <= 2_592_000_000 + 5_000);
    assert!(token.expiration_date.is_none());
    assert!(!token.is_deleted);
}

#[tokio::test]
async fn custom_lifetime_overrides_the_default() {
    let h = token_harness();
    let before = Utc::now().timestamp_millis();

    let token = h
        .tokens
        .create(
            "trace-1",
            SessionType::User,
            CreateTokenOps {
                custom_lifetime_ms: Some(60_000),
                ..user_ops("device-1", "user-1")
            },
            None,
        )
        .await
        .unwrap();

    let lifetime = token.expiration_time - before;
    assert!(lifetime >= 60_000 && lifetime <= 65_000);
}

#[tokio::test]
async fn cabinet_sessions_carry_an_absolute_expiration_date() {
    let h = token_harness();
    let token = h
        .tokens
        .create(
            "trace-1",
            SessionType::CabinetUser,
            user_ops("device-1", "cab-1"),
            None,
        )
        .await
        .unwrap();
    assert!(token.expiration_date.is_some());
}

#[tokio::test]
async fn issuance_discards_sibling_tokens() {
    let h = token_harness();

    h.tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();
    h.tokens
        .create("t-2", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    let stored = h.store.tokens.lock().unwrap();
    assert_eq!(stored.len(), 1, "sibling row must be hard-deleted");
}

#[tokio::test]
async fn refresh_rotates_value_in_place() {
    let h = token_harness();
    let token = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    let projection = h
        .tokens
        .refresh(
            &token.value,
            SessionType::User,
            RefreshOps {
                mobile_uid: Some("device-1".to_string()),
                prolong_lifetime: false,
                entry_point: None,
            },
            Some(&headers()),
        )
        .await
        .unwrap();

    assert_ne!(projection.value, token.value);
    assert_eq!(projection.expiration_time, token.expiration_time);

    let stored = h.store.tokens.lock().unwrap();
    assert_eq!(stored.len(), 1);
    let row = &stored[0];
    // Same row identity, new value, old value unusable.
    assert_eq!(row.id, token.id);
    assert_eq!(row.value, projection.value);
    assert_eq!(row.expiration_time, token.expiration_time);
}

#[tokio::test]
async fn refresh_with_prolong_extends_expiration() {
    let h = token_harness();
    let token = h
        .tokens
        .create(
            "t-1",
            SessionType::User,
            CreateTokenOps {
                custom_lifetime_ms: Some(60_000),
                ..user_ops("device-1", "user-1")
            },
            None,
        )
        .await
        .unwrap();

    let projection = h
        .tokens
        .refresh(
            &token.value,
            SessionType::User,
            RefreshOps {
                mobile_uid: Some("device-1".to_string()),
                prolong_lifetime: true,
                entry_point: None,
            },
            None,
        )
        .await
        .unwrap();
    assert!(projection.expiration_time > token.expiration_time);
}

#[tokio::test]
async fn stale_value_loses_the_rotation_race() {
    let h = token_harness();
    let token = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    let ops = || RefreshOps {
        mobile_uid: Some("device-1".to_string()),
        prolong_lifetime: false,
        entry_point: None,
    };

    h.tokens
        .refresh(&token.value, SessionType::User, ops(), None)
        .await
        .unwrap();

    // The same stale value again: zero matched rows, unauthorized.
    let err = h
        .tokens
        .refresh(&token.value, SessionType::User, ops(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));
}

#[tokio::test]
async fn expired_user_session_asks_for_verification() {
    let h = token_harness();
    let token = h
        .tokens
        .create(
            "t-1",
            SessionType::User,
            CreateTokenOps {
                custom_lifetime_ms: Some(-1_000),
                ..user_ops("device-1", "user-1")
            },
            None,
        )
        .await
        .unwrap();

    let err = h
        .tokens
        .refresh(
            &token.value,
            SessionType::User,
            RefreshOps {
                mobile_uid: Some("device-1".to_string()),
                prolong_lifetime: false,
                entry_point: None,
            },
            None,
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::Unauthorized { code } => {
            assert_eq!(code, Some(ProcessCode::VerificationRequired));
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn validate_is_read_only_and_checks_expiry() {
    let h = token_harness();
    let hdrs = headers();
    let token = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), Some(&hdrs))
        .await
        .unwrap();

    h.tokens
        .validate(&token.value, &hdrs, SessionType::User)
        .await
        .unwrap();

    let err = h
        .tokens
        .validate("unknown-value", &hdrs, SessionType::User)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));
}

#[tokio::test]
async fn logout_deletes_target_and_siblings_and_revokes() {
    let h = token_harness();
    let token = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    // A sibling row that slipped past issuance cleanup.
    let mut sibling = RefreshToken::new(SessionType::User, 60_000, Utc::now());
    sibling.mobile_uid = Some("device-1".to_string());
    sibling.user_identifier = Some("user-1".to_string());
    h.store.tokens.lock().unwrap().push(sibling.clone());

    h.tokens
        .logout_user(&token.value, "device-1", "user-1", SessionType::User)
        .await
        .unwrap();

    // Revocation is pushed off the call path.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    {
        let stored = h.store.tokens.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, token.id);
        assert!(stored[0].is_deleted);
    }
    let entries = h.cache.entries.lock().unwrap();
    let ttl = entries.get(&token.value).copied().expect("value revoked");
    assert!(ttl > 0);
}

#[tokio::test]
async fn logout_replay_is_unauthorized() {
    let h = token_harness();
    let token = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();

    h.tokens
        .logout_user(&token.value, "device-1", "user-1", SessionType::User)
        .await
        .unwrap();
    let err = h
        .tokens
        .logout_user(&token.value, "device-1", "user-1", SessionType::User)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized { .. }));
}

#[tokio::test]
async fn expiry_sweep_flags_overdue_mobile_tokens() {
    let h = token_harness();
    let now = Utc::now();

    for i in 0..3 {
        let mut overdue = RefreshToken::new(SessionType::User, -1_000, now);
        overdue.mobile_uid = Some(format!("device-{i}"));
        h.store.tokens.lock().unwrap().push(overdue);
    }
    let mut fresh = RefreshToken::new(SessionType::User, 60_000, now);
    fresh.mobile_uid = Some("device-9".to_string());
    h.store.tokens.lock().unwrap().push(fresh);
    // Overdue but not mobile-bound: outside the sweep's scope.
    let unbound = RefreshToken::new(SessionType::Partner, -1_000, now);
    h.store.tokens.lock().unwrap().push(unbound);

    let flagged = h.tokens.check_refresh_tokens_expiration().await.unwrap();
    assert_eq!(flagged, 3);

    // Idempotent: the second pass finds nothing.
    let flagged = h.tokens.check_refresh_tokens_expiration().await.unwrap();
    assert_eq!(flagged, 0);

    let stored = h.store.tokens.lock().unwrap();
    assert_eq!(stored.iter().filter(|t| t.expired).count(), 3);
}

#[tokio::test]
async fn bulk_removal_revokes_each_value() {
    let h = token_harness();

    let first = h
        .tokens
        .create("t-1", SessionType::User, user_ops("device-1", "user-1"), None)
        .await
        .unwrap();
    let second = h
        .tokens
        .create("t-2", SessionType::User, user_ops("device-2", "user-1"), None)
        .await
        .unwrap();

    let removed = h
        .tokens
        .remove_tokens_by_user_identifier("user-1")
        .await
        .unwrap();
    assert_eq!(removed, 2);

    assert!(h.store.tokens.lock().unwrap().is_empty());
    let entries = h.cache.entries.lock().unwrap();
    assert!(entries.contains_key(&first.value));
    assert!(entries.contains_key(&second.value));
}

#[tokio::test]
async fn entry_point_history_is_tracked_on_refresh() {
    let h = token_harness();
    let entry = |method: AuthMethod| AuthEntryPoint {
        target: method,
        document: None,
        bank: None,
        is_bank_id: matches!(method, AuthMethod::BankId),
    };

    let token = h
        .tokens
        .create(
            "t-1",
            SessionType::User,
            CreateTokenOps {
                entry_point: Some(entry(AuthMethod::BankId)),
                ..user_ops("device-1", "user-1")
            },
            None,
        )
        .await
        .unwrap();

    h.tokens
        .refresh(
            &token.value,
            SessionType::User,
            RefreshOps {
                mobile_uid: Some("device-1".to_string()),
                prolong_lifetime: false,
                entry_point: Some(entry(AuthMethod::Nfc)),
            },
            None,
        )
        .await
        .unwrap();

    let stored = h.store.tokens.lock().unwrap();
    let row = &stored[0];
    assert_eq!(row.entry_point.as_ref().unwrap().target, AuthMethod::Nfc);
    assert_eq!(row.entry_point_history.len(), 2);
    assert_eq!(row.entry_point_history[0].target, AuthMethod::BankId);
}
