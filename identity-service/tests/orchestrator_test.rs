mod common;

use chrono::{Duration, Utc};
use common::{harness_with_schemas, headers, orchestrator_harness, user};
use identity_service::models::{
    AuthMethod, AuthProcess, ProcessStatus, SchemaCode,
};
use identity_service::schema::registry::default_schemas;
use identity_service::services::{CompleteStepsArgs, ProcessCode, ProcessStore, ServiceError};
use serde_json::json;

fn no_params() -> serde_json::Value {
    json!({})
}

#[tokio::test]
async fn new_process_lists_root_methods() {
    let h = orchestrator_harness();

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &headers(), None, None)
        .await
        .unwrap();

    assert!(!res.skip_auth_methods);
    assert_eq!(res.title, "Authorization");
    assert_eq!(
        res.auth_methods.unwrap(),
        vec![
            AuthMethod::BankId,
            AuthMethod::Monobank,
            AuthMethod::PrivatBank,
            AuthMethod::Nfc,
        ]
    );

    let process = h.store.find_by_id(&res.process_id).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Processing);
    assert!(process.steps.is_empty());
}

#[tokio::test]
async fn unknown_schema_code_is_a_validation_error() {
    let h = orchestrator_harness();
    let err = h
        .orchestrator
        .get_auth_methods("no-such-flow", &headers(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn user_required_schema_rejects_anonymous_calls() {
    let h = orchestrator_harness();
    let err = h
        .orchestrator
        .get_auth_methods("prolong", &headers(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn loading_a_foreign_process_is_denied() {
    let h = orchestrator_harness();
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &headers(), None, None)
        .await
        .unwrap();

    let mut other_device = headers();
    other_device.mobile_uid = "device-2".to_string();
    let err = h
        .orchestrator
        .get_auth_methods("authorization", &other_device, Some(&res.process_id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied { .. }));

    let err = h
        .orchestrator
        .get_auth_methods("authorization", &headers(), Some("missing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn bank_chain_walks_to_photo_then_succeeds() {
    let h = orchestrator_harness();
    let hdrs = headers();

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;

    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap();

    let code = h
        .orchestrator
        .verify_auth_method(AuthMethod::BankId, "req-1", None, &hdrs, &pid, &no_params())
        .await
        .unwrap();
    assert_eq!(code, ProcessCode::BankVerifySuccess);

    // Bank step ended, chain continues at the photo node.
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, Some(&pid), None)
        .await
        .unwrap();
    assert_eq!(res.auth_methods.unwrap(), vec![AuthMethod::PhotoId]);

    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::PhotoId, &pid)
        .await
        .unwrap();
    let code = h
        .orchestrator
        .verify_auth_method(AuthMethod::PhotoId, "req-2", None, &hdrs, &pid, &no_params())
        .await
        .unwrap();
    assert_eq!(code, ProcessCode::PhotoVerifySuccess);

    let process = h.store.find_by_id(&pid).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert!(process.steps.iter().all(|s| s.is_ended()));
}

#[tokio::test]
async fn reselecting_same_method_increments_attempts() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;

    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap();
    let process = h
        .orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap();

    assert_eq!(process.steps.len(), 1);
    assert_eq!(process.last_step().unwrap().attempts, 2);
    assert_eq!(process.last_step().unwrap().verify_attempts, 0);
}

#[tokio::test]
async fn selecting_a_method_outside_the_tree_is_denied() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .set_step_method(None, &hdrs, AuthMethod::Otp, &res.process_id)
        .await
        .unwrap_err();
    match err {
        ServiceError::AccessDenied { code, .. } => {
            assert_eq!(code, Some(ProcessCode::AuthFailed));
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn attempts_exceeded_after_max_reselections() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;

    for _ in 0..3 {
        h.orchestrator
            .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
            .await
            .unwrap();
    }
    let err = h
        .orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap_err();
    match err {
        ServiceError::AccessDenied { code, .. } => {
            assert_eq!(code, Some(ProcessCode::AttemptsExceeded));
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn attempts_exceeded_invokes_the_strategy_hook() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let applicant = user("applicant-1");

    let res = h
        .orchestrator
        .get_auth_methods("e-resident-auth", &hdrs, None, Some(&applicant))
        .await
        .unwrap();
    let pid = res.process_id;

    for _ in 0..3 {
        h.orchestrator
            .set_step_method(Some(&applicant), &hdrs, AuthMethod::Nfc, &pid)
            .await
            .unwrap();
    }
    let err = h
        .orchestrator
        .set_step_method(Some(&applicant), &hdrs, AuthMethod::Nfc, &pid)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied { .. }));

    let reports = h.provider.attempts_exceeded_reports.lock().unwrap();
    assert_eq!(reports.as_slice(), ["applicant-1"]);
}

#[tokio::test]
async fn expired_waiting_period_fails_other_device_processes() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let now = Utc::now();

    // BankId policy allows 180s; this step started 181s ago.
    let mut process = AuthProcess::new(
        SchemaCode::Authorization,
        hdrs.mobile_uid.clone(),
        None,
        now - Duration::milliseconds(181_000),
    );
    process.select_method(AuthMethod::BankId, now - Duration::milliseconds(181_000));
    h.store.insert(&process).await.unwrap();

    let other = AuthProcess::new(
        SchemaCode::Authorization,
        hdrs.mobile_uid.clone(),
        None,
        now,
    );
    h.store.insert(&other).await.unwrap();

    let err = h
        .orchestrator
        .verify_auth_method(
            AuthMethod::BankId,
            "req-1",
            None,
            &hdrs,
            &process.process_id,
            &no_params(),
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::AccessDenied { code, reason } => {
            assert_eq!(code, Some(ProcessCode::WaitingPeriodExpired));
            assert!(reason.contains("waiting period"));
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }

    let other_after = h
        .store
        .find_by_id(&other.process_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other_after.status, ProcessStatus::Failure);
    assert_eq!(other_after.status_history.last().unwrap().status, ProcessStatus::Failure);
}

#[tokio::test]
async fn verify_rejection_carries_the_method_code() {
    let h = orchestrator_harness();
    let hdrs = headers();
    h.provider.reject_method(AuthMethod::BankId, "bank said no");

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;
    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .verify_auth_method(AuthMethod::BankId, "req-1", None, &hdrs, &pid, &no_params())
        .await
        .unwrap_err();
    match err {
        ServiceError::AccessDenied { code, .. } => {
            assert_eq!(code, Some(ProcessCode::BankVerifyFailed));
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }

    // The process itself survives a failed verify so retries can count up.
    let process = h.store.find_by_id(&pid).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Processing);
    assert_eq!(process.last_step().unwrap().verify_attempts, 1);
}

#[tokio::test]
async fn final_allowed_verify_reports_attempts_exhausted() {
    let h = orchestrator_harness();
    let hdrs = headers();
    h.provider.reject_method(AuthMethod::BankId, "bank said no");

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;
    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::BankId, &pid)
        .await
        .unwrap();

    let mut last_code = None;
    for attempt in 1..=3 {
        let err = h
            .orchestrator
            .verify_auth_method(AuthMethod::BankId, "req", None, &hdrs, &pid, &no_params())
            .await
            .unwrap_err();
        last_code = err.process_code();
        if attempt < 3 {
            assert_eq!(last_code, Some(ProcessCode::BankVerifyFailed));
        }
    }
    assert_eq!(last_code, Some(ProcessCode::VerifyAttemptsExceeded));
}

#[tokio::test]
async fn verify_without_a_selected_method_is_denied() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .verify_auth_method(
            AuthMethod::BankId,
            "req-1",
            None,
            &hdrs,
            &res.process_id,
            &no_params(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied { .. }));
}

#[tokio::test]
async fn empty_methods_schema_is_skipped_outright() {
    let mut schemas = default_schemas();
    for schema in schemas.iter_mut() {
        if schema.code == SchemaCode::Prolong {
            schema.methods.clear();
            schema.tree.clear();
            schema.admit_after.clear();
        }
    }
    let h = harness_with_schemas(schemas);
    let hdrs = headers();

    let res = h
        .orchestrator
        .get_auth_methods("prolong", &hdrs, None, Some(&user("user-1")))
        .await
        .unwrap();
    assert!(res.skip_auth_methods);
    assert!(res.auth_methods.is_none());

    let process = h.store.find_by_id(&res.process_id).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert!(process.steps.is_empty());
}

fn completed_authorization(mobile_uid: &str, user_id: &str, completed_ago_ms: i64) -> AuthProcess {
    let now = Utc::now();
    let mut process = AuthProcess::new(
        SchemaCode::Authorization,
        mobile_uid.to_string(),
        Some(user_id.to_string()),
        now - Duration::milliseconds(completed_ago_ms + 2_000),
    );
    process.set_status(
        ProcessStatus::Success,
        now - Duration::milliseconds(completed_ago_ms + 1_000),
    );
    process.set_status(
        ProcessStatus::Completed,
        now - Duration::milliseconds(completed_ago_ms),
    );
    process
}

#[tokio::test]
async fn recent_completion_admits_the_next_schema() {
    let h = orchestrator_harness();
    let hdrs = headers();

    let prior = completed_authorization(&hdrs.mobile_uid, "user-1", 60_000);
    h.store.insert(&prior).await.unwrap();

    let res = h
        .orchestrator
        .get_auth_methods("prolong", &hdrs, None, Some(&user("user-1")))
        .await
        .unwrap();
    assert!(res.skip_auth_methods);

    let process = h.store.find_by_id(&res.process_id).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Success);
    assert_eq!(
        process.admitted_after_process.as_deref(),
        Some(prior.process_id.as_str())
    );
}

#[tokio::test]
async fn admission_outside_the_ttl_window_is_ignored() {
    let h = orchestrator_harness();
    let hdrs = headers();

    let prior = completed_authorization(&hdrs.mobile_uid, "user-1", common::ADMISSION_TTL_MS + 1);
    h.store.insert(&prior).await.unwrap();

    let res = h
        .orchestrator
        .get_auth_methods("prolong", &hdrs, None, Some(&user("user-1")))
        .await
        .unwrap();
    assert!(!res.skip_auth_methods);
    assert_eq!(
        res.auth_methods.unwrap(),
        vec![AuthMethod::Nfc, AuthMethod::PhotoId]
    );
}

#[tokio::test]
async fn revoked_ancestors_no_longer_admit() {
    let h = orchestrator_harness();
    let hdrs = headers();

    let prior = completed_authorization(&hdrs.mobile_uid, "user-1", 60_000);
    h.store.insert(&prior).await.unwrap();

    let revoked = h
        .orchestrator
        .revoke_submit_after_steps(SchemaCode::Prolong, "user-1")
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    let res = h
        .orchestrator
        .get_auth_methods("prolong", &hdrs, None, Some(&user("user-1")))
        .await
        .unwrap();
    assert!(!res.skip_auth_methods);
}

#[tokio::test]
async fn failing_check_carries_its_code_without_hiding_methods() {
    let h = orchestrator_harness();
    let hdrs = headers();
    h.gateway
        .duplicate_identity
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, Some(&user("user-1")))
        .await
        .unwrap();

    assert_eq!(res.process_code, Some(ProcessCode::DuplicateIdentity));
    assert!(res.auth_methods.is_some());
}

#[tokio::test]
async fn complete_on_success_promotes_to_completed() {
    let h = orchestrator_harness();
    let hdrs = headers();
    let cabinet_user = user("cab-user-1");

    let res = h
        .orchestrator
        .get_auth_methods("cabinet-authorization", &hdrs, None, Some(&cabinet_user))
        .await
        .unwrap();
    let pid = res.process_id;

    h.orchestrator
        .set_step_method(Some(&cabinet_user), &hdrs, AuthMethod::Otp, &pid)
        .await
        .unwrap();
    let code = h
        .orchestrator
        .verify_auth_method(AuthMethod::Otp, "req-1", Some(&cabinet_user), &hdrs, &pid, &no_params())
        .await
        .unwrap();
    assert_eq!(code, ProcessCode::OtpVerifySuccess);

    let process = h.store.find_by_id(&pid).await.unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Completed);
}

#[tokio::test]
async fn complete_steps_promotes_the_latest_success() {
    let h = orchestrator_harness();
    let hdrs = headers();

    let res = h
        .orchestrator
        .get_auth_methods("authorization", &hdrs, None, None)
        .await
        .unwrap();
    let pid = res.process_id;
    h.orchestrator
        .set_step_method(None, &hdrs, AuthMethod::Nfc, &pid)
        .await
        .unwrap();
    h.orchestrator
        .verify_auth_method(AuthMethod::Nfc, "req-1", None, &hdrs, &pid, &no_params())
        .await
        .unwrap();

    let args = CompleteStepsArgs {
        codes: vec![SchemaCode::Authorization],
        mobile_uid: hdrs.mobile_uid.clone(),
        user_identifier: None,
    };
    let process = h.orchestrator.complete_steps(args.clone()).await.unwrap();
    assert_eq!(process.status, ProcessStatus::Completed);

    // Still discoverable as a confirmed authentication afterwards.
    let confirmed = h.orchestrator.verify_step_successful(args.clone()).await.unwrap();
    assert_eq!(confirmed.process_id, process.process_id);

    // But a second completion has no Success process left to promote.
    let err = h.orchestrator.complete_steps(args).await.unwrap_err();
    assert!(matches!(err, ServiceError::AccessDenied { .. }));
}
