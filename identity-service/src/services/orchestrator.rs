//! Step orchestrator: drives the per-process authentication state machine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    AppHeaders, AuthMethod, AuthProcess, AuthSchema, Condition, ProcessStatus, SchemaCode,
    SchemaNode, UserInfo,
};
use crate::schema::SchemaRegistry;
use crate::services::checks::CheckExecutor;
use crate::services::error::ServiceError;
use crate::services::process_code::{ProcessCode, ProcessCodeDefiner};
use crate::services::process_store::ProcessStore;
use crate::strategy::{AuthMethodStrategy, StrategyRejection, StrategySet, VerifyContext};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethodsResponse {
    pub process_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_methods: Option<Vec<AuthMethod>>,
    pub skip_auth_methods: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_code: Option<ProcessCode>,
}

#[derive(Debug, Clone)]
pub struct CompleteStepsArgs {
    pub codes: Vec<SchemaCode>,
    pub mobile_uid: String,
    pub user_identifier: Option<String>,
}

/// A step-chain rule violation. `cleanup` says whether the device's other
/// in-flight processes are failed alongside surfacing the error.
struct ChainViolation {
    reason: String,
    code: Option<ProcessCode>,
    cleanup: bool,
}

impl ChainViolation {
    fn new(code: ProcessCode, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: Some(code),
            cleanup: true,
        }
    }

    fn into_error(self) -> ServiceError {
        ServiceError::AccessDenied {
            reason: self.reason,
            code: self.code,
        }
    }
}

enum VerifyFailure {
    Rejected(StrategyRejection),
    Violated(ChainViolation),
    Other(ServiceError),
}

impl From<ServiceError> for VerifyFailure {
    fn from(err: ServiceError) -> Self {
        VerifyFailure::Other(err)
    }
}

#[derive(Clone)]
pub struct StepOrchestrator {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn ProcessStore>,
    strategies: Arc<StrategySet>,
    checks: Arc<CheckExecutor>,
    admission_steps_ttl_ms: i64,
}

impl StepOrchestrator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn ProcessStore>,
        strategies: Arc<StrategySet>,
        checks: Arc<CheckExecutor>,
        admission_steps_ttl_ms: i64,
    ) -> Self {
        Self {
            registry,
            store,
            strategies,
            checks,
            admission_steps_ttl_ms,
        }
    }

    /// Entry point of every flow: resolves the schema, creates or loads the
    /// process, evaluates skip/admission rules and pre-condition checks, and
    /// reports the methods eligible at the current tree position.
    pub async fn get_auth_methods(
        &self,
        raw_code: &str,
        headers: &AppHeaders,
        process_id: Option<&str>,
        user: Option<&UserInfo>,
    ) -> Result<AuthMethodsResponse, ServiceError> {
        let schema = self.registry.resolve(raw_code)?;
        let strategy = self.strategies.get(schema.code);

        if strategy.is_user_required() && user.is_none() {
            return Err(ServiceError::Validation(format!(
                "schema '{}' requires an authenticated user",
                schema.code.as_str()
            )));
        }

        let now = Utc::now();
        let mut process = match process_id {
            None => {
                let process = AuthProcess::new(
                    schema.code,
                    headers.mobile_uid.clone(),
                    user.map(|u| u.identifier.clone()),
                    now,
                );
                self.store.insert(&process).await?;

                // Any older in-flight process for this device is dead now;
                // failing them does not gate the response.
                let store = self.store.clone();
                let mobile_uid = headers.mobile_uid.clone();
                let fresh_id = process.process_id.clone();
                tokio::spawn(async move {
                    match store
                        .fail_other_processing(&mobile_uid, Some(fresh_id.as_str()), Utc::now())
                        .await
                    {
                        Ok(0) => {}
                        Ok(failed) => {
                            tracing::info!(mobile_uid = %mobile_uid, failed, "Failed stale auth processes");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, mobile_uid = %mobile_uid, "Failed to clean up stale auth processes");
                        }
                    }
                });

                process
            }
            Some(process_id) => {
                self.load_processing(process_id, &headers.mobile_uid, Some(schema.code))
                    .await?
            }
        };

        if process.steps.is_empty() && !process.is_revoked {
            if let Some(response) = self
                .evaluate_skip(schema, &mut process, user, now)
                .await?
            {
                return Ok(response);
            }
        }

        let process_code = if process.steps.is_empty() {
            self.checks.run(&schema.checks, user).await?
        } else {
            None
        };

        let completed = process.completed_methods();
        let Some(position) = schema.node_after(&completed) else {
            self.fail_device_processes(&headers.mobile_uid, Some(process.process_id.as_str()))
                .await;
            return Err(ServiceError::AccessDenied {
                reason: "auth method chain ended".to_string(),
                code: Some(strategy.ended_chain_code()),
            });
        };

        let auth_methods = eligible_methods(schema, &completed, position);

        Ok(AuthMethodsResponse {
            process_id: process.process_id,
            title: schema.title.clone(),
            auth_methods: Some(auth_methods),
            skip_auth_methods: false,
            process_code,
        })
    }

    /// Selects (or re-selects) the method for the active step.
    pub async fn set_step_method(
        &self,
        user: Option<&UserInfo>,
        headers: &AppHeaders,
        method: AuthMethod,
        process_id: &str,
    ) -> Result<AuthProcess, ServiceError> {
        let mut process = self
            .load_processing(process_id, &headers.mobile_uid, None)
            .await?;
        let schema = self.registry.get(process.code)?;
        let strategy = self.strategies.get(process.code);
        let now = Utc::now();

        process.select_method(method, now);
        if process.user_identifier.is_none() {
            process.user_identifier = user.map(|u| u.identifier.clone());
        }
        self.persist_processing(&process).await?;

        if let Err(violation) = self
            .validate_chain(schema, strategy, &process, method, user, headers, false, now)
            .await?
        {
            if violation.cleanup {
                self.fail_device_processes(&headers.mobile_uid, Some(process_id))
                    .await;
            }
            return Err(violation.into_error());
        }

        Ok(process)
    }

    /// Verifies the active step through the schema's strategy and resolves
    /// the caller-facing result code.
    #[allow(clippy::too_many_arguments)]
    pub async fn verify_auth_method(
        &self,
        method: AuthMethod,
        request_id: &str,
        user: Option<&UserInfo>,
        headers: &AppHeaders,
        process_id: &str,
        params: &serde_json::Value,
    ) -> Result<ProcessCode, ServiceError> {
        let mut process = self
            .load_processing(process_id, &headers.mobile_uid, None)
            .await?;
        let schema = self.registry.get(process.code)?;
        let strategy = self.strategies.get(process.code);
        let now = Utc::now();

        if process.steps.is_empty() {
            self.fail_device_processes(&headers.mobile_uid, Some(process_id))
                .await;
            return Err(ServiceError::access_denied(
                "auth process has no selected method",
            ));
        }

        // The attempt is burned before anything can still reject it.
        if let Some(last) = process.last_step_mut() {
            last.verify_attempts += 1;
        }
        self.persist_processing(&process).await?;

        match self
            .verify_inner(
                schema, strategy, &mut process, method, request_id, user, headers, params, now,
            )
            .await
        {
            Ok(code) => Ok(code),
            Err(VerifyFailure::Other(err)) => Err(err),
            Err(failure) => {
                // Decide whether this was the final allowed attempt before
                // surfacing the rejection.
                let exhausted = match self
                    .validate_chain(schema, strategy, &process, method, user, headers, true, now)
                    .await?
                {
                    Err(violation) => Some(violation),
                    Ok(()) => None,
                };

                let cleanup = match (&failure, &exhausted) {
                    (_, Some(violation)) => violation.cleanup,
                    (VerifyFailure::Violated(violation), None) => violation.cleanup,
                    _ => true,
                };
                if cleanup {
                    self.fail_device_processes(&headers.mobile_uid, Some(process_id))
                        .await;
                }

                let exhausted_code = exhausted.and_then(|violation| violation.code);
                let (code, reason) = match failure {
                    VerifyFailure::Rejected(rejection) => (rejection.code, rejection.reason),
                    VerifyFailure::Violated(violation) => (violation.code, violation.reason),
                    VerifyFailure::Other(_) => unreachable!("handled above"),
                };
                Err(ServiceError::AccessDenied {
                    reason,
                    code: exhausted_code.or(code).or(Some(ProcessCode::AuthFailed)),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_inner(
        &self,
        schema: &AuthSchema,
        strategy: &dyn AuthMethodStrategy,
        process: &mut AuthProcess,
        method: AuthMethod,
        request_id: &str,
        user: Option<&UserInfo>,
        headers: &AppHeaders,
        params: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ProcessCode, VerifyFailure> {
        if let Err(violation) = self
            .validate_chain(schema, strategy, process, method, user, headers, false, now)
            .await?
        {
            return Err(VerifyFailure::Violated(violation));
        }

        let conditions = strategy
            .verify(VerifyContext {
                method,
                request_id,
                steps: &process.steps,
                user,
                headers,
                params,
            })
            .await
            .map_err(VerifyFailure::Rejected)?;
        process.add_conditions(conditions);

        // The strategy call is a suspension point of unknown duration; the
        // process is re-validated against the store on the write below.
        let finished = finish_if_satisfied(schema, process, now)?;
        self.persist_processing(process).await?;

        let mut status = if finished {
            ProcessStatus::Success
        } else {
            ProcessStatus::Processing
        };

        if finished && strategy.complete_on_success() {
            // Re-check through an independent query so a concurrent
            // completion cannot be double-applied from stale memory.
            if let Some(fresh) = self.store.find_by_id(&process.process_id).await? {
                if fresh.status == ProcessStatus::Success {
                    let matched = self
                        .store
                        .promote(
                            &process.process_id,
                            ProcessStatus::Success,
                            ProcessStatus::Completed,
                            now,
                        )
                        .await?;
                    if matched > 0 {
                        status = ProcessStatus::Completed;
                    }
                }
            }
        }

        let last = process
            .last_step()
            .ok_or_else(|| ServiceError::Defect("verified process has no steps".to_string()))?;
        let code = ProcessCodeDefiner::on_verify(status, last, strategy.verify_code_table())?;
        Ok(code)
    }

    /// Promotes the newest successful process for the schema(s) to
    /// `Completed`.
    pub async fn complete_steps(
        &self,
        args: CompleteStepsArgs,
    ) -> Result<AuthProcess, ServiceError> {
        let now = Utc::now();
        let mut process = self
            .store
            .find_latest(
                Some(&args.mobile_uid),
                args.user_identifier.as_deref(),
                &args.codes,
                &[ProcessStatus::Success],
            )
            .await?
            .ok_or_else(|| {
                ServiceError::access_denied("no successful auth process to complete")
            })?;

        let matched = self
            .store
            .promote(
                &process.process_id,
                ProcessStatus::Success,
                ProcessStatus::Completed,
                now,
            )
            .await?;
        if matched == 0 {
            return Err(ServiceError::access_denied(
                "auth process changed state during completion",
            ));
        }
        process.set_status(ProcessStatus::Completed, now);
        Ok(process)
    }

    /// Asserts that a successful (or completed) process exists for the
    /// schema(s) and device/user.
    pub async fn verify_step_successful(
        &self,
        args: CompleteStepsArgs,
    ) -> Result<AuthProcess, ServiceError> {
        self.store
            .find_latest(
                Some(&args.mobile_uid),
                args.user_identifier.as_deref(),
                &args.codes,
                &[ProcessStatus::Success, ProcessStatus::Completed],
            )
            .await?
            .ok_or_else(|| ServiceError::access_denied("authentication is not confirmed"))
    }

    /// Revokes every process the schema's admission rules point at, so a
    /// downstream action cannot be admitted twice off the same ancestor.
    pub async fn revoke_submit_after_steps(
        &self,
        code: SchemaCode,
        user_identifier: &str,
    ) -> Result<u64, ServiceError> {
        let schema = self.registry.get(code)?;
        let codes: Vec<SchemaCode> = schema.admit_after.iter().map(|rule| rule.code).collect();
        if codes.is_empty() {
            return Ok(0);
        }
        let revoked = self.store.revoke_matching(user_identifier, &codes).await?;
        tracing::info!(
            schema = %code.as_str(),
            user_identifier = %user_identifier,
            revoked,
            "Revoked admission ancestor processes"
        );
        Ok(revoked)
    }

    async fn evaluate_skip(
        &self,
        schema: &AuthSchema,
        process: &mut AuthProcess,
        user: Option<&UserInfo>,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthMethodsResponse>, ServiceError> {
        if schema.methods.is_empty() {
            process.set_status(ProcessStatus::Success, now);
            self.persist_processing(process).await?;
            return Ok(Some(skip_response(process, schema)));
        }

        if schema.admit_after.is_empty() {
            return Ok(None);
        }
        let user_identifier = match user
            .map(|u| u.identifier.clone())
            .or_else(|| process.user_identifier.clone())
        {
            Some(identifier) => identifier,
            None => return Ok(None),
        };

        let codes: Vec<SchemaCode> = schema.admit_after.iter().map(|rule| rule.code).collect();
        let candidates = self
            .store
            .find_admission_candidates(&user_identifier, &codes)
            .await?;

        for candidate in candidates {
            let Some(rule) = schema.admit_after.iter().find(|r| r.code == candidate.code) else {
                continue;
            };
            let required = rule.admit_after_status.unwrap_or(ProcessStatus::Completed);
            let Some(reached_at) = candidate.status_reached_at(required) else {
                continue;
            };
            if (now - reached_at).num_milliseconds() > self.admission_steps_ttl_ms {
                continue;
            }

            process.admitted_after_process = Some(candidate.process_id.clone());
            process.user_identifier = Some(user_identifier.clone());
            process.set_status(ProcessStatus::Success, now);
            self.persist_processing(process).await?;
            tracing::info!(
                process_id = %process.process_id,
                admitted_after = %candidate.process_id,
                "Auth steps skipped by admission rule"
            );
            return Ok(Some(skip_response(process, schema)));
        }

        Ok(None)
    }

    /// Full step-chain validation, applied to every prior step and then the
    /// active one. Returns the violation instead of failing so callers can
    /// decide on cleanup.
    #[allow(clippy::too_many_arguments)]
    async fn validate_chain(
        &self,
        schema: &AuthSchema,
        strategy: &dyn AuthMethodStrategy,
        process: &AuthProcess,
        method: AuthMethod,
        user: Option<&UserInfo>,
        headers: &AppHeaders,
        throw_on_last_attempt: bool,
        now: DateTime<Utc>,
    ) -> Result<Result<(), ChainViolation>, ServiceError> {
        let mut position = &schema.tree;

        for step in &process.steps {
            if step.is_ended() {
                match position.get(&step.method) {
                    Some(node) => position = &node.children,
                    None => {
                        return Ok(Err(ChainViolation::new(
                            strategy.ended_chain_code(),
                            "auth method chain ended",
                        )));
                    }
                }
                continue;
            }

            if step.method != method {
                return Ok(Err(ChainViolation {
                    reason: "provided method is not expected".to_string(),
                    code: Some(ProcessCode::AuthFailed),
                    cleanup: true,
                }));
            }

            let Some(policy) = position.get(&step.method).and_then(|n| n.policy.as_ref()) else {
                continue;
            };

            if policy.max_verify_attempts > 1
                && (step.verify_attempts > policy.max_verify_attempts
                    || (throw_on_last_attempt
                        && step.verify_attempts == policy.max_verify_attempts))
            {
                return Ok(Err(ChainViolation {
                    reason: "verify attempts exceeded".to_string(),
                    code: Some(ProcessCode::VerifyAttemptsExceeded),
                    cleanup: step.attempts >= policy.max_attempts,
                }));
            }

            if step.attempts > policy.max_attempts
                || (throw_on_last_attempt && step.attempts == policy.max_attempts)
            {
                strategy.on_attempts_exceeded(user, headers).await?;
                return Ok(Err(ChainViolation::new(
                    ProcessCode::AttemptsExceeded,
                    "attempts exceeded",
                )));
            }

            if (now - step.start_date).num_milliseconds() > policy.ttl_ms {
                return Ok(Err(ChainViolation::new(
                    ProcessCode::WaitingPeriodExpired,
                    "waiting period expired",
                )));
            }
        }

        // Verification always targets an active step; an ended tail means
        // the caller skipped method selection.
        if let Some(last) = process.steps.last() {
            if last.is_ended() {
                let reason = if last.method == method {
                    "step already ended"
                } else {
                    "provided method is not expected"
                };
                return Ok(Err(ChainViolation {
                    reason: reason.to_string(),
                    code: Some(ProcessCode::AuthFailed),
                    cleanup: true,
                }));
            }
        }

        if !position.contains_key(&method) {
            return Ok(Err(ChainViolation {
                reason: "method is not allowed at this step".to_string(),
                code: Some(ProcessCode::AuthFailed),
                cleanup: true,
            }));
        }

        Ok(Ok(()))
    }

    async fn load_processing(
        &self,
        process_id: &str,
        mobile_uid: &str,
        code: Option<SchemaCode>,
    ) -> Result<AuthProcess, ServiceError> {
        let process = self
            .store
            .find_by_id(process_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("auth process not found".to_string()))?;

        if process.mobile_uid != mobile_uid {
            return Err(ServiceError::access_denied(
                "auth process belongs to another device",
            ));
        }
        if let Some(code) = code {
            if process.code != code {
                return Err(ServiceError::access_denied(
                    "auth process belongs to another schema",
                ));
            }
        }
        if process.status != ProcessStatus::Processing {
            return Err(ServiceError::access_denied("auth process is not active"));
        }
        Ok(process)
    }

    async fn persist_processing(&self, process: &AuthProcess) -> Result<(), ServiceError> {
        let matched = self.store.update_processing(process).await?;
        if matched == 0 {
            return Err(ServiceError::access_denied(
                "auth process changed state concurrently",
            ));
        }
        Ok(())
    }

    /// Business rejections take the device's other in-flight processes down
    /// with them. Cleanup failures are logged, never surfaced.
    async fn fail_device_processes(&self, mobile_uid: &str, except_process_id: Option<&str>) {
        if let Err(e) = self
            .store
            .fail_other_processing(mobile_uid, except_process_id, Utc::now())
            .await
        {
            tracing::error!(error = %e, mobile_uid = %mobile_uid, "Failed to fail device auth processes");
        }
    }
}

fn skip_response(process: &AuthProcess, schema: &AuthSchema) -> AuthMethodsResponse {
    AuthMethodsResponse {
        process_id: process.process_id.clone(),
        title: schema.title.clone(),
        auth_methods: None,
        skip_auth_methods: true,
        process_code: None,
    }
}

/// Methods eligible at the current tree position, in schema order at the
/// root and name order deeper down.
fn eligible_methods(
    schema: &AuthSchema,
    completed: &[AuthMethod],
    position: &HashMap<AuthMethod, SchemaNode>,
) -> Vec<AuthMethod> {
    if completed.is_empty() {
        schema.methods.clone()
    } else {
        let mut methods: Vec<AuthMethod> = position.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}

/// Ends the active step when its node condition is achieved, and promotes
/// the process to `Success` when nothing below the node is outstanding.
fn finish_if_satisfied(
    schema: &AuthSchema,
    process: &mut AuthProcess,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let completed = process.completed_methods();
    let Some(last) = process.last_step() else {
        return Ok(false);
    };
    let last_method = last.method;

    let position = schema.node_after(&completed).ok_or_else(|| {
        ServiceError::Defect("validated step chain no longer matches the schema tree".to_string())
    })?;
    let node = position.get(&last_method).ok_or_else(|| {
        ServiceError::Defect("validated step method missing from the schema tree".to_string())
    })?;

    let step_done = node
        .condition
        .map_or(true, |condition| process.has_condition(condition));
    if !step_done {
        return Ok(false);
    }

    let children = node.children.clone();
    if let Some(step) = process.last_step_mut() {
        step.end_date = Some(now);
    }

    if subtree_satisfied(&children, &process.conditions) {
        process.set_status(ProcessStatus::Success, now);
        return Ok(true);
    }
    Ok(false)
}

/// A subtree is outstanding while any node in it requires a condition that
/// has not been achieved. Bundled conditions from an earlier strategy can
/// therefore satisfy deeper steps without executing them.
fn subtree_satisfied(children: &HashMap<AuthMethod, SchemaNode>, conditions: &[Condition]) -> bool {
    children.values().all(|node| {
        node.condition
            .map_or(true, |condition| conditions.contains(&condition))
            && subtree_satisfied(&node.children, conditions)
    })
}
