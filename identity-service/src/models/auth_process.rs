//! In-flight authentication process state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::auth_schema::{AuthMethod, Condition, SchemaCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessStatus {
    Processing,
    Success,
    Failure,
    Completed,
}

impl ProcessStatus {
    /// Status transitions are forward-only; `Completed` only from `Success`.
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        matches!(
            (self, next),
            (ProcessStatus::Processing, ProcessStatus::Success)
                | (ProcessStatus::Processing, ProcessStatus::Failure)
                | (ProcessStatus::Success, ProcessStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: ProcessStatus,
    pub date: DateTime<Utc>,
}

/// One attempt at one method. Only the last step of a process is mutable
/// while `end_date` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub method: AuthMethod,
    pub attempts: u32,
    pub verify_attempts: u32,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(method: AuthMethod, now: DateTime<Utc>) -> Self {
        Self {
            method,
            attempts: 1,
            verify_attempts: 0,
            start_date: now,
            end_date: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_date.is_some()
    }
}

/// One in-flight (or terminal) instance of a schema for a device/user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProcess {
    #[serde(rename = "_id")]
    pub process_id: String,
    pub code: SchemaCode,
    pub mobile_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_identifier: Option<String>,
    pub status: ProcessStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub is_revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admitted_after_process: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthProcess {
    pub fn new(
        code: SchemaCode,
        mobile_uid: String,
        user_identifier: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            process_id: Uuid::new_v4().to_string(),
            code,
            mobile_uid,
            user_identifier,
            status: ProcessStatus::Processing,
            status_history: vec![StatusHistoryEntry {
                status: ProcessStatus::Processing,
                date: now,
            }],
            steps: Vec::new(),
            conditions: Vec::new(),
            is_revoked: false,
            admitted_after_process: None,
            created_at: now,
        }
    }

    /// Moves to `next`, appending a history entry. Illegal transitions are a
    /// programmer error surfaced by the caller as a defect.
    pub fn set_status(&mut self, next: ProcessStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.status_history.push(StatusHistoryEntry {
            status: next,
            date: now,
        });
        true
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn last_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }

    /// Methods of steps that have already ended, in order.
    pub fn completed_methods(&self) -> Vec<AuthMethod> {
        self.steps
            .iter()
            .filter(|s| s.is_ended())
            .map(|s| s.method)
            .collect()
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.conditions.contains(&condition)
    }

    pub fn add_conditions(&mut self, new: impl IntoIterator<Item = Condition>) {
        for condition in new {
            if !self.conditions.contains(&condition) {
                self.conditions.push(condition);
            }
        }
    }

    /// Reselecting the same method bumps `attempts` and resets the verify
    /// counter; a different method starts a fresh step.
    pub fn select_method(&mut self, method: AuthMethod, now: DateTime<Utc>) {
        let reselected = self
            .steps
            .last()
            .map_or(false, |last| last.method == method && !last.is_ended());
        if reselected {
            if let Some(last) = self.steps.last_mut() {
                last.attempts += 1;
                last.verify_attempts = 0;
            }
        } else {
            self.steps.push(Step::new(method, now));
        }
    }

    /// Timestamp of the newest history entry with the given status.
    pub fn status_reached_at(&self, status: ProcessStatus) -> Option<DateTime<Utc>> {
        self.status_history
            .iter()
            .rev()
            .find(|e| e.status == status)
            .map(|e| e.date)
    }
}
