//! Caller-facing result codes and the pure (status, method) lookup.

use std::collections::HashMap;

use serde::Serializer;

use crate::models::{AuthMethod, ProcessStatus, Step};
use crate::services::error::ServiceError;

/// Closed set of result codes surfaced to callers. Serialized as the bare
/// numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ProcessCode {
    AuthSuccess = 10_101_001,
    AuthFailed = 10_101_002,
    AttemptsExceeded = 10_101_003,
    VerifyAttemptsExceeded = 10_101_004,
    WaitingPeriodExpired = 10_101_005,
    VerificationRequired = 10_101_006,

    BankVerifySuccess = 10_102_001,
    BankVerifyFailed = 10_102_002,
    NfcVerifySuccess = 10_103_001,
    NfcVerifyFailed = 10_103_002,
    PhotoVerifySuccess = 10_104_001,
    PhotoVerifyFailed = 10_104_002,
    OtpVerifySuccess = 10_105_001,
    OtpVerifyFailed = 10_105_002,
    QesVerifySuccess = 10_106_001,
    QesVerifyFailed = 10_106_002,

    DocumentNotAvailable = 10_107_001,
    DuplicateIdentity = 10_107_002,
    EResidentTerminated = 10_107_003,
    UnderageUser = 10_107_004,
}

impl ProcessCode {
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl serde::Serialize for ProcessCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

/// Exhaustive `(status, method) -> code` table declared by each strategy.
#[derive(Debug, Clone, Default)]
pub struct StatusCodeTable {
    rows: HashMap<ProcessStatus, HashMap<AuthMethod, ProcessCode>>,
}

impl StatusCodeTable {
    pub fn build(
        rows: impl IntoIterator<Item = (ProcessStatus, Vec<(AuthMethod, ProcessCode)>)>,
    ) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|(status, cells)| (status, cells.into_iter().collect()))
                .collect(),
        }
    }

    pub fn get(&self, status: ProcessStatus, method: AuthMethod) -> Option<ProcessCode> {
        self.rows.get(&status).and_then(|row| row.get(&method)).copied()
    }
}

/// Pure lookup of the result code for a verify outcome.
///
/// A missing mapping is a contract violation by the strategy author, not a
/// runtime condition: it surfaces as a defect and is never defaulted.
pub struct ProcessCodeDefiner;

impl ProcessCodeDefiner {
    pub fn on_verify(
        status: ProcessStatus,
        step: &Step,
        table: &StatusCodeTable,
    ) -> Result<ProcessCode, ServiceError> {
        table.get(status, step.method).ok_or_else(|| {
            ServiceError::Defect(format!(
                "no process code mapped for status {:?} and method {}",
                status, step.method
            ))
        })
    }
}
