use service_core::error::AppError;
use thiserror::Error;

use crate::services::process_code::ProcessCode;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{reason}")]
    AccessDenied {
        reason: String,
        code: Option<ProcessCode>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized { code: Option<ProcessCode> },

    /// Programmer error: malformed schema tree, unmapped process code pair.
    /// Never caught internally.
    #[error("Defect: {0}")]
    Defect(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
            code: None,
        }
    }

    pub fn access_denied_with(code: ProcessCode, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
            code: Some(code),
        }
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized { code: None }
    }

    pub fn unauthorized_with(code: ProcessCode) -> Self {
        Self::Unauthorized { code: Some(code) }
    }

    /// The result code carried by this error, if any.
    pub fn process_code(&self) -> Option<ProcessCode> {
        match self {
            Self::AccessDenied { code, .. } | Self::Unauthorized { code } => *code,
            _ => None,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Cache(e) => AppError::CacheError(e),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::AccessDenied { reason, code } => AppError::AccessDenied {
                source: anyhow::anyhow!(reason),
                process_code: code.map(|c| c.code()),
            },
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Unauthorized { code } => AppError::Unauthorized {
                source: anyhow::anyhow!("Unauthorized"),
                process_code: code.map(|c| c.code()),
            },
            ServiceError::Defect(e) => AppError::InternalError(anyhow::anyhow!("defect: {}", e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
