//! Signed access tokens wrapping a refresh token value.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::SessionType;
use crate::services::error::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Stable user identifier.
    pub sub: String,
    pub session_type: SessionType,
    /// Embedded refresh token value backing this access token.
    pub refresh_token: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_minutes: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, ServiceError> {
        let private_pem = std::fs::read(&config.private_key_path)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("read private key: {e}")))?;
        let public_pem = std::fs::read(&config.public_key_path)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("read public key: {e}")))?;

        Ok(Self {
            encoding_key: EncodingKey::from_rsa_pem(&private_pem)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!("parse private key: {e}")))?,
            decoding_key: DecodingKey::from_rsa_pem(&public_pem)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!("parse public key: {e}")))?,
            expiry_minutes: config.access_token_expiry_minutes,
        })
    }

    pub fn generate_session_token(
        &self,
        identifier: &str,
        session_type: SessionType,
        refresh_value: &str,
    ) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: identifier.to_string(),
            session_type,
            refresh_token: refresh_value.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.expiry_minutes * 60,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("sign session token: {e}")))
    }

    pub fn validate_session_token(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let data = decode::<SessionClaims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::RS256),
        )
        .map_err(|_| ServiceError::unauthorized())?;
        Ok(data.claims)
    }

    /// Refresh and logout accept an expired outer token; the embedded
    /// refresh value is what actually gates them.
    pub fn validate_session_token_ignoring_expiry(
        &self,
        token: &str,
    ) -> Result<SessionClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| ServiceError::unauthorized())?;
        Ok(data.claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.expiry_minutes * 60
    }
}

/// Signing seam consumed by the issuance coordinator.
pub trait SessionTokenSigner: Send + Sync {
    fn sign(
        &self,
        identifier: &str,
        session_type: SessionType,
        refresh_value: &str,
    ) -> Result<String, ServiceError>;
}

impl SessionTokenSigner for JwtService {
    fn sign(
        &self,
        identifier: &str,
        session_type: SessionType,
        refresh_value: &str,
    ) -> Result<String, ServiceError> {
        self.generate_session_token(identifier, session_type, refresh_value)
    }
}

/// Transparent signer used by tests.
pub struct MockSessionSigner;

impl SessionTokenSigner for MockSessionSigner {
    fn sign(
        &self,
        identifier: &str,
        _session_type: SessionType,
        refresh_value: &str,
    ) -> Result<String, ServiceError> {
        Ok(format!("signed.{identifier}.{refresh_value}"))
    }
}
