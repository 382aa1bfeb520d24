use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::SessionType;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub auth: AuthPolicyConfig,
    pub sessions: SessionLifetimes,
    pub sweep: SweepConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct AuthPolicyConfig {
    /// Window within which a completed ancestor process admits a new one.
    pub admission_steps_ttl_ms: i64,
    pub minimum_age_years: u32,
    /// Salt mixed into the stable identifier hash.
    pub identifier_salt: SecretString,
}

/// Default refresh-token lifetimes per session class.
#[derive(Debug, Clone)]
pub struct SessionLifetimes {
    pub user_ms: i64,
    pub cabinet_user_ms: i64,
    pub e_resident_ms: i64,
    pub e_resident_applicant_ms: i64,
    pub portal_user_ms: i64,
    pub partner_ms: i64,
    pub acquirer_ms: i64,
    pub service_entrance_ms: i64,
    pub absolute_expiration_days: i64,
}

impl SessionLifetimes {
    pub fn default_ms(&self, session_type: SessionType) -> i64 {
        match session_type {
            SessionType::User => self.user_ms,
            SessionType::CabinetUser => self.cabinet_user_ms,
            SessionType::EResident => self.e_resident_ms,
            SessionType::EResidentApplicant => self.e_resident_applicant_ms,
            SessionType::PortalUser => self.portal_user_ms,
            SessionType::Partner => self.partner_ms,
            SessionType::Acquirer => self.acquirer_ms,
            SessionType::ServiceEntrance => self.service_entrance_ms,
        }
    }

    pub fn absolute_days(&self, session_type: SessionType) -> Option<i64> {
        session_type
            .has_absolute_expiration()
            .then_some(self.absolute_expiration_days)
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub verification_url: String,
    pub notification_url: String,
    pub profile_url: String,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", None, is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
            },
            auth: AuthPolicyConfig {
                admission_steps_ttl_ms: parse_env("ADMISSION_STEPS_TTL_MS", Some("180000"), is_prod)?,
                minimum_age_years: parse_env("MINIMUM_AGE_YEARS", Some("14"), is_prod)?,
                identifier_salt: SecretString::new(get_env("IDENTIFIER_SALT", None, true)?),
            },
            sessions: SessionLifetimes {
                user_ms: parse_env("SESSION_USER_LIFETIME_MS", Some("2592000000"), is_prod)?,
                cabinet_user_ms: parse_env(
                    "SESSION_CABINET_LIFETIME_MS",
                    Some("7200000"),
                    is_prod,
                )?,
                e_resident_ms: parse_env(
                    "SESSION_ERESIDENT_LIFETIME_MS",
                    Some("2592000000"),
                    is_prod,
                )?,
                e_resident_applicant_ms: parse_env(
                    "SESSION_ERESIDENT_APPLICANT_LIFETIME_MS",
                    Some("3600000"),
                    is_prod,
                )?,
                portal_user_ms: parse_env(
                    "SESSION_PORTAL_LIFETIME_MS",
                    Some("7200000"),
                    is_prod,
                )?,
                partner_ms: parse_env(
                    "SESSION_PARTNER_LIFETIME_MS",
                    Some("31536000000"),
                    is_prod,
                )?,
                acquirer_ms: parse_env(
                    "SESSION_ACQUIRER_LIFETIME_MS",
                    Some("31536000000"),
                    is_prod,
                )?,
                service_entrance_ms: parse_env(
                    "SESSION_SERVICE_ENTRANCE_LIFETIME_MS",
                    Some("86400000"),
                    is_prod,
                )?,
                absolute_expiration_days: parse_env(
                    "SESSION_ABSOLUTE_EXPIRATION_DAYS",
                    Some("30"),
                    is_prod,
                )?,
            },
            sweep: SweepConfig {
                interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", Some("3600"), is_prod)?,
                batch_size: parse_env("SWEEP_BATCH_SIZE", Some("1000"), is_prod)?,
            },
            gateway: GatewayConfig {
                verification_url: get_env(
                    "VERIFICATION_GATEWAY_URL",
                    Some("http://verification-gateway:8080"),
                    is_prod,
                )?,
                notification_url: get_env(
                    "NOTIFICATION_SERVICE_URL",
                    Some("http://notification-service:8080"),
                    is_prod,
                )?,
                profile_url: get_env(
                    "PROFILE_SERVICE_URL",
                    Some("http://profile-service:8080"),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }
        if self.auth.admission_steps_ttl_ms <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ADMISSION_STEPS_TTL_MS must be positive"
            )));
        }
        if self.sweep.batch_size <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SWEEP_BATCH_SIZE must be positive"
            )));
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is not valid: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
