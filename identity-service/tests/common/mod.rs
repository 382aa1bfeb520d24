//! Shared fixtures driving the services against the in-crate mock stores.
#![allow(dead_code)]

use std::sync::Arc;

use identity_service::config::SessionLifetimes;
use identity_service::models::{AppHeaders, AuthSchema, UserInfo};
use identity_service::schema::registry::default_schemas;
use identity_service::schema::SchemaRegistry;
use identity_service::services::{
    CheckExecutor, MockPreconditionGateway, MockProcessStore, MockRevocationCache, MockTokenStore,
    RefreshTokenService, StepOrchestrator,
};
use identity_service::strategy::{MockVerificationProvider, StrategySet};

pub const ADMISSION_TTL_MS: i64 = 180_000;

pub struct OrchestratorHarness {
    pub orchestrator: StepOrchestrator,
    pub store: Arc<MockProcessStore>,
    pub provider: Arc<MockVerificationProvider>,
    pub gateway: Arc<MockPreconditionGateway>,
}

pub fn orchestrator_harness() -> OrchestratorHarness {
    harness_with_schemas(default_schemas())
}

pub fn harness_with_schemas(schemas: Vec<AuthSchema>) -> OrchestratorHarness {
    let store = Arc::new(MockProcessStore::new());
    let provider = Arc::new(MockVerificationProvider::new());
    let gateway = Arc::new(MockPreconditionGateway::new());

    let orchestrator = StepOrchestrator::new(
        Arc::new(SchemaRegistry::from_schemas(schemas)),
        store.clone(),
        Arc::new(StrategySet::new(provider.clone())),
        Arc::new(CheckExecutor::new(gateway.clone(), 14)),
        ADMISSION_TTL_MS,
    );

    OrchestratorHarness {
        orchestrator,
        store,
        provider,
        gateway,
    }
}

pub struct TokenHarness {
    pub tokens: RefreshTokenService,
    pub store: Arc<MockTokenStore>,
    pub cache: Arc<MockRevocationCache>,
}

pub fn token_harness() -> TokenHarness {
    let store = Arc::new(MockTokenStore::new());
    let cache = Arc::new(MockRevocationCache::new());
    let tokens = RefreshTokenService::new(store.clone(), cache.clone(), lifetimes(), 1000);
    TokenHarness {
        tokens,
        store,
        cache,
    }
}

pub fn lifetimes() -> SessionLifetimes {
    SessionLifetimes {
        user_ms: 2_592_000_000,
        cabinet_user_ms: 7_200_000,
        e_resident_ms: 2_592_000_000,
        e_resident_applicant_ms: 3_600_000,
        portal_user_ms: 7_200_000,
        partner_ms: 31_536_000_000,
        acquirer_ms: 31_536_000_000,
        service_entrance_ms: 86_400_000,
        absolute_expiration_days: 30,
    }
}

pub fn headers() -> AppHeaders {
    AppHeaders {
        mobile_uid: "device-1".to_string(),
        platform_type: Some("android".to_string()),
        platform_version: Some("14".to_string()),
        app_version: Some("4.2.0".to_string()),
        trace_id: Some("trace-1".to_string()),
    }
}

pub fn user(identifier: &str) -> UserInfo {
    UserInfo {
        identifier: identifier.to_string(),
        birth_day: None,
        document_number: None,
    }
}
