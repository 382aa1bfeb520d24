pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod services;
pub mod strategy;

use std::sync::Arc;

use service_core::axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::services::{
    JwtService, MongoDb, RefreshTokenService, RevocationCache, StepOrchestrator,
    TokenIssuanceCoordinator,
};
use crate::strategy::VerificationProvider;

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub db: MongoDb,
    pub cache: Arc<dyn RevocationCache>,
    pub provider: Arc<dyn VerificationProvider>,
    pub orchestrator: StepOrchestrator,
    pub tokens: RefreshTokenService,
    pub issuance: TokenIssuanceCoordinator,
    pub jwt: JwtService,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/auth/methods", post(handlers::auth::get_auth_methods))
        .route("/api/v1/auth/method", post(handlers::auth::select_method))
        .route("/api/v1/auth/verify", post(handlers::auth::verify_method))
        .route("/api/v1/auth/token", post(handlers::auth::acquire_token))
        .route("/api/v1/auth/token/refresh", post(handlers::session::refresh))
        .route("/api/v1/auth/validate", get(handlers::session::validate))
        .route("/api/v1/auth/logout", post(handlers::session::logout))
        .route("/api/v1/portal/logout", post(handlers::session::logout_portal))
        .route(
            "/api/v1/service-entrance/logout",
            post(handlers::session::logout_service_entrance),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
