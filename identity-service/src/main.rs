use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use identity_service::{
    build_router,
    config::IdentityConfig,
    schema::SchemaRegistry,
    services::{
        CheckExecutor, HttpNotificationProvider, HttpPreconditionGateway, HttpProfileGateway,
        JwtService, MongoDb, MongoProcessStore, MongoTokenStore, RedisCache, RefreshTokenService,
        RevocationCache, StepOrchestrator, TokenIssuanceCoordinator,
    },
    strategy::{GatewayVerifier, StrategySet, VerificationProvider},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        &config.common.otlp_endpoint,
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    tracing::info!("Initializing database connections");
    let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
    db.initialize_indexes().await?;
    tracing::info!("Database initialized successfully");

    let registry = Arc::new(SchemaRegistry::load(&db).await.map_err(AppError::from)?);

    let cache: Arc<dyn RevocationCache> = Arc::new(
        RedisCache::new(&config.redis.url)
            .await
            .map_err(AppError::InternalError)?,
    );
    tracing::info!("Revocation cache initialized");

    let jwt = JwtService::new(&config.jwt).map_err(AppError::from)?;
    tracing::info!("JWT service initialized");

    let provider: Arc<dyn VerificationProvider> =
        Arc::new(GatewayVerifier::new(&config.gateway.verification_url));
    let strategies = Arc::new(StrategySet::new(provider.clone()));
    let checks = Arc::new(CheckExecutor::new(
        Arc::new(HttpPreconditionGateway::new(&config.gateway.verification_url)),
        config.auth.minimum_age_years,
    ));

    let process_store = Arc::new(MongoProcessStore::new(db.clone()));
    let token_store = Arc::new(MongoTokenStore::new(db.clone()));

    let orchestrator = StepOrchestrator::new(
        registry,
        process_store,
        strategies,
        checks,
        config.auth.admission_steps_ttl_ms,
    );

    let tokens = RefreshTokenService::new(
        token_store,
        cache.clone(),
        config.sessions.clone(),
        config.sweep.batch_size,
    );

    let issuance = TokenIssuanceCoordinator::new(
        tokens.clone(),
        Arc::new(jwt.clone()),
        Arc::new(HttpNotificationProvider::new(&config.gateway.notification_url)),
        Arc::new(HttpProfileGateway::new(&config.gateway.profile_url)),
        config.auth.identifier_salt.clone(),
    );

    // Scheduled expiry sweep
    let sweep_tokens = tokens.clone();
    let sweep_interval = config.sweep.interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            if let Err(e) = sweep_tokens.check_refresh_tokens_expiration().await {
                tracing::error!(error = %e, "Refresh token expiry sweep failed");
            }
        }
    });

    let state = AppState {
        config: config.clone(),
        db,
        cache,
        provider,
        orchestrator,
        tokens,
        issuance,
        jwt,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
