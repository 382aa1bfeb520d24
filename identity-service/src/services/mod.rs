//! Services layer: the step orchestrator, credential lifecycle and token
//! issuance, plus their persistence and cache seams.

mod checks;
pub(crate) mod database;
pub mod error;
mod issuance;
mod jwt;
mod notify;
mod orchestrator;
pub mod process_code;
mod process_store;
mod revocation;
mod token_store;
mod tokens;

pub use checks::{
    CheckExecutor, HttpPreconditionGateway, MockPreconditionGateway, PreconditionGateway,
};
pub use database::MongoDb;
pub use error::ServiceError;
pub use issuance::{IssuedSession, TokenIssuanceCoordinator};
pub use jwt::{JwtService, MockSessionSigner, SessionClaims, SessionTokenSigner};
pub use notify::{
    HttpNotificationProvider, HttpProfileGateway, MockNotificationProvider, MockProfileGateway,
    NotificationProvider, ProfileGateway,
};
pub use orchestrator::{AuthMethodsResponse, CompleteStepsArgs, StepOrchestrator};
pub use process_code::{ProcessCode, ProcessCodeDefiner, StatusCodeTable};
pub use process_store::{MockProcessStore, MongoProcessStore, ProcessStore};
pub use revocation::{MockRevocationCache, RedisCache, RevocationCache};
pub use token_store::{MockTokenStore, MongoTokenStore, RemovalFilter, TokenRotation, TokenStore};
pub use tokens::{CreateTokenOps, RefreshOps, RefreshTokenService, TokenProjection};
