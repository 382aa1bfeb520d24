//! MongoDB wrapper for the identity service collections.

use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use crate::models::{AuthProcess, AuthSchema, RefreshToken};

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for identity-service");

        let processes = self.auth_processes();

        // Compound index driving the one-Processing-per-device invariant scans
        let device_status_index = IndexModel::builder()
            .keys(doc! { "mobileUid": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("device_status_lookup".to_string())
                    .build(),
            )
            .build();
        processes
            .create_index(device_status_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create device_status index: {}", e);
                AppError::from(e)
            })?;

        // Admission scans: (userIdentifier, code) ordered by creation
        let admission_index = IndexModel::builder()
            .keys(doc! { "userIdentifier": 1, "code": 1, "createdAt": -1 })
            .options(
                IndexOptions::builder()
                    .name("admission_lookup".to_string())
                    .build(),
            )
            .build();
        processes
            .create_index(admission_index, None)
            .await
            .map_err(AppError::from)?;

        let tokens = self.refresh_tokens();

        let value_index = IndexModel::builder()
            .keys(doc! { "value": 1 })
            .options(
                IndexOptions::builder()
                    .name("value_lookup".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        tokens.create_index(value_index, None).await.map_err(|e| {
            tracing::error!("Failed to create value index on refresh_tokens: {}", e);
            AppError::from(e)
        })?;

        // Sibling teardown and bulk removal paths
        let session_index = IndexModel::builder()
            .keys(doc! { "mobileUid": 1, "sessionType": 1, "userIdentifier": 1 })
            .options(
                IndexOptions::builder()
                    .name("session_lookup".to_string())
                    .build(),
            )
            .build();
        tokens
            .create_index(session_index, None)
            .await
            .map_err(AppError::from)?;

        // Expiry sweep scans
        let expiry_index = IndexModel::builder()
            .keys(doc! { "expired": 1, "expirationTime": 1 })
            .options(
                IndexOptions::builder()
                    .name("expiry_sweep".to_string())
                    .build(),
            )
            .build();
        tokens
            .create_index(expiry_index, None)
            .await
            .map_err(AppError::from)?;

        tracing::info!("MongoDB indexes ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn auth_schemas(&self) -> Collection<AuthSchema> {
        self.db.collection("auth_schemas")
    }

    pub fn auth_processes(&self) -> Collection<AuthProcess> {
        self.db.collection("auth_processes")
    }

    pub fn refresh_tokens(&self) -> Collection<RefreshToken> {
        self.db.collection("refresh_tokens")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}
