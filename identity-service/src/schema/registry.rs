//! Read-mostly registry of authentication schemas.
//!
//! Schemas are loaded from the reference collection once at startup and
//! served from memory. An empty collection is seeded with the built-in
//! definitions so a fresh environment comes up usable.

use std::collections::HashMap;

use futures::stream::TryStreamExt;

use crate::models::{
    AdmissionRule, AuthMethod, AuthSchema, CheckCode, Condition, MethodPolicy, SchemaCode,
    SchemaNode,
};
use crate::services::database::MongoDb;
use crate::services::error::ServiceError;

pub struct SchemaRegistry {
    schemas: HashMap<SchemaCode, AuthSchema>,
}

impl SchemaRegistry {
    pub async fn load(db: &MongoDb) -> Result<Self, ServiceError> {
        let cursor = db.auth_schemas().find(None, None).await?;
        let mut schemas: Vec<AuthSchema> = cursor.try_collect().await?;

        if schemas.is_empty() {
            schemas = default_schemas();
            db.auth_schemas().insert_many(&schemas, None).await?;
            tracing::info!(count = schemas.len(), "Seeded built-in auth schemas");
        }

        tracing::info!(count = schemas.len(), "Auth schema registry loaded");
        Ok(Self::from_schemas(schemas))
    }

    pub fn from_schemas(schemas: Vec<AuthSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.code, s)).collect(),
        }
    }

    /// Resolves an externally-facing code (alias included) to its schema.
    pub fn resolve(&self, raw: &str) -> Result<&AuthSchema, ServiceError> {
        let code = SchemaCode::resolve(raw)
            .ok_or_else(|| ServiceError::Validation(format!("unknown auth schema '{raw}'")))?;
        self.get(code)
    }

    /// A registered code without a schema document is a deployment defect,
    /// not a caller error.
    pub fn get(&self, code: SchemaCode) -> Result<&AuthSchema, ServiceError> {
        self.schemas
            .get(&code)
            .ok_or_else(|| ServiceError::Defect(format!("schema {:?} is not loaded", code)))
    }
}

fn policy(max_attempts: u32, max_verify_attempts: u32, ttl_ms: i64) -> MethodPolicy {
    MethodPolicy {
        max_attempts,
        max_verify_attempts,
        ttl_ms,
    }
}

fn bank_then_photo(bank_condition: Condition) -> SchemaNode {
    SchemaNode::with_children(
        policy(3, 3, 180_000),
        Some(bank_condition),
        vec![(
            AuthMethod::PhotoId,
            SchemaNode::leaf(policy(3, 3, 180_000), Some(Condition::DocumentPhotoVerified)),
        )],
    )
}

/// Built-in flow definitions, seeded when the reference collection is empty.
pub fn default_schemas() -> Vec<AuthSchema> {
    vec![
        AuthSchema {
            code: SchemaCode::Authorization,
            title: "Authorization".to_string(),
            methods: vec![
                AuthMethod::BankId,
                AuthMethod::Monobank,
                AuthMethod::PrivatBank,
                AuthMethod::Nfc,
            ],
            checks: vec![CheckCode::DuplicateIdentity, CheckCode::MinimumAge],
            admit_after: vec![],
            tree: [
                (
                    AuthMethod::BankId,
                    bank_then_photo(Condition::BankAccountVerified),
                ),
                (
                    AuthMethod::Monobank,
                    bank_then_photo(Condition::BankAccountVerified),
                ),
                (
                    AuthMethod::PrivatBank,
                    bank_then_photo(Condition::BankAccountVerified),
                ),
                (
                    AuthMethod::Nfc,
                    SchemaNode::leaf(policy(3, 3, 300_000), Some(Condition::ChipDataMatched)),
                ),
            ]
            .into_iter()
            .collect(),
        },
        AuthSchema {
            code: SchemaCode::Prolong,
            title: "Session prolongation".to_string(),
            methods: vec![AuthMethod::Nfc, AuthMethod::PhotoId],
            checks: vec![CheckCode::DocumentAvailability],
            admit_after: vec![AdmissionRule {
                code: SchemaCode::Authorization,
                admit_after_status: None,
            }],
            tree: [
                (
                    AuthMethod::Nfc,
                    SchemaNode::leaf(policy(3, 3, 300_000), Some(Condition::ChipDataMatched)),
                ),
                (
                    AuthMethod::PhotoId,
                    SchemaNode::leaf(policy(3, 3, 180_000), Some(Condition::DocumentPhotoVerified)),
                ),
            ]
            .into_iter()
            .collect(),
        },
        AuthSchema {
            code: SchemaCode::CabinetAuthorization,
            title: "Cabinet authorization".to_string(),
            methods: vec![AuthMethod::Otp, AuthMethod::Qes],
            checks: vec![],
            admit_after: vec![],
            tree: [
                (
                    AuthMethod::Otp,
                    SchemaNode::leaf(policy(5, 5, 120_000), Some(Condition::OtpConfirmed)),
                ),
                (
                    AuthMethod::Qes,
                    SchemaNode::leaf(policy(3, 1, 300_000), Some(Condition::SignatureVerified)),
                ),
            ]
            .into_iter()
            .collect(),
        },
        AuthSchema {
            code: SchemaCode::EResidentAuth,
            title: "E-resident authorization".to_string(),
            methods: vec![AuthMethod::Nfc, AuthMethod::Otp],
            checks: vec![CheckCode::EResidentTermination],
            admit_after: vec![],
            tree: [
                (
                    AuthMethod::Nfc,
                    SchemaNode::with_children(
                        policy(3, 3, 300_000),
                        Some(Condition::ChipDataMatched),
                        vec![(
                            AuthMethod::PhotoId,
                            SchemaNode::leaf(
                                policy(3, 3, 180_000),
                                Some(Condition::DocumentPhotoVerified),
                            ),
                        )],
                    ),
                ),
                (
                    AuthMethod::Otp,
                    SchemaNode::leaf(policy(5, 5, 120_000), Some(Condition::OtpConfirmed)),
                ),
            ]
            .into_iter()
            .collect(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_aliases_to_schemas() {
        let registry = SchemaRegistry::from_schemas(default_schemas());
        let schema = registry.resolve("login").unwrap();
        assert_eq!(schema.code, SchemaCode::Authorization);

        let err = registry.resolve("bogus").unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn every_default_schema_tree_mirrors_its_methods() {
        for schema in default_schemas() {
            for method in &schema.methods {
                assert!(
                    schema.tree.contains_key(method),
                    "schema {:?} lists {} without a tree node",
                    schema.code,
                    method
                );
            }
        }
    }
}
