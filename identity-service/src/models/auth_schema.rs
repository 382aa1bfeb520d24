//! Authentication schema reference data.
//!
//! A schema describes one authentication flow: the methods a client may use,
//! per-method attempt/TTL policy, pre-condition checks and cross-schema
//! admission rules. Schemas are read-mostly documents loaded once at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::auth_process::ProcessStatus;

/// Canonical schema codes. Every code is statically guaranteed a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaCode {
    Authorization,
    CabinetAuthorization,
    Prolong,
    EResidentAuth,
}

impl SchemaCode {
    /// Resolves an externally-facing code (including aliases) to a canonical one.
    pub fn resolve(raw: &str) -> Option<Self> {
        match raw {
            "authorization" | "login" => Some(Self::Authorization),
            "cabinet-authorization" | "cabinet-login" => Some(Self::CabinetAuthorization),
            "prolong" | "session-prolong" => Some(Self::Prolong),
            "e-resident-auth" | "eresident-login" => Some(Self::EResidentAuth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::CabinetAuthorization => "cabinet-authorization",
            Self::Prolong => "prolong",
            Self::EResidentAuth => "e-resident-auth",
        }
    }
}

/// Identity verification methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    BankId,
    Monobank,
    PrivatBank,
    Nfc,
    PhotoId,
    Otp,
    Qes,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankId => "bankId",
            Self::Monobank => "monobank",
            Self::PrivatBank => "privatBank",
            Self::Nfc => "nfc",
            Self::PhotoId => "photoId",
            Self::Otp => "otp",
            Self::Qes => "qes",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-condition checks run once before the first step of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckCode {
    DocumentAvailability,
    DuplicateIdentity,
    EResidentTermination,
    MinimumAge,
}

/// Condition tags achieved during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    BankAccountVerified,
    DocumentPhotoVerified,
    LivenessPassed,
    ChipDataMatched,
    OtpConfirmed,
    SignatureVerified,
}

/// Cross-schema admission: recently completing `code` (reaching
/// `admit_after_status`, default `Completed`) exempts the user from this
/// schema's steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRule {
    pub code: SchemaCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admit_after_status: Option<ProcessStatus>,
}

/// Attempt/TTL policy attached to a schema tree node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodPolicy {
    pub max_attempts: u32,
    pub max_verify_attempts: u32,
    pub ttl_ms: i64,
}

/// One node of the recursive schema tree. A chain that runs past a leaf is
/// detected by a plain `children.get(..) == None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<MethodPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub children: HashMap<AuthMethod, SchemaNode>,
}

impl SchemaNode {
    pub fn leaf(policy: MethodPolicy, condition: Option<Condition>) -> Self {
        Self {
            policy: Some(policy),
            condition,
            children: HashMap::new(),
        }
    }

    pub fn with_children(
        policy: MethodPolicy,
        condition: Option<Condition>,
        children: Vec<(AuthMethod, SchemaNode)>,
    ) -> Self {
        Self {
            policy: Some(policy),
            condition,
            children: children.into_iter().collect(),
        }
    }
}

/// Reference definition of one authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSchema {
    #[serde(rename = "_id")]
    pub code: SchemaCode,
    pub title: String,
    /// Ordered entry methods. Empty means the whole flow is skippable.
    pub methods: Vec<AuthMethod>,
    #[serde(default)]
    pub checks: Vec<CheckCode>,
    #[serde(default)]
    pub admit_after: Vec<AdmissionRule>,
    /// Recursive tree keyed by method, mirroring `methods` at the root.
    #[serde(default)]
    pub tree: HashMap<AuthMethod, SchemaNode>,
}

impl AuthSchema {
    /// Walks the tree along completed steps and returns the node set the
    /// next method must come from. `None` means the chain ran past a leaf.
    pub fn node_after<'a>(
        &'a self,
        completed_methods: &[AuthMethod],
    ) -> Option<&'a HashMap<AuthMethod, SchemaNode>> {
        let mut current = &self.tree;
        for method in completed_methods {
            match current.get(method) {
                Some(node) => current = &node.children,
                None => return None,
            }
        }
        Some(current)
    }

    pub fn policy_for(&self, path: &[AuthMethod]) -> Option<&MethodPolicy> {
        let (last, prefix) = path.split_last()?;
        self.node_after(prefix)
            .and_then(|nodes| nodes.get(last))
            .and_then(|node| node.policy.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MethodPolicy {
        MethodPolicy {
            max_attempts: 3,
            max_verify_attempts: 3,
            ttl_ms: 180_000,
        }
    }

    fn two_level_schema() -> AuthSchema {
        AuthSchema {
            code: SchemaCode::Authorization,
            title: "Authorization".to_string(),
            methods: vec![AuthMethod::BankId],
            checks: vec![],
            admit_after: vec![],
            tree: [(
                AuthMethod::BankId,
                SchemaNode::with_children(
                    policy(),
                    Some(Condition::BankAccountVerified),
                    vec![(
                        AuthMethod::PhotoId,
                        SchemaNode::leaf(policy(), Some(Condition::DocumentPhotoVerified)),
                    )],
                ),
            )]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn resolves_aliases() {
        assert_eq!(
            SchemaCode::resolve("login"),
            Some(SchemaCode::Authorization)
        );
        assert_eq!(
            SchemaCode::resolve("authorization"),
            Some(SchemaCode::Authorization)
        );
        assert_eq!(SchemaCode::resolve("no-such-schema"), None);
    }

    #[test]
    fn walks_tree_by_completed_steps() {
        let schema = two_level_schema();

        let root = schema.node_after(&[]).unwrap();
        assert!(root.contains_key(&AuthMethod::BankId));

        let after_bank = schema.node_after(&[AuthMethod::BankId]).unwrap();
        assert!(after_bank.contains_key(&AuthMethod::PhotoId));

        // Running past the leaf is a missing-child lookup, not a panic.
        assert!(schema
            .node_after(&[AuthMethod::BankId, AuthMethod::PhotoId, AuthMethod::Otp])
            .is_none());
    }

    #[test]
    fn policy_lookup_follows_the_path() {
        let schema = two_level_schema();
        assert!(schema.policy_for(&[AuthMethod::BankId]).is_some());
        assert!(schema
            .policy_for(&[AuthMethod::BankId, AuthMethod::PhotoId])
            .is_some());
        assert!(schema.policy_for(&[AuthMethod::Otp]).is_none());
    }
}
