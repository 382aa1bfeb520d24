//! Persistence seam for refresh tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::options::FindOptions;

use crate::models::{AuthEntryPoint, RefreshToken, SessionType};
use crate::services::database::MongoDb;
use crate::services::error::ServiceError;

/// Entry-point history is capped so a long-lived session cannot grow its
/// document without bound.
const ENTRY_POINT_HISTORY_CAP: i64 = 10;

/// In-place rotation payload applied by `rotate`.
#[derive(Debug, Clone)]
pub struct TokenRotation {
    pub new_value: String,
    pub new_expiration_time: Option<i64>,
    pub entry_point: Option<AuthEntryPoint>,
    pub platform_type: Option<String>,
    pub platform_version: Option<String>,
    pub app_version: Option<String>,
    pub last_activity_date: DateTime<Utc>,
}

/// Bulk removal predicates.
#[derive(Debug, Clone)]
pub enum RemovalFilter {
    ByMobileUid(String),
    ByUserIdentifier(String),
    ByLogin(String),
    ByEntityId(String),
}

impl RemovalFilter {
    fn to_document(&self) -> Document {
        match self {
            Self::ByMobileUid(uid) => doc! { "mobileUid": uid },
            Self::ByUserIdentifier(user) => doc! { "userIdentifier": user },
            Self::ByLogin(login) => doc! { "login": login },
            Self::ByEntityId(entity) => doc! { "entityId": entity },
        }
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError>;

    async fn find_active(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<Option<RefreshToken>, ServiceError>;

    /// Predicate-scoped rotation: matches the row by (value, mobile_uid,
    /// not deleted) and applies the patch. Returns the matched count — 0
    /// means a concurrent rotation already consumed the value.
    async fn rotate(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
        rotation: TokenRotation,
    ) -> Result<u64, ServiceError>;

    /// Flags the row deleted; matched count 0 is a replay or a lost race.
    async fn mark_deleted(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<u64, ServiceError>;

    /// Hard-deletes sibling rows for the session identity, excluding
    /// `except_value` when given. Returns the deleted count.
    async fn delete_siblings(
        &self,
        mobile_uid: &str,
        session_type: SessionType,
        user_identifier: Option<&str>,
        except_value: Option<&str>,
    ) -> Result<u64, ServiceError>;

    /// Overdue mobile-bound tokens not yet flagged expired.
    async fn count_overdue(&self, now_ms: i64) -> Result<u64, ServiceError>;

    /// Flags one batch of overdue tokens expired; returns the batch size.
    async fn expire_batch(&self, now_ms: i64, batch_size: i64) -> Result<u64, ServiceError>;

    /// Finds and hard-deletes every row matching the filter, returning the
    /// removed rows so their values can be pushed onto the revocation cache.
    async fn find_and_remove(
        &self,
        filter: RemovalFilter,
    ) -> Result<Vec<RefreshToken>, ServiceError>;

    /// Active (non-deleted) sessions held by the user for a session type.
    async fn count_active(
        &self,
        user_identifier: &str,
        session_type: SessionType,
    ) -> Result<u64, ServiceError>;
}

fn bson_of<T: serde::Serialize>(value: &T) -> Result<Bson, ServiceError> {
    to_bson(value).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))
}

#[derive(Clone)]
pub struct MongoTokenStore {
    db: MongoDb,
}

impl MongoTokenStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for MongoTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.db.refresh_tokens().insert_one(token, None).await?;
        Ok(())
    }

    async fn find_active(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let mut filter = doc! { "value": value, "isDeleted": false };
        if let Some(uid) = mobile_uid {
            filter.insert("mobileUid", uid);
        }
        Ok(self.db.refresh_tokens().find_one(filter, None).await?)
    }

    async fn rotate(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
        rotation: TokenRotation,
    ) -> Result<u64, ServiceError> {
        let mut filter = doc! { "value": value, "isDeleted": false };
        if let Some(uid) = mobile_uid {
            filter.insert("mobileUid", uid);
        }

        let mut set = doc! {
            "value": &rotation.new_value,
            "lastActivityDate": bson_of(&rotation.last_activity_date)?,
        };
        if let Some(expiration) = rotation.new_expiration_time {
            set.insert("expirationTime", expiration);
        }
        if let Some(platform_type) = &rotation.platform_type {
            set.insert("platformType", platform_type);
        }
        if let Some(platform_version) = &rotation.platform_version {
            set.insert("platformVersion", platform_version);
        }
        if let Some(app_version) = &rotation.app_version {
            set.insert("appVersion", app_version);
        }
        if let Some(entry_point) = &rotation.entry_point {
            set.insert("entryPoint", bson_of(entry_point)?);
        }

        let mut update = doc! { "$set": set };
        if let Some(entry_point) = &rotation.entry_point {
            update.insert(
                "$push",
                doc! {
                    "entryPointHistory": {
                        "$each": [bson_of(entry_point)?],
                        "$slice": -ENTRY_POINT_HISTORY_CAP,
                    }
                },
            );
        }

        let result = self
            .db
            .refresh_tokens()
            .update_one(filter, update, None)
            .await?;
        Ok(result.matched_count)
    }

    async fn mark_deleted(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let mut filter = doc! { "value": value, "isDeleted": false };
        if let Some(uid) = mobile_uid {
            filter.insert("mobileUid", uid);
        }
        let result = self
            .db
            .refresh_tokens()
            .update_one(filter, doc! { "$set": { "isDeleted": true } }, None)
            .await?;
        Ok(result.matched_count)
    }

    async fn delete_siblings(
        &self,
        mobile_uid: &str,
        session_type: SessionType,
        user_identifier: Option<&str>,
        except_value: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let mut filter = doc! {
            "mobileUid": mobile_uid,
            "sessionType": bson_of(&session_type)?,
        };
        if let Some(user) = user_identifier {
            filter.insert("userIdentifier", user);
        }
        if let Some(except) = except_value {
            filter.insert("value", doc! { "$ne": except });
        }
        let result = self.db.refresh_tokens().delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }

    async fn count_overdue(&self, now_ms: i64) -> Result<u64, ServiceError> {
        Ok(self
            .db
            .refresh_tokens()
            .count_documents(
                doc! {
                    "mobileUid": { "$exists": true, "$ne": null },
                    "expired": false,
                    "expirationTime": { "$lte": now_ms },
                },
                None,
            )
            .await?)
    }

    async fn expire_batch(&self, now_ms: i64, batch_size: i64) -> Result<u64, ServiceError> {
        let options = FindOptions::builder()
            .limit(batch_size)
            .projection(doc! { "_id": 1 })
            .build();
        let cursor = self
            .db
            .refresh_tokens()
            .clone_with_type::<mongodb::bson::Document>()
            .find(
                doc! {
                    "mobileUid": { "$exists": true, "$ne": null },
                    "expired": false,
                    "expirationTime": { "$lte": now_ms },
                },
                options,
            )
            .await?;
        let ids: Vec<Bson> = cursor
            .try_collect::<Vec<Document>>()
            .await?
            .into_iter()
            .filter_map(|d| d.get("_id").cloned())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let result = self
            .db
            .refresh_tokens()
            .update_many(
                doc! { "_id": { "$in": ids } },
                doc! { "$set": { "expired": true } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn find_and_remove(
        &self,
        filter: RemovalFilter,
    ) -> Result<Vec<RefreshToken>, ServiceError> {
        let predicate = filter.to_document();
        let cursor = self
            .db
            .refresh_tokens()
            .find(predicate.clone(), None)
            .await?;
        let tokens: Vec<RefreshToken> = cursor.try_collect().await?;
        if tokens.is_empty() {
            return Ok(tokens);
        }
        self.db.refresh_tokens().delete_many(predicate, None).await?;
        Ok(tokens)
    }

    async fn count_active(
        &self,
        user_identifier: &str,
        session_type: SessionType,
    ) -> Result<u64, ServiceError> {
        Ok(self
            .db
            .refresh_tokens()
            .count_documents(
                doc! {
                    "userIdentifier": user_identifier,
                    "sessionType": bson_of(&session_type)?,
                    "isDeleted": false,
                },
                None,
            )
            .await?)
    }
}

/// In-memory token store used by tests.
#[derive(Default)]
pub struct MockTokenStore {
    pub tokens: std::sync::Mutex<Vec<RefreshToken>>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<RefreshToken>>, ServiceError> {
        self.tokens
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("mock store mutex poisoned: {e}")))
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        self.lock()?.push(token.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        Ok(self
            .lock()?
            .iter()
            .find(|t| {
                t.value == value
                    && !t.is_deleted
                    && mobile_uid.map_or(true, |uid| t.mobile_uid.as_deref() == Some(uid))
            })
            .cloned())
    }

    async fn rotate(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
        rotation: TokenRotation,
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        match guard.iter_mut().find(|t| {
            t.value == value
                && !t.is_deleted
                && mobile_uid.map_or(true, |uid| t.mobile_uid.as_deref() == Some(uid))
        }) {
            Some(token) => {
                token.value = rotation.new_value;
                token.last_activity_date = rotation.last_activity_date;
                if let Some(expiration) = rotation.new_expiration_time {
                    token.expiration_time = expiration;
                }
                if rotation.platform_type.is_some() {
                    token.platform_type = rotation.platform_type;
                }
                if rotation.platform_version.is_some() {
                    token.platform_version = rotation.platform_version;
                }
                if rotation.app_version.is_some() {
                    token.app_version = rotation.app_version;
                }
                if let Some(entry_point) = rotation.entry_point {
                    token.entry_point = Some(entry_point.clone());
                    token.entry_point_history.push(entry_point);
                    let overflow = token
                        .entry_point_history
                        .len()
                        .saturating_sub(ENTRY_POINT_HISTORY_CAP as usize);
                    if overflow > 0 {
                        token.entry_point_history.drain(..overflow);
                    }
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn mark_deleted(
        &self,
        value: &str,
        mobile_uid: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        match guard.iter_mut().find(|t| {
            t.value == value
                && !t.is_deleted
                && mobile_uid.map_or(true, |uid| t.mobile_uid.as_deref() == Some(uid))
        }) {
            Some(token) => {
                token.is_deleted = true;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_siblings(
        &self,
        mobile_uid: &str,
        session_type: SessionType,
        user_identifier: Option<&str>,
        except_value: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        let before = guard.len();
        guard.retain(|t| {
            !(t.mobile_uid.as_deref() == Some(mobile_uid)
                && t.session_type == session_type
                && user_identifier.map_or(true, |u| t.user_identifier.as_deref() == Some(u))
                && except_value.map_or(true, |v| t.value != v))
        });
        Ok((before - guard.len()) as u64)
    }

    async fn count_overdue(&self, now_ms: i64) -> Result<u64, ServiceError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|t| t.mobile_uid.is_some() && !t.expired && t.expiration_time <= now_ms)
            .count() as u64)
    }

    async fn expire_batch(&self, now_ms: i64, batch_size: i64) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        let mut flagged = 0;
        for token in guard.iter_mut() {
            if flagged >= batch_size as u64 {
                break;
            }
            if token.mobile_uid.is_some() && !token.expired && token.expiration_time <= now_ms {
                token.expired = true;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn find_and_remove(
        &self,
        filter: RemovalFilter,
    ) -> Result<Vec<RefreshToken>, ServiceError> {
        let matches = |t: &RefreshToken| match &filter {
            RemovalFilter::ByMobileUid(uid) => t.mobile_uid.as_deref() == Some(uid.as_str()),
            RemovalFilter::ByUserIdentifier(user) => {
                t.user_identifier.as_deref() == Some(user.as_str())
            }
            RemovalFilter::ByLogin(login) => t.login.as_deref() == Some(login.as_str()),
            RemovalFilter::ByEntityId(entity) => t.entity_id.as_deref() == Some(entity.as_str()),
        };
        let mut guard = self.lock()?;
        let removed: Vec<RefreshToken> = guard.iter().filter(|t| matches(t)).cloned().collect();
        guard.retain(|t| !matches(t));
        Ok(removed)
    }

    async fn count_active(
        &self,
        user_identifier: &str,
        session_type: SessionType,
    ) -> Result<u64, ServiceError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|t| {
                t.user_identifier.as_deref() == Some(user_identifier)
                    && t.session_type == session_type
                    && !t.is_deleted
            })
            .count() as u64)
    }
}
