//! Persistence seam for auth processes.
//!
//! All mutations are predicate-scoped: the write carries the expected
//! pre-state in its filter and reports the matched count, so a lost race is
//! observed instead of silently overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson};
use mongodb::options::FindOptions;

use crate::models::{AuthProcess, ProcessStatus, SchemaCode, StatusHistoryEntry};
use crate::services::database::MongoDb;
use crate::services::error::ServiceError;

#[async_trait]
pub trait ProcessStore: Send + Sync {
    async fn insert(&self, process: &AuthProcess) -> Result<(), ServiceError>;

    async fn find_by_id(&self, process_id: &str) -> Result<Option<AuthProcess>, ServiceError>;

    /// Replaces the document if it is still `Processing`; returns the
    /// matched count (0 means the process moved on under us).
    async fn update_processing(&self, process: &AuthProcess) -> Result<u64, ServiceError>;

    /// Fails every other `Processing` process for the device, appending a
    /// history entry. Returns the number of processes failed.
    async fn fail_other_processing(
        &self,
        mobile_uid: &str,
        except_process_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Non-revoked processes for the user matching any of the schema codes,
    /// newest-created first.
    async fn find_admission_candidates(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<Vec<AuthProcess>, ServiceError>;

    /// Newest process for the device/user in one of the given statuses.
    async fn find_latest(
        &self,
        mobile_uid: Option<&str>,
        user_identifier: Option<&str>,
        codes: &[SchemaCode],
        statuses: &[ProcessStatus],
    ) -> Result<Option<AuthProcess>, ServiceError>;

    /// Promotes `process_id` from `from` to `to`; matched count 0 means the
    /// precondition no longer held.
    async fn promote(
        &self,
        process_id: &str,
        from: ProcessStatus,
        to: ProcessStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Marks every process for the user matching the codes as revoked.
    async fn revoke_matching(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<u64, ServiceError>;
}

fn bson_of<T: serde::Serialize>(value: &T) -> Result<Bson, ServiceError> {
    to_bson(value).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))
}

#[derive(Clone)]
pub struct MongoProcessStore {
    db: MongoDb,
}

impl MongoProcessStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProcessStore for MongoProcessStore {
    async fn insert(&self, process: &AuthProcess) -> Result<(), ServiceError> {
        self.db.auth_processes().insert_one(process, None).await?;
        Ok(())
    }

    async fn find_by_id(&self, process_id: &str) -> Result<Option<AuthProcess>, ServiceError> {
        Ok(self
            .db
            .auth_processes()
            .find_one(doc! { "_id": process_id }, None)
            .await?)
    }

    async fn update_processing(&self, process: &AuthProcess) -> Result<u64, ServiceError> {
        let result = self
            .db
            .auth_processes()
            .replace_one(
                doc! {
                    "_id": &process.process_id,
                    "status": bson_of(&ProcessStatus::Processing)?,
                },
                process,
                None,
            )
            .await?;
        Ok(result.matched_count)
    }

    async fn fail_other_processing(
        &self,
        mobile_uid: &str,
        except_process_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut filter = doc! {
            "mobileUid": mobile_uid,
            "status": bson_of(&ProcessStatus::Processing)?,
        };
        if let Some(except) = except_process_id {
            filter.insert("_id", doc! { "$ne": except });
        }

        let entry = StatusHistoryEntry {
            status: ProcessStatus::Failure,
            date: now,
        };
        let result = self
            .db
            .auth_processes()
            .update_many(
                filter,
                doc! {
                    "$set": { "status": bson_of(&ProcessStatus::Failure)? },
                    "$push": { "statusHistory": bson_of(&entry)? },
                },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn find_admission_candidates(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<Vec<AuthProcess>, ServiceError> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .build();
        let cursor = self
            .db
            .auth_processes()
            .find(
                doc! {
                    "userIdentifier": user_identifier,
                    "code": { "$in": bson_of(&codes)? },
                    "isRevoked": false,
                },
                options,
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_latest(
        &self,
        mobile_uid: Option<&str>,
        user_identifier: Option<&str>,
        codes: &[SchemaCode],
        statuses: &[ProcessStatus],
    ) -> Result<Option<AuthProcess>, ServiceError> {
        let mut filter = doc! {
            "code": { "$in": bson_of(&codes)? },
            "status": { "$in": bson_of(&statuses)? },
            "isRevoked": false,
        };
        if let Some(uid) = mobile_uid {
            filter.insert("mobileUid", uid);
        }
        if let Some(user) = user_identifier {
            filter.insert("userIdentifier", user);
        }

        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .limit(1)
            .build();
        let mut cursor = self.db.auth_processes().find(filter, options).await?;
        Ok(cursor.try_next().await?)
    }

    async fn promote(
        &self,
        process_id: &str,
        from: ProcessStatus,
        to: ProcessStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let entry = StatusHistoryEntry {
            status: to,
            date: now,
        };
        let result = self
            .db
            .auth_processes()
            .update_one(
                doc! { "_id": process_id, "status": bson_of(&from)? },
                doc! {
                    "$set": { "status": bson_of(&to)? },
                    "$push": { "statusHistory": bson_of(&entry)? },
                },
                None,
            )
            .await?;
        Ok(result.matched_count)
    }

    async fn revoke_matching(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<u64, ServiceError> {
        let result = self
            .db
            .auth_processes()
            .update_many(
                doc! {
                    "userIdentifier": user_identifier,
                    "code": { "$in": bson_of(&codes)? },
                    "isRevoked": false,
                },
                doc! { "$set": { "isRevoked": true } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }
}

/// In-memory store used by tests. Preserves insertion order, which is what
/// the admission lookup's creation-order contract relies on.
#[derive(Default)]
pub struct MockProcessStore {
    pub processes: std::sync::Mutex<Vec<AuthProcess>>,
}

impl MockProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<AuthProcess>>, ServiceError> {
        self.processes
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("mock store mutex poisoned: {e}")))
    }
}

#[async_trait]
impl ProcessStore for MockProcessStore {
    async fn insert(&self, process: &AuthProcess) -> Result<(), ServiceError> {
        self.lock()?.push(process.clone());
        Ok(())
    }

    async fn find_by_id(&self, process_id: &str) -> Result<Option<AuthProcess>, ServiceError> {
        Ok(self
            .lock()?
            .iter()
            .find(|p| p.process_id == process_id)
            .cloned())
    }

    async fn update_processing(&self, process: &AuthProcess) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        match guard.iter_mut().find(|p| {
            p.process_id == process.process_id && p.status == ProcessStatus::Processing
        }) {
            Some(slot) => {
                *slot = process.clone();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn fail_other_processing(
        &self,
        mobile_uid: &str,
        except_process_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        let mut failed = 0;
        for p in guard.iter_mut() {
            if p.mobile_uid == mobile_uid
                && p.status == ProcessStatus::Processing
                && Some(p.process_id.as_str()) != except_process_id
            {
                p.status = ProcessStatus::Failure;
                p.status_history.push(StatusHistoryEntry {
                    status: ProcessStatus::Failure,
                    date: now,
                });
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn find_admission_candidates(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<Vec<AuthProcess>, ServiceError> {
        let guard = self.lock()?;
        let mut found: Vec<AuthProcess> = guard
            .iter()
            .filter(|p| {
                p.user_identifier.as_deref() == Some(user_identifier)
                    && codes.contains(&p.code)
                    && !p.is_revoked
            })
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn find_latest(
        &self,
        mobile_uid: Option<&str>,
        user_identifier: Option<&str>,
        codes: &[SchemaCode],
        statuses: &[ProcessStatus],
    ) -> Result<Option<AuthProcess>, ServiceError> {
        let guard = self.lock()?;
        Ok(guard
            .iter()
            .rev()
            .find(|p| {
                codes.contains(&p.code)
                    && statuses.contains(&p.status)
                    && !p.is_revoked
                    && mobile_uid.map_or(true, |uid| p.mobile_uid == uid)
                    && user_identifier.map_or(true, |u| p.user_identifier.as_deref() == Some(u))
            })
            .cloned())
    }

    async fn promote(
        &self,
        process_id: &str,
        from: ProcessStatus,
        to: ProcessStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        match guard
            .iter_mut()
            .find(|p| p.process_id == process_id && p.status == from)
        {
            Some(p) => {
                p.status = to;
                p.status_history.push(StatusHistoryEntry {
                    status: to,
                    date: now,
                });
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn revoke_matching(
        &self,
        user_identifier: &str,
        codes: &[SchemaCode],
    ) -> Result<u64, ServiceError> {
        let mut guard = self.lock()?;
        let mut revoked = 0;
        for p in guard.iter_mut() {
            if p.user_identifier.as_deref() == Some(user_identifier)
                && codes.contains(&p.code)
                && !p.is_revoked
            {
                p.is_revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
