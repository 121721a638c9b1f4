//! The `LifecycleStore` trait (spec §4.2) and its two implementations: a
//! `sea_orm`/Postgres-backed store for production, and an in-memory store
//! for tests.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::warn;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::entity::{bundle, notif_email};
use crate::lifecycle::{BundleRecord, BundleStatus, BundleType, NotifEmail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOrder {
    Created,
    Done,
    LastAccess,
}

/// Durable table of bundles keyed by `(type, id)` (spec §3, §4.2). All
/// mutating methods run inside a single transaction.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn task_info(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<Option<BundleRecord>, VaultError>;

    /// Inserts a `status=new` row with no task handle yet. A row matching
    /// this shape found on recovery is orphaned and may be re-enqueued
    /// (spec §4.2).
    async fn insert_new(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        sticky: bool,
    ) -> Result<BundleRecord, VaultError>;

    async fn set_task_handle(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        task_handle: &str,
    ) -> Result<(), VaultError>;

    /// Atomically deletes a `failed` row and inserts a fresh `status=new`
    /// row in its place, in a single transaction (spec §4.2, §4.3 step 3)
    /// so a crash or a concurrent reader between the two never observes
    /// the row as transiently absent. Returns `None` with no changes
    /// made if the row's status is no longer `failed` by the time the
    /// transaction runs — e.g. a concurrent request already replaced it,
    /// or it has since moved past `failed`.
    async fn replace_failed(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        sticky: bool,
    ) -> Result<Option<BundleRecord>, VaultError>;

    async fn set_status(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        status: BundleStatus,
    ) -> Result<(), VaultError>;

    async fn set_progress(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        text: Option<String>,
    ) -> Result<(), VaultError>;

    async fn update_access_ts(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<(), VaultError>;

    async fn add_notif_email(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        email: &str,
    ) -> Result<(), VaultError>;

    async fn list_notifications(&self, bundle_id: i64) -> Result<Vec<NotifEmail>, VaultError>;

    async fn delete_notification(&self, id: i64) -> Result<(), VaultError>;

    async fn cache_expire_oldest(
        &self,
        n: u64,
        by: EvictionOrder,
    ) -> Result<Vec<BundleRecord>, VaultError>;

    async fn cache_expire_until(
        &self,
        before: chrono::DateTime<Utc>,
        by: EvictionOrder,
    ) -> Result<Vec<BundleRecord>, VaultError>;
}

fn row_to_record(model: bundle::Model) -> Result<BundleRecord, VaultError> {
    Ok(BundleRecord {
        id: model.id,
        bundle_type: BundleType::from_str(&model.bundle_type)?,
        object_id: ObjectId::from_bytes(&model.object_id).map_err(VaultError::InvalidObjectId)?,
        task_handle: model.task_handle,
        status: BundleStatus::from_str(&model.status)?,
        sticky: model.sticky,
        progress_msg: model.progress_msg,
        ts_created: model.ts_created,
        ts_done: model.ts_done,
        ts_last_access: model.ts_last_access,
    })
}

/// `sea_orm`/Postgres-backed implementation. Holds a long-lived connection
/// and retries acquiring it up to `reconnect_attempts` times before
/// surfacing the error, the same pattern any process-global long-lived
/// backend resource needs.
pub struct SeaOrmLifecycleStore {
    db: DatabaseConnection,
}

impl SeaOrmLifecycleStore {
    pub async fn connect(url: &str, reconnect_attempts: u32) -> Result<Self, VaultError> {
        let mut last_err = None;
        for attempt in 0..=reconnect_attempts {
            match Database::connect(url).await {
                Ok(db) => return Ok(SeaOrmLifecycleStore { db }),
                Err(e) => {
                    warn!(attempt, error = %e, "lifecycle store connection attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(VaultError::Db(last_err.expect("loop runs at least once")))
    }
}

#[async_trait]
impl LifecycleStore for SeaOrmLifecycleStore {
    async fn task_info(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<Option<BundleRecord>, VaultError> {
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&self.db)
            .await?;
        model.map(row_to_record).transpose()
    }

    async fn insert_new(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        sticky: bool,
    ) -> Result<BundleRecord, VaultError> {
        let txn = self.db.begin().await?;
        let active = bundle::ActiveModel {
            id: Default::default(),
            bundle_type: Set(bundle_type.as_str().to_string()),
            object_id: Set(object_id.as_ref().to_vec()),
            task_handle: Set(None),
            status: Set(BundleStatus::New.as_str().to_string()),
            sticky: Set(sticky),
            progress_msg: Set(None),
            ts_created: Set(Utc::now()),
            ts_done: Set(None),
            ts_last_access: Set(None),
        };
        let model = active.insert(&txn).await?;
        txn.commit().await?;
        row_to_record(model)
    }

    async fn set_task_handle(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        task_handle: &str,
    ) -> Result<(), VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        let mut active: bundle::ActiveModel = model.into();
        active.task_handle = Set(Some(task_handle.to_string()));
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn replace_failed(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        sticky: bool,
    ) -> Result<Option<BundleRecord>, VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?;
        let Some(model) = model else {
            txn.commit().await?;
            return Ok(None);
        };
        if model.status != BundleStatus::Failed.as_str() {
            txn.commit().await?;
            return Ok(None);
        }
        let active: bundle::ActiveModel = model.into();
        active.delete(&txn).await?;

        let fresh = bundle::ActiveModel {
            id: Default::default(),
            bundle_type: Set(bundle_type.as_str().to_string()),
            object_id: Set(object_id.as_ref().to_vec()),
            task_handle: Set(None),
            status: Set(BundleStatus::New.as_str().to_string()),
            sticky: Set(sticky),
            progress_msg: Set(None),
            ts_created: Set(Utc::now()),
            ts_done: Set(None),
            ts_last_access: Set(None),
        };
        let model = fresh.insert(&txn).await?;
        txn.commit().await?;
        Ok(Some(row_to_record(model)?))
    }

    async fn set_status(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        status: BundleStatus,
    ) -> Result<(), VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        let mut active: bundle::ActiveModel = model.into();
        active.status = Set(status.as_str().to_string());
        if status == BundleStatus::Done {
            active.ts_done = Set(Some(Utc::now()));
        }
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn set_progress(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        text: Option<String>,
    ) -> Result<(), VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        let mut active: bundle::ActiveModel = model.into();
        active.progress_msg = Set(text);
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn update_access_ts(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<(), VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        let mut active: bundle::ActiveModel = model.into();
        active.ts_last_access = Set(Some(Utc::now()));
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn add_notif_email(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        email: &str,
    ) -> Result<(), VaultError> {
        let txn = self.db.begin().await?;
        let model = bundle::Entity::find()
            .filter(bundle::Column::BundleType.eq(bundle_type.as_str()))
            .filter(bundle::Column::ObjectId.eq(object_id.as_ref().to_vec()))
            .one(&txn)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        let active = notif_email::ActiveModel {
            id: Default::default(),
            bundle_id: Set(model.id),
            email: Set(email.to_string()),
        };
        active.insert(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn list_notifications(&self, bundle_id: i64) -> Result<Vec<NotifEmail>, VaultError> {
        let rows = notif_email::Entity::find()
            .filter(notif_email::Column::BundleId.eq(bundle_id))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|m| NotifEmail {
                id: m.id,
                bundle_id: m.bundle_id,
                email: m.email,
            })
            .collect())
    }

    async fn delete_notification(&self, id: i64) -> Result<(), VaultError> {
        notif_email::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn cache_expire_oldest(
        &self,
        n: u64,
        by: EvictionOrder,
    ) -> Result<Vec<BundleRecord>, VaultError> {
        let column = match by {
            EvictionOrder::Created => bundle::Column::TsCreated,
            EvictionOrder::Done => bundle::Column::TsDone,
            EvictionOrder::LastAccess => bundle::Column::TsLastAccess,
        };
        let txn = self.db.begin().await?;
        let candidates = bundle::Entity::find()
            .filter(bundle::Column::Sticky.eq(false))
            .order_by_asc(column)
            .limit(n)
            .all(&txn)
            .await?;
        let mut evicted = Vec::with_capacity(candidates.len());
        for model in candidates {
            let record = row_to_record(model.clone())?;
            let active: bundle::ActiveModel = model.into();
            active.delete(&txn).await?;
            evicted.push(record);
        }
        txn.commit().await?;
        Ok(evicted)
    }

    async fn cache_expire_until(
        &self,
        before: chrono::DateTime<Utc>,
        by: EvictionOrder,
    ) -> Result<Vec<BundleRecord>, VaultError> {
        let column = match by {
            EvictionOrder::Created => bundle::Column::TsCreated,
            EvictionOrder::Done => bundle::Column::TsDone,
            EvictionOrder::LastAccess => bundle::Column::TsLastAccess,
        };
        let txn = self.db.begin().await?;
        let candidates = bundle::Entity::find()
            .filter(bundle::Column::Sticky.eq(false))
            .filter(column.lt(before))
            .all(&txn)
            .await?;
        let mut evicted = Vec::with_capacity(candidates.len());
        for model in candidates {
            let record = row_to_record(model.clone())?;
            let active: bundle::ActiveModel = model.into();
            active.delete(&txn).await?;
            evicted.push(record);
        }
        txn.commit().await?;
        Ok(evicted)
    }
}

// TODO(pending-row-sweeper): a background task should transition rows stuck
// in `pending` beyond a configurable horizon to `failed`. Not implemented
// (spec §9 documents this as an open point, not inferred behavior) — this
// comment is a sketch, not a call site.


#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::Mutex;

    pub struct InMemoryLifecycleStore {
        next_id: AtomicI64,
        bundles: Mutex<HashMap<(BundleType, ObjectId), BundleRecord>>,
        notifications: Mutex<Vec<NotifEmail>>,
        next_notif_id: AtomicI64,
    }

    impl Default for InMemoryLifecycleStore {
        fn default() -> Self {
            InMemoryLifecycleStore {
                next_id: AtomicI64::new(1),
                bundles: Mutex::new(HashMap::new()),
                notifications: Mutex::new(Vec::new()),
                next_notif_id: AtomicI64::new(1),
            }
        }
    }

    #[async_trait]
    impl LifecycleStore for InMemoryLifecycleStore {
        async fn task_info(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
        ) -> Result<Option<BundleRecord>, VaultError> {
            Ok(self.bundles.lock().await.get(&(bundle_type, object_id)).cloned())
        }

        async fn insert_new(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            sticky: bool,
        ) -> Result<BundleRecord, VaultError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let record = BundleRecord {
                id,
                bundle_type,
                object_id,
                task_handle: None,
                status: BundleStatus::New,
                sticky,
                progress_msg: None,
                ts_created: Utc::now(),
                ts_done: None,
                ts_last_access: None,
            };
            self.bundles
                .lock()
                .await
                .insert((bundle_type, object_id), record.clone());
            Ok(record)
        }

        async fn set_task_handle(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            task_handle: &str,
        ) -> Result<(), VaultError> {
            let mut bundles = self.bundles.lock().await;
            let record = bundles
                .get_mut(&(bundle_type, object_id))
                .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
            record.task_handle = Some(task_handle.to_string());
            Ok(())
        }

        async fn replace_failed(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            sticky: bool,
        ) -> Result<Option<BundleRecord>, VaultError> {
            let mut bundles = self.bundles.lock().await;
            match bundles.get(&(bundle_type, object_id)) {
                Some(record) if record.status == BundleStatus::Failed => {}
                _ => return Ok(None),
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let record = BundleRecord {
                id,
                bundle_type,
                object_id,
                task_handle: None,
                status: BundleStatus::New,
                sticky,
                progress_msg: None,
                ts_created: Utc::now(),
                ts_done: None,
                ts_last_access: None,
            };
            bundles.insert((bundle_type, object_id), record.clone());
            Ok(Some(record))
        }

        async fn set_status(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            status: BundleStatus,
        ) -> Result<(), VaultError> {
            let mut bundles = self.bundles.lock().await;
            let record = bundles
                .get_mut(&(bundle_type, object_id))
                .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
            record.status = status;
            if status == BundleStatus::Done {
                record.ts_done = Some(Utc::now());
            }
            Ok(())
        }

        async fn set_progress(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            text: Option<String>,
        ) -> Result<(), VaultError> {
            let mut bundles = self.bundles.lock().await;
            let record = bundles
                .get_mut(&(bundle_type, object_id))
                .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
            record.progress_msg = text;
            Ok(())
        }

        async fn update_access_ts(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
        ) -> Result<(), VaultError> {
            let mut bundles = self.bundles.lock().await;
            let record = bundles
                .get_mut(&(bundle_type, object_id))
                .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
            record.ts_last_access = Some(Utc::now());
            Ok(())
        }

        async fn add_notif_email(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            email: &str,
        ) -> Result<(), VaultError> {
            let bundle_id = self
                .bundles
                .lock()
                .await
                .get(&(bundle_type, object_id))
                .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?
                .id;
            let id = self.next_notif_id.fetch_add(1, Ordering::SeqCst);
            self.notifications.lock().await.push(NotifEmail {
                id,
                bundle_id,
                email: email.to_string(),
            });
            Ok(())
        }

        async fn list_notifications(&self, bundle_id: i64) -> Result<Vec<NotifEmail>, VaultError> {
            Ok(self
                .notifications
                .lock()
                .await
                .iter()
                .filter(|n| n.bundle_id == bundle_id)
                .cloned()
                .collect())
        }

        async fn delete_notification(&self, id: i64) -> Result<(), VaultError> {
            self.notifications.lock().await.retain(|n| n.id != id);
            Ok(())
        }

        async fn cache_expire_oldest(
            &self,
            n: u64,
            by: EvictionOrder,
        ) -> Result<Vec<BundleRecord>, VaultError> {
            let mut bundles = self.bundles.lock().await;
            let mut candidates: Vec<BundleRecord> = bundles
                .values()
                .filter(|r| !r.sticky)
                .cloned()
                .collect();
            sort_by_order(&mut candidates, by);
            let evicted: Vec<BundleRecord> = candidates.into_iter().take(n as usize).collect();
            for record in &evicted {
                bundles.remove(&(record.bundle_type, record.object_id));
            }
            Ok(evicted)
        }

        async fn cache_expire_until(
            &self,
            before: chrono::DateTime<Utc>,
            by: EvictionOrder,
        ) -> Result<Vec<BundleRecord>, VaultError> {
            let mut bundles = self.bundles.lock().await;
            let key_of = |r: &BundleRecord| match by {
                EvictionOrder::Created => Some(r.ts_created),
                EvictionOrder::Done => r.ts_done,
                EvictionOrder::LastAccess => r.ts_last_access,
            };
            let evicted: Vec<BundleRecord> = bundles
                .values()
                .filter(|r| !r.sticky)
                .filter(|r| key_of(r).is_some_and(|t| t < before))
                .cloned()
                .collect();
            for record in &evicted {
                bundles.remove(&(record.bundle_type, record.object_id));
            }
            Ok(evicted)
        }
    }

    fn sort_by_order(records: &mut [BundleRecord], by: EvictionOrder) {
        records.sort_by_key(|r| match by {
            EvictionOrder::Created => Some(r.ts_created),
            EvictionOrder::Done => r.ts_done,
            EvictionOrder::LastAccess => r.ts_last_access,
        });
    }
}
