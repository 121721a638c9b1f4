//! Request Coordinator (spec §4.3): the single public entry point requests
//! go through. Glues the lifecycle store, the cooker framework, the
//! scheduler and the notifier together; everything else in the crate is a
//! collaborator this module wires up.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::BundleCache;
use crate::cooker::directory::DirectoryCooker;
use crate::cooker::git_bare::{GitBareCooker, Root};
use crate::cooker::revision_flat::RevisionFlatCooker;
use crate::cooker::revision_gitfast::RevisionGitfastCooker;
use crate::cooker::{Cooker, CookerFramework};
use crate::errors::VaultError;
use crate::graph::Graph;
use crate::hash::ObjectId;
use crate::lifecycle::store::{EvictionOrder, LifecycleStore};
use crate::lifecycle::{BundleRecord, BundleStatus, BundleType};
use crate::notifier::{Notification, NotificationKind, Notifier};
use crate::scheduler::{CookTask, SchedulerAdapter};
use crate::storage::Storage;

/// `BundleType::GitBare` covers revision, directory and release roots
/// under a single type string (spec §6 "Bundle formats": `git_bare` /
/// `*_gitbare`), but a request only carries a bare object id, not a typed
/// SWHID. Resolved here by probing storage in revision, directory,
/// release order — an object id is unique across the three tables, so
/// the first table that claims it settles the root kind.
async fn resolve_git_bare_root(storage: &Arc<dyn Storage>, object_id: ObjectId) -> Result<Root, VaultError> {
    if storage.revision_missing(&[object_id]).await?.is_empty() {
        return Ok(Root::Revision(object_id));
    }
    if storage.directory_missing(&[object_id]).await?.is_empty() {
        return Ok(Root::Directory(object_id));
    }
    if storage.release_get(&[object_id]).await?.into_iter().next().flatten().is_some() {
        return Ok(Root::Release(object_id));
    }
    Err(VaultError::ObjectNotFound(object_id.as_hex()))
}

/// Builds the concrete cooker for `bundle_type`/`object_id`. The only
/// shared construction parameter besides storage/graph is the directory
/// cooker family's content-fetch worker pool size (spec §5).
pub async fn build_cooker(
    storage: &Arc<dyn Storage>,
    graph: &Arc<dyn Graph>,
    bundle_type: BundleType,
    object_id: ObjectId,
    content_fetch_workers: usize,
) -> Result<Box<dyn Cooker>, VaultError> {
    Ok(match bundle_type {
        BundleType::Directory => Box::new(DirectoryCooker::new(storage.clone(), object_id, content_fetch_workers)),
        BundleType::RevisionFlat => {
            Box::new(RevisionFlatCooker::new(storage.clone(), object_id, content_fetch_workers))
        }
        BundleType::RevisionGitfast => Box::new(RevisionGitfastCooker::new(storage.clone(), object_id)),
        BundleType::SnapshotGitbare => Box::new(GitBareCooker::new(
            storage.clone(),
            graph.clone(),
            Root::Snapshot(object_id),
            chrono::Utc::now(),
        )),
        BundleType::GitBare => {
            let root = resolve_git_bare_root(storage, object_id).await?;
            Box::new(GitBareCooker::new(storage.clone(), graph.clone(), root, chrono::Utc::now()))
        }
    })
}

/// The `CookTask` dispatched by the scheduler: builds the right cooker for
/// `(bundle_type, object_id)` and drives it through `CookerFramework::cook`.
pub struct VaultCookTask {
    storage: Arc<dyn Storage>,
    graph: Arc<dyn Graph>,
    framework: Arc<CookerFramework>,
    content_fetch_workers: usize,
}

impl VaultCookTask {
    pub fn new(
        storage: Arc<dyn Storage>,
        graph: Arc<dyn Graph>,
        framework: Arc<CookerFramework>,
        content_fetch_workers: usize,
    ) -> Self {
        VaultCookTask {
            storage,
            graph,
            framework,
            content_fetch_workers,
        }
    }
}

#[async_trait]
impl CookTask for VaultCookTask {
    async fn run(&self, bundle_type: BundleType, object_id: ObjectId) {
        let cooker = match build_cooker(&self.storage, &self.graph, bundle_type, object_id, self.content_fetch_workers).await
        {
            Ok(cooker) => cooker,
            Err(e) => {
                warn!(error = %e, %bundle_type, object_id = %object_id, "failed to build cooker for dispatched task");
                return;
            }
        };
        if let Err(e) = self.framework.cook(cooker.as_ref(), object_id).await {
            warn!(error = %e, %bundle_type, object_id = %object_id, "cook() run loop returned an error");
        }
    }
}

/// Owns `cook_request`, `fetch` and `progress` — the three operations the
/// HTTP surface calls into (spec §4.3, §6).
pub struct RequestCoordinator {
    lifecycle: Arc<dyn LifecycleStore>,
    cache: Arc<dyn BundleCache>,
    scheduler: Arc<dyn SchedulerAdapter>,
    notifier: Arc<dyn Notifier>,
    storage: Arc<dyn Storage>,
    graph: Arc<dyn Graph>,
    content_fetch_workers: usize,
}

impl RequestCoordinator {
    pub fn new(
        lifecycle: Arc<dyn LifecycleStore>,
        cache: Arc<dyn BundleCache>,
        scheduler: Arc<dyn SchedulerAdapter>,
        notifier: Arc<dyn Notifier>,
        storage: Arc<dyn Storage>,
        graph: Arc<dyn Graph>,
        content_fetch_workers: usize,
    ) -> Self {
        RequestCoordinator {
            lifecycle,
            cache,
            scheduler,
            notifier,
            storage,
            graph,
            content_fetch_workers,
        }
    }

    /// Spec §4.3, steps 1-6. `bundle_type`/`object_id` are assumed already
    /// parsed; the HTTP layer is what rejects an unknown type string or a
    /// malformed hex id before reaching here.
    pub async fn cook_request(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        email: Option<&str>,
        sticky: bool,
    ) -> Result<BundleRecord, VaultError> {
        if let Some(existing) = self.lifecycle.task_info(bundle_type, object_id).await? {
            if existing.status == BundleStatus::Failed {
                self.retry_failed_task(bundle_type, object_id, sticky).await?;
            }
        } else {
            self.create_task(bundle_type, object_id, sticky).await?;
        }

        if let Some(email) = email {
            self.handle_email(bundle_type, object_id, email).await?;
        }

        self.lifecycle
            .task_info(bundle_type, object_id)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))
    }

    /// Spec §4.2 `create_task`: verify the object exists via the cooker's
    /// `check_exists`, insert a `status=new` row, enqueue the scheduler
    /// task, then attach the returned handle. A row left in `new` with no
    /// handle (a crash between insert and enqueue) is orphaned and safe to
    /// re-enqueue on recovery — not implemented here, spec §9 documents it
    /// as a sweeper left to operators.
    async fn create_task(&self, bundle_type: BundleType, object_id: ObjectId, sticky: bool) -> Result<(), VaultError> {
        let cooker = build_cooker(&self.storage, &self.graph, bundle_type, object_id, self.content_fetch_workers).await?;
        if !cooker.check_exists().await? {
            return Err(VaultError::ObjectNotFound(object_id.as_hex()));
        }

        self.lifecycle.insert_new(bundle_type, object_id, sticky).await?;
        self.enqueue_and_attach(bundle_type, object_id).await
    }

    /// Spec §4.3 step 3 / §8 property 3: re-verify the object still
    /// exists, then atomically replace the `failed` row with a fresh
    /// one via `LifecycleStore::replace_failed` before enqueuing. If the
    /// row is no longer `failed` by the time the replace runs (a
    /// concurrent request beat this one to it), nothing is enqueued —
    /// the caller's subsequent `task_info` read picks up whatever that
    /// request left behind.
    async fn retry_failed_task(&self, bundle_type: BundleType, object_id: ObjectId, sticky: bool) -> Result<(), VaultError> {
        let cooker = build_cooker(&self.storage, &self.graph, bundle_type, object_id, self.content_fetch_workers).await?;
        if !cooker.check_exists().await? {
            return Err(VaultError::ObjectNotFound(object_id.as_hex()));
        }

        if self.lifecycle.replace_failed(bundle_type, object_id, sticky).await?.is_some() {
            self.enqueue_and_attach(bundle_type, object_id).await?;
        }
        Ok(())
    }

    /// Spec §4.2 `create_task`'s insert+enqueue tail: enqueues the
    /// scheduler task and attaches the returned handle to the row. A
    /// crash between the two leaves a row in `new` with no handle,
    /// orphaned but safe to re-enqueue on recovery (spec §9).
    async fn enqueue_and_attach(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<(), VaultError> {
        let task_handle = self.scheduler.enqueue(bundle_type, object_id).await?;
        self.lifecycle.set_task_handle(bundle_type, object_id, &task_handle).await?;
        Ok(())
    }

    /// Spec §4.3 step 5: a `done` row sends immediately and bypasses the
    /// notification queue entirely; anything else just appends.
    async fn handle_email(&self, bundle_type: BundleType, object_id: ObjectId, email: &str) -> Result<(), VaultError> {
        let record = self
            .lifecycle
            .task_info(bundle_type, object_id)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;

        if record.status == BundleStatus::Done {
            let notification = Notification {
                to: email.to_string(),
                kind: NotificationKind::Success,
                bundle_type,
                object_id,
                failure_message: None,
            };
            self.notifier.send(notification).await?;
        } else {
            self.lifecycle.add_notif_email(bundle_type, object_id, email).await?;
        }
        Ok(())
    }

    /// Returns bundle bytes, bumping `ts_last_access` on success (spec §8
    /// property 4). `NotFound` covers both an unknown row and a row whose
    /// bundle hasn't finished cooking yet.
    pub async fn fetch(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<Vec<u8>, VaultError> {
        let record = self
            .lifecycle
            .task_info(bundle_type, object_id)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))?;
        if record.status != BundleStatus::Done {
            return Err(VaultError::BundleNotFound(object_id.as_hex()));
        }
        let bytes = self.cache.get(bundle_type, object_id).await?;
        self.lifecycle.update_access_ts(bundle_type, object_id).await?;
        Ok(bytes)
    }

    pub async fn progress(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<BundleRecord, VaultError> {
        self.lifecycle
            .task_info(bundle_type, object_id)
            .await?
            .ok_or_else(|| VaultError::BundleNotFound(object_id.as_hex()))
    }

    /// Spec §4.3 eviction: pick the `n` oldest non-sticky rows by `by`,
    /// drop their store rows, then drop their cache blobs. Store-first,
    /// blob-second (spec §4.2) so a crash between the two leaves only a
    /// harmless orphan blob, never a dangling row.
    pub async fn evict_oldest(&self, n: u64, by: EvictionOrder) -> Result<Vec<BundleRecord>, VaultError> {
        let evicted = self.lifecycle.cache_expire_oldest(n, by).await?;
        self.delete_evicted_blobs(&evicted).await;
        Ok(evicted)
    }

    /// Same as [`Self::evict_oldest`] but selects every non-sticky row
    /// whose `by` timestamp predates `before`.
    pub async fn evict_until(
        &self,
        before: chrono::DateTime<chrono::Utc>,
        by: EvictionOrder,
    ) -> Result<Vec<BundleRecord>, VaultError> {
        let evicted = self.lifecycle.cache_expire_until(before, by).await?;
        self.delete_evicted_blobs(&evicted).await;
        Ok(evicted)
    }

    async fn delete_evicted_blobs(&self, evicted: &[BundleRecord]) {
        for record in evicted {
            if let Err(e) = self.cache.delete(record.bundle_type, record.object_id).await {
                warn!(
                    error = %e,
                    bundle_type = %record.bundle_type,
                    object_id = %record.object_id,
                    "failed to delete cache blob for evicted bundle row, leaving orphan for the sweeper"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::InMemoryBundleCache;
    use crate::graph::NoGraph;
    use crate::internal::object::types::ObjectType;
    use crate::lifecycle::store::fake::InMemoryLifecycleStore;
    use crate::notifier::fake::RecordingNotifier;
    use crate::scheduler::fake::InMemoryScheduler;
    use crate::storage::fake::InMemoryStorage;
    use std::sync::Arc;

    fn make_dir_id() -> ObjectId {
        ObjectId::from_type_and_data(ObjectType::Tree, b"")
    }

    async fn make_coordinator() -> (RequestCoordinator, Arc<InMemoryStorage>, Arc<InMemoryLifecycleStore>) {
        let storage = Arc::new(InMemoryStorage::default());
        let lifecycle = Arc::new(InMemoryLifecycleStore::default());
        let cache = Arc::new(InMemoryBundleCache::default());
        let scheduler = Arc::new(InMemoryScheduler::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let graph: Arc<dyn Graph> = Arc::new(NoGraph);
        let coordinator = RequestCoordinator::new(
            lifecycle.clone(),
            cache,
            scheduler,
            notifier,
            storage.clone() as Arc<dyn Storage>,
            graph,
            4,
        );
        (coordinator, storage, lifecycle)
    }

    #[tokio::test]
    async fn unknown_object_is_rejected() {
        let (coordinator, _storage, _lifecycle) = make_coordinator().await;
        let err = coordinator
            .cook_request(BundleType::Directory, make_dir_id(), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn repeated_request_is_idempotent() {
        let (coordinator, storage, _lifecycle) = make_coordinator().await;
        let dir_id = make_dir_id();
        storage.directories.lock().await.insert(dir_id, Vec::new());

        let first = coordinator
            .cook_request(BundleType::Directory, dir_id, None, false)
            .await
            .unwrap();
        let second = coordinator
            .cook_request(BundleType::Directory, dir_id, None, false)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn failed_row_is_replaced_on_retry() {
        let (coordinator, storage, lifecycle) = make_coordinator().await;
        let dir_id = make_dir_id();
        storage.directories.lock().await.insert(dir_id, Vec::new());

        let first = coordinator
            .cook_request(BundleType::Directory, dir_id, None, false)
            .await
            .unwrap();
        lifecycle
            .set_status(BundleType::Directory, dir_id, BundleStatus::Failed)
            .await
            .unwrap();

        let second = coordinator
            .cook_request(BundleType::Directory, dir_id, None, false)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, BundleStatus::New);
    }

    #[tokio::test]
    async fn email_on_done_bundle_sends_immediately() {
        let (coordinator, storage, lifecycle) = make_coordinator().await;
        let dir_id = make_dir_id();
        storage.directories.lock().await.insert(dir_id, Vec::new());

        coordinator
            .cook_request(BundleType::Directory, dir_id, None, false)
            .await
            .unwrap();
        lifecycle
            .set_status(BundleType::Directory, dir_id, BundleStatus::Done)
            .await
            .unwrap();

        coordinator
            .cook_request(BundleType::Directory, dir_id, Some("user@example.org"), false)
            .await
            .unwrap();

        let record = lifecycle.task_info(BundleType::Directory, dir_id).await.unwrap().unwrap();
        assert!(lifecycle.list_notifications(record.id).await.unwrap().is_empty());
    }

    /// Property 5 (spec §8): a sticky row and its blob survive eviction;
    /// a non-sticky row's DB row and cache blob are both removed.
    #[tokio::test]
    async fn eviction_spares_sticky_rows_and_deletes_non_sticky_blobs() {
        let storage = Arc::new(InMemoryStorage::default());
        let lifecycle = Arc::new(InMemoryLifecycleStore::default());
        let cache = Arc::new(InMemoryBundleCache::default());
        let scheduler = Arc::new(InMemoryScheduler::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let graph: Arc<dyn Graph> = Arc::new(NoGraph);

        let sticky_id = ObjectId::from_type_and_data(ObjectType::Tree, b"sticky");
        let plain_id = ObjectId::from_type_and_data(ObjectType::Tree, b"plain");
        storage.directories.lock().await.insert(sticky_id, Vec::new());
        storage.directories.lock().await.insert(plain_id, Vec::new());

        let coordinator = RequestCoordinator::new(
            lifecycle.clone(),
            cache.clone() as Arc<dyn BundleCache>,
            scheduler,
            notifier,
            storage.clone() as Arc<dyn Storage>,
            graph,
            4,
        );

        coordinator
            .cook_request(BundleType::Directory, sticky_id, None, true)
            .await
            .unwrap();
        coordinator
            .cook_request(BundleType::Directory, plain_id, None, false)
            .await
            .unwrap();
        cache
            .add_stream(
                BundleType::Directory,
                sticky_id,
                crate::cache::single_chunk_stream(b"sticky bundle".to_vec()),
            )
            .await
            .unwrap();
        cache
            .add_stream(
                BundleType::Directory,
                plain_id,
                crate::cache::single_chunk_stream(b"plain bundle".to_vec()),
            )
            .await
            .unwrap();

        let evicted = coordinator
            .evict_oldest(10, crate::lifecycle::store::EvictionOrder::Created)
            .await
            .unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].object_id, plain_id);

        assert!(lifecycle
            .task_info(BundleType::Directory, sticky_id)
            .await
            .unwrap()
            .is_some());
        assert!(lifecycle
            .task_info(BundleType::Directory, plain_id)
            .await
            .unwrap()
            .is_none());

        assert!(cache.is_cached(BundleType::Directory, sticky_id).await.unwrap());
        assert!(!cache.is_cached(BundleType::Directory, plain_id).await.unwrap());
    }
}
