//! End-to-end coverage for the request lifecycle (spec §8 S1/S5/S6): drives
//! the real HTTP router, the real `RequestCoordinator` and a real
//! `InProcessScheduler` dispatching onto `tokio::spawn`, rather than the
//! in-memory scheduler fake the unit tests use. Storage, the lifecycle
//! store, the bundle cache and the notifier are still the in-memory fakes,
//! gated behind the `test-util` feature since this binary links the crate
//! as an ordinary dependency.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use swh_vault::cache::fake::InMemoryBundleCache;
use swh_vault::cache::BundleCache;
use swh_vault::cooker::CookerFramework;
use swh_vault::coordinator::{RequestCoordinator, VaultCookTask};
use swh_vault::graph::{Graph, NoGraph};
use swh_vault::hash::ObjectId;
use swh_vault::http::{router, AppState};
use swh_vault::internal::object::types::ObjectType;
use swh_vault::lifecycle::store::fake::InMemoryLifecycleStore;
use swh_vault::lifecycle::store::LifecycleStore;
use swh_vault::notifier::fake::RecordingNotifier;
use swh_vault::notifier::Notifier;
use swh_vault::scheduler::{InProcessScheduler, SchedulerAdapter};
use swh_vault::storage::{DirectoryEntry, EntryType, Storage};

fn file_entry(path: &str, sha1_git: ObjectId) -> DirectoryEntry {
    DirectoryEntry {
        name: path.as_bytes().to_vec(),
        path: path.as_bytes().to_vec(),
        entry_type: EntryType::File,
        perms: 0o100644,
        status: None,
        sha1: Some(sha1_git.0),
        sha1_git: Some(sha1_git),
        target: sha1_git,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Wires the full stack, including a real `InProcessScheduler<VaultCookTask>`
/// dispatching through `tokio::spawn`, matching how `main` would assemble it
/// (spec §4.7).
async fn test_app() -> (axum::Router, Arc<swh_vault::storage::fake::InMemoryStorage>) {
    let storage = Arc::new(swh_vault::storage::fake::InMemoryStorage::default());
    let lifecycle: Arc<dyn LifecycleStore> = Arc::new(InMemoryLifecycleStore::default());
    let cache: Arc<dyn BundleCache> = Arc::new(InMemoryBundleCache::default());
    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
    let graph: Arc<dyn Graph> = Arc::new(NoGraph);

    let framework = Arc::new(CookerFramework::new(
        lifecycle.clone(),
        cache.clone(),
        notifier.clone(),
        64 * 1024 * 1024,
    ));
    let task = Arc::new(VaultCookTask::new(
        storage.clone() as Arc<dyn Storage>,
        graph.clone(),
        framework.clone(),
        4,
    ));
    let scheduler: Arc<dyn SchedulerAdapter> = Arc::new(InProcessScheduler::new(task));

    let coordinator = Arc::new(RequestCoordinator::new(
        lifecycle.clone(),
        cache.clone(),
        scheduler,
        notifier,
        storage.clone() as Arc<dyn Storage>,
        graph,
        4,
    ));
    let state = Arc::new(AppState {
        coordinator,
        lifecycle,
        cache,
        framework,
    });
    (router(state), storage)
}

/// Polls `/progress/<type>/<id>` until it reports `done` or `failed`, or
/// panics after a generous number of attempts. The real scheduler runs the
/// cook on a spawned task, so the HTTP response to `/cook` races its
/// completion; this is the same polling contract spec §6 gives callers.
async fn wait_for_terminal_status(app: &axum::Router, uri: &str) -> Value {
    for _ in 0..200 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let info = body_json(response).await;
        match info["status"].as_str().unwrap() {
            "done" | "failed" => return info,
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    panic!("bundle never reached a terminal status within the polling budget");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cook_then_fetch_round_trips_a_directory_bundle() {
    let (app, storage) = test_app().await;

    let content_id = ObjectId::from_type_and_data(ObjectType::Blob, b"hello end to end");
    storage.contents.lock().await.insert(content_id.0, b"hello end to end".to_vec());
    let dir_id = ObjectId::from_type_and_data(ObjectType::Tree, b"e2e-root");
    storage
        .directories
        .lock()
        .await
        .insert(dir_id, vec![file_entry("greeting.txt", content_id)]);

    let cook_uri = format!("/cook/directory/{}", dir_id.as_hex());
    let cook_response = app
        .clone()
        .oneshot(Request::builder().method("POST").uri(cook_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(cook_response.status(), StatusCode::OK);
    let cooked_info = body_json(cook_response).await;
    assert_eq!(cooked_info["status"], "new");

    let progress_uri = format!("/progress/directory/{}", dir_id.as_hex());
    let final_info = wait_for_terminal_status(&app, &progress_uri).await;
    assert_eq!(final_info["status"], "done");

    let fetch_uri = format!("/fetch/directory/{}", dir_id.as_hex());
    let fetch_response = app
        .clone()
        .oneshot(Request::builder().uri(fetch_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(fetch_response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(fetch_response.into_body(), usize::MAX).await.unwrap();

    let mut archive = tar::Archive::new(std::io::Cursor::new(bytes.to_vec()));
    let mut found_greeting = false;
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        if path.ends_with("greeting.txt") {
            let mut contents = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut contents).unwrap();
            assert_eq!(contents, b"hello end to end");
            found_greeting = true;
        }
    }
    assert!(found_greeting, "cooked tarball is missing the expected file");
}

/// S5 (spec §8): an oversized bundle dispatched through the real scheduler
/// still fails with a policy error visible through `/progress`, and
/// `/fetch` never serves a partial bundle.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_bundle_fails_and_is_never_fetchable() {
    let storage = Arc::new(swh_vault::storage::fake::InMemoryStorage::default());
    let big_content = vec![b'x'; 4096];
    let content_id = ObjectId::from_type_and_data(ObjectType::Blob, &big_content);
    storage.contents.lock().await.insert(content_id.0, big_content);
    let dir_id = ObjectId::from_type_and_data(ObjectType::Tree, b"e2e-too-big");
    storage
        .directories
        .lock()
        .await
        .insert(dir_id, vec![file_entry("huge.bin", content_id)]);

    // A tightly-capped `max_bundle_size`, distinct from `test_app`'s 64MiB
    // default, so the write actually trips the limit.
    let lifecycle: Arc<dyn LifecycleStore> = Arc::new(InMemoryLifecycleStore::default());
    let cache: Arc<dyn BundleCache> = Arc::new(InMemoryBundleCache::default());
    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
    let graph: Arc<dyn Graph> = Arc::new(NoGraph);
    let framework = Arc::new(CookerFramework::new(lifecycle.clone(), cache.clone(), notifier.clone(), 64));
    let task = Arc::new(VaultCookTask::new(
        storage.clone() as Arc<dyn Storage>,
        graph.clone(),
        framework.clone(),
        4,
    ));
    let scheduler: Arc<dyn SchedulerAdapter> = Arc::new(InProcessScheduler::new(task));
    let coordinator = Arc::new(RequestCoordinator::new(
        lifecycle.clone(),
        cache.clone(),
        scheduler,
        notifier,
        storage.clone() as Arc<dyn Storage>,
        graph,
        4,
    ));
    let state = Arc::new(AppState {
        coordinator,
        lifecycle,
        cache,
        framework,
    });
    let app = router(state);

    let cook_uri = format!("/cook/directory/{}", dir_id.as_hex());
    let cook_response = app
        .clone()
        .oneshot(Request::builder().method("POST").uri(cook_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(cook_response.status(), StatusCode::OK);

    let progress_uri = format!("/progress/directory/{}", dir_id.as_hex());
    let final_info = wait_for_terminal_status(&app, &progress_uri).await;
    assert_eq!(final_info["status"], "failed");
    assert!(final_info["progress_msg"].as_str().unwrap().contains("exceeds"));

    let fetch_uri = format!("/fetch/directory/{}", dir_id.as_hex());
    let fetch_response = app
        .clone()
        .oneshot(Request::builder().uri(fetch_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(fetch_response.status(), StatusCode::NOT_FOUND);
}
