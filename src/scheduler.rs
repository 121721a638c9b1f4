//! The task scheduler adapter (spec §4.7, §6): enqueues one-shot cooking
//! tasks and hands back an opaque handle. The Vault only ever persists the
//! handle string; retries, delay and worker selection are the scheduler's
//! concern, not ours.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::BundleType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Unknown,
}

/// Enqueues `swh-vault-cooking` tasks and reports on them (spec §6
/// "Scheduler interface"). Guarantees at-most-once dispatch per enqueue.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    async fn enqueue(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<String, VaultError>;

    async fn describe(&self, task_handle: &str) -> Result<TaskStatus, VaultError>;
}

/// The work a scheduled task actually runs once dispatched: cooking one
/// bundle. `InProcessScheduler` invokes this directly via `tokio::spawn`;
/// an out-of-process scheduler would instead serialize `(type, object_id)`
/// into the task's args and look this trait up from a worker binary.
#[async_trait]
pub trait CookTask: Send + Sync + 'static {
    async fn run(&self, bundle_type: BundleType, object_id: ObjectId);
}

/// A scheduler that dispatches work in-process via `tokio::spawn`, for
/// single-binary deployments and for tests. Task handles are random
/// UUIDs; `describe` only ever reports `Unknown` for handles it didn't
/// mint itself, since there's no registry of finished handles to consult.
pub struct InProcessScheduler<T: CookTask> {
    task: std::sync::Arc<T>,
}

impl<T: CookTask> InProcessScheduler<T> {
    pub fn new(task: std::sync::Arc<T>) -> Self {
        InProcessScheduler { task }
    }
}

#[async_trait]
impl<T: CookTask> SchedulerAdapter for InProcessScheduler<T> {
    async fn enqueue(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<String, VaultError> {
        let handle = Uuid::new_v4().to_string();
        let task = self.task.clone();
        tokio::spawn(async move {
            task.run(bundle_type, object_id).await;
        });
        Ok(handle)
    }

    async fn describe(&self, _task_handle: &str) -> Result<TaskStatus, VaultError> {
        Ok(TaskStatus::Unknown)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    /// Records enqueue calls without running anything, for tests that
    /// only care about lifecycle transitions up to "a task was queued".
    #[derive(Default)]
    pub struct InMemoryScheduler {
        pub enqueued: Mutex<Vec<(BundleType, ObjectId)>>,
    }

    #[async_trait]
    impl SchedulerAdapter for InMemoryScheduler {
        async fn enqueue(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
        ) -> Result<String, VaultError> {
            self.enqueued.lock().await.push((bundle_type, object_id));
            Ok(Uuid::new_v4().to_string())
        }

        async fn describe(&self, _task_handle: &str) -> Result<TaskStatus, VaultError> {
            Ok(TaskStatus::Unknown)
        }
    }
}
