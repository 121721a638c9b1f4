//! Cooker Framework (spec §4.4): the abstract surface every format-specific
//! cooker implements, the size-limited sink that turns an over-budget write
//! into a policy error, and the `cook()` run loop that owns status/progress
//! transitions and notification fan-out.

pub mod directory;
pub mod git_bare;
pub mod revision_flat;
pub mod revision_gitfast;

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::cache::{BundleCache, ByteStream};
use crate::errors::{ErrorKind, VaultError};
use crate::hash::ObjectId;
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::{BundleStatus, BundleType};
use crate::notifier::Notifier;
use crate::notifier::{Notification, NotificationKind};

/// Implemented by each format-specific cooker (directory, git-bare,
/// revision_flat, revision_gitfast).
#[async_trait]
pub trait Cooker: Send + Sync {
    fn cache_type_key(&self) -> BundleType;

    async fn check_exists(&self) -> Result<bool, VaultError>;

    /// Writes the bundle's bytes to `sink`. Any write that would exceed
    /// the framework's size limit surfaces as `VaultError::PolicyError`
    /// through the sink itself, not through a separate check.
    async fn prepare_bundle(&self, sink: &mut SizeLimitedSink) -> Result<(), VaultError>;
}

/// A spooled-to-disk writer that raises a policy error the instant a
/// write would exceed `max_bytes`. Spooling to a temp file rather than
/// buffering in memory follows the same approach the object model takes
/// for large pack payloads (see `DESIGN.md`, OQ-1).
pub struct SizeLimitedSink {
    file: NamedTempFile,
    written: u64,
    max_bytes: u64,
    limit_exceeded: bool,
}

impl SizeLimitedSink {
    pub fn new(max_bytes: u64) -> Result<Self, VaultError> {
        Ok(SizeLimitedSink {
            file: NamedTempFile::new()?,
            written: 0,
            max_bytes,
            limit_exceeded: false,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Turns the spooled file into a chunked stream read lazily off disk
    /// (spec §4.1 `add_stream(type, id, chunks)`), so a large bundle
    /// never needs to live in memory all at once on its way into the
    /// cache.
    pub fn into_stream(mut self) -> Result<ByteStream, VaultError> {
        use std::io::{Seek, SeekFrom};
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let reopened = self.file.reopen()?;
        let async_file = tokio::fs::File::from_std(reopened);
        let stream = tokio_util::io::ReaderStream::new(async_file).map(|chunk| chunk.map_err(VaultError::Io));
        Ok(Box::pin(stream))
    }

    /// Materializes the spooled file in memory. Only used by format
    /// cooker tests that want to inspect the bytes directly (unpack a
    /// tar, parse a fast-import stream); `cook()`'s real write path uses
    /// `into_stream` instead.
    #[cfg(test)]
    pub fn into_bytes(mut self) -> Result<Vec<u8>, VaultError> {
        use std::io::{Read, Seek, SeekFrom};
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.written as usize);
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Write for SizeLimitedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let prospective = self.written + buf.len() as u64;
        if prospective > self.max_bytes {
            self.limit_exceeded = true;
            return Err(std::io::Error::other(format!(
                "bundle size exceeds the configured limit of {} bytes",
                self.max_bytes
            )));
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Owns `cook()`, the run loop shared by every cooker (spec §4.4).
pub struct CookerFramework {
    lifecycle: Arc<dyn LifecycleStore>,
    cache: Arc<dyn BundleCache>,
    notifier: Arc<dyn Notifier>,
    max_bundle_size: u64,
}

impl CookerFramework {
    pub fn new(
        lifecycle: Arc<dyn LifecycleStore>,
        cache: Arc<dyn BundleCache>,
        notifier: Arc<dyn Notifier>,
        max_bundle_size: u64,
    ) -> Self {
        CookerFramework {
            lifecycle,
            cache,
            notifier,
            max_bundle_size,
        }
    }

    pub async fn cook(&self, cooker: &dyn Cooker, object_id: ObjectId) -> Result<(), VaultError> {
        let bundle_type = cooker.cache_type_key();

        self.lifecycle
            .set_status(bundle_type, object_id, BundleStatus::Pending)
            .await?;
        self.lifecycle
            .set_progress(bundle_type, object_id, Some("Processing...".to_string()))
            .await?;

        let outcome = self.run_prepare(cooker, object_id).await.and_then(SizeLimitedSink::into_stream);

        let failure_message = match outcome {
            Ok(stream) => {
                if let Err(e) = self.cache.add_stream(bundle_type, object_id, stream).await {
                    error!(error = %e, %bundle_type, object_id = %object_id, "cache write failed after successful cook");
                    Some(e.user_message())
                } else {
                    self.lifecycle
                        .set_status(bundle_type, object_id, BundleStatus::Done)
                        .await?;
                    self.lifecycle
                        .set_progress(bundle_type, object_id, None)
                        .await?;
                    info!(%bundle_type, object_id = %object_id, "bundle cooked");
                    None
                }
            }
            Err(e) => Some(self.record_failure(bundle_type, object_id, e).await?),
        };

        if let Some(message) = failure_message {
            self.lifecycle
                .set_status(bundle_type, object_id, BundleStatus::Failed)
                .await?;
            self.lifecycle
                .set_progress(bundle_type, object_id, Some(message))
                .await?;
        }

        self.send_all_notifications(bundle_type, object_id).await;

        Ok(())
    }

    /// Runs the cooker against a fresh sink. A write that trips
    /// `max_bundle_size` surfaces from `prepare_bundle` as a generic
    /// `VaultError::Io` (the sink only has a `std::io::Write` seam to
    /// signal through); the sink's own `limit_exceeded` flag is how this
    /// reclassifies that specific failure as `PolicyError` so spec §4.4's
    /// "exceeds" progress message and §7's policy-error kind both hold.
    async fn run_prepare(
        &self,
        cooker: &dyn Cooker,
        _object_id: ObjectId,
    ) -> Result<SizeLimitedSink, VaultError> {
        let mut sink = SizeLimitedSink::new(self.max_bundle_size)?;
        if let Err(e) = cooker.prepare_bundle(&mut sink).await {
            if sink.limit_exceeded {
                return Err(VaultError::PolicyError(format!(
                    "bundle size exceeds the configured limit of {} bytes",
                    self.max_bundle_size
                )));
            }
            return Err(e);
        }
        Ok(sink)
    }

    async fn record_failure(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        error: VaultError,
    ) -> Result<String, VaultError> {
        match error.kind() {
            ErrorKind::Policy => {}
            _ => error!(error = %error, %bundle_type, object_id = %object_id, "cooking failed"),
        }
        Ok(error.user_message())
    }

    /// Unconditionally flushes the notification list, independent of
    /// success or failure (spec §4.4 step 7). Notifier failures never
    /// roll back a `done` status (spec §7). Public so the `/send_notif`
    /// cooker-side callback (spec §6) can drive it from a worker process
    /// that only has the bundle coordinates, not a live `cook()` call.
    pub async fn send_all_notifications(&self, bundle_type: BundleType, object_id: ObjectId) {
        let record = match self.lifecycle.task_info(bundle_type, object_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to reload bundle record before sending notifications");
                return;
            }
        };

        let notifications = match self.lifecycle.list_notifications(record.id).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to list notifications");
                return;
            }
        };

        let kind = match record.status {
            BundleStatus::Done => NotificationKind::Success,
            BundleStatus::Failed => NotificationKind::Failure,
            _ => return,
        };

        for notif in notifications {
            let notification = Notification {
                to: notif.email.clone(),
                kind,
                bundle_type,
                object_id,
                failure_message: record.progress_msg.clone(),
            };
            match self.notifier.send(notification).await {
                Ok(()) => {
                    if let Err(e) = self.lifecycle.delete_notification(notif.id).await {
                        error!(error = %e, "failed to delete sent notification row");
                    }
                }
                Err(e) => {
                    error!(error = %e, email = %notif.email, "notification delivery failed, leaving row for retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::InMemoryBundleCache;
    use crate::internal::object::types::ObjectType;
    use crate::lifecycle::store::fake::InMemoryLifecycleStore;
    use crate::notifier::fake::RecordingNotifier;
    use std::io::Write;

    struct FixedSizeCooker {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl Cooker for FixedSizeCooker {
        fn cache_type_key(&self) -> BundleType {
            BundleType::Directory
        }

        async fn check_exists(&self) -> Result<bool, VaultError> {
            Ok(true)
        }

        async fn prepare_bundle(&self, sink: &mut SizeLimitedSink) -> Result<(), VaultError> {
            sink.write_all(&self.bytes)?;
            Ok(())
        }
    }

    fn object_id() -> ObjectId {
        ObjectId::from_type_and_data(ObjectType::Tree, b"")
    }

    async fn make_framework(max_bundle_size: u64) -> (CookerFramework, Arc<InMemoryLifecycleStore>, Arc<RecordingNotifier>) {
        let lifecycle = Arc::new(InMemoryLifecycleStore::default());
        let cache: Arc<dyn BundleCache> = Arc::new(InMemoryBundleCache::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let framework = CookerFramework::new(
            lifecycle.clone(),
            cache,
            notifier.clone() as Arc<dyn Notifier>,
            max_bundle_size,
        );
        lifecycle
            .insert_new(BundleType::Directory, object_id(), false)
            .await
            .unwrap();
        (framework, lifecycle, notifier)
    }

    /// S5 (spec §8): a bundle that overruns `max_bundle_size` fails with a
    /// policy error whose progress message contains "exceeds", and the
    /// cache is never written to.
    #[tokio::test]
    async fn oversized_bundle_fails_with_exceeds_message() {
        let (framework, lifecycle, _notifier) = make_framework(8).await;
        let cooker = FixedSizeCooker {
            bytes: vec![0u8; 1024],
        };

        framework.cook(&cooker, object_id()).await.unwrap();

        let record = lifecycle
            .task_info(BundleType::Directory, object_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, BundleStatus::Failed);
        assert!(record.progress_msg.unwrap().contains("exceeds"));
    }

    #[tokio::test]
    async fn successful_cook_marks_done_and_clears_progress() {
        let (framework, lifecycle, _notifier) = make_framework(64 * 1024 * 1024).await;
        let cooker = FixedSizeCooker {
            bytes: b"small bundle".to_vec(),
        };

        framework.cook(&cooker, object_id()).await.unwrap();

        let record = lifecycle
            .task_info(BundleType::Directory, object_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, BundleStatus::Done);
        assert!(record.progress_msg.is_none());
    }

    /// S6 (spec §8): three distinct emails queued before completion all
    /// receive exactly one notification once the bundle is done, and a
    /// second flush sends nothing further.
    #[tokio::test]
    async fn notifications_flush_once_then_go_quiet() {
        let (framework, lifecycle, notifier) = make_framework(64 * 1024 * 1024).await;
        let cooker = FixedSizeCooker {
            bytes: b"small bundle".to_vec(),
        };

        for addr in ["a@example.org", "b@example.org", "c@example.org"] {
            lifecycle
                .add_notif_email(BundleType::Directory, object_id(), addr)
                .await
                .unwrap();
        }

        framework.cook(&cooker, object_id()).await.unwrap();
        assert_eq!(notifier.sent.lock().await.len(), 3);

        framework.send_all_notifications(BundleType::Directory, object_id()).await;
        assert_eq!(notifier.sent.lock().await.len(), 3);
    }
}
