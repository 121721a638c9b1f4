//! `revision_flat` cooker (spec §6): a tar of per-revision subdirectories,
//! each named by the revision's hex id and containing that revision's
//! directory tree, reconstructed the same way the directory cooker does.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cooker::directory::build_directory_tree;
use crate::cooker::{Cooker, SizeLimitedSink};
use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::BundleType;
use crate::storage::Storage;

pub struct RevisionFlatCooker {
    storage: Arc<dyn Storage>,
    object_id: ObjectId,
    content_fetch_workers: usize,
}

impl RevisionFlatCooker {
    pub fn new(storage: Arc<dyn Storage>, object_id: ObjectId, content_fetch_workers: usize) -> Self {
        RevisionFlatCooker {
            storage,
            object_id,
            content_fetch_workers,
        }
    }
}

#[async_trait]
impl Cooker for RevisionFlatCooker {
    fn cache_type_key(&self) -> BundleType {
        BundleType::RevisionFlat
    }

    async fn check_exists(&self) -> Result<bool, VaultError> {
        Ok(self.storage.revision_missing(&[self.object_id]).await?.is_empty())
    }

    async fn prepare_bundle(&self, sink: &mut SizeLimitedSink) -> Result<(), VaultError> {
        let tmp_root = tempfile::tempdir()?;
        let root = tmp_root.path();

        for revision in self.storage.revision_log(self.object_id).await? {
            let revdir = root.join(revision.id.as_hex());
            tokio::fs::create_dir_all(&revdir).await?;
            build_directory_tree(&self.storage, revision.directory, &revdir, self.content_fetch_workers).await?;
        }

        let mut builder = tar::Builder::new(sink);
        builder.append_dir_all(self.object_id.as_hex(), root)?;
        builder.finish()?;
        Ok(())
    }
}
