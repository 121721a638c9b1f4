//! Directory cooker (spec §4.5): reconstructs a directory tree on local
//! disk from `Storage.directory_ls`, then tars it up with a top-level
//! folder named after the hex object id.

use std::io::Write;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::cooker::{Cooker, SizeLimitedSink};
use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::BundleType;
use crate::storage::{ContentStatus, EntryType, Storage};

const ABSENT_MESSAGE: &[u8] =
    b"This content has not been retrieved in the Software Heritage archive due to its size.";
const HIDDEN_MESSAGE: &[u8] = b"This content is hidden.";
const MISSING_MESSAGE: &[u8] = b"This content is missing from the Software Heritage archive.";

const MODE_REGULAR: u32 = 0o100644;
const MODE_EXECUTABLE: u32 = 0o100755;
const MODE_SYMLINK: u32 = 0o120000;

pub struct DirectoryCooker {
    storage: Arc<dyn Storage>,
    object_id: ObjectId,
    content_fetch_workers: usize,
}

impl DirectoryCooker {
    pub fn new(storage: Arc<dyn Storage>, object_id: ObjectId, content_fetch_workers: usize) -> Self {
        DirectoryCooker {
            storage,
            object_id,
            content_fetch_workers,
        }
    }

    fn coerced_mode(perms: u32, entry_type: EntryType) -> u32 {
        match entry_type {
            EntryType::Dir => perms,
            _ => match perms {
                MODE_REGULAR | MODE_EXECUTABLE | MODE_SYMLINK => perms,
                other => {
                    warn!(mode = format!("{other:o}"), "coercing unrecognized mode to 0o100644");
                    MODE_REGULAR
                }
            },
        }
    }

    async fn build_directory(&self, root: &Path) -> Result<(), VaultError> {
        build_directory_tree(&self.storage, self.object_id, root, self.content_fetch_workers).await
    }
}

/// Materializes `dir_id`'s recursive listing under `root` (spec §4.5):
/// directories depth-first, revision entries as broken submodule-style
/// symlinks, files fetched through a bounded worker pool with the content
/// filter applied. Shared by the directory cooker and `revision_flat`,
/// whose per-revision subdirectories are built the same way.
pub(crate) async fn build_directory_tree(
    storage: &Arc<dyn Storage>,
    dir_id: ObjectId,
    root: &Path,
    content_fetch_workers: usize,
) -> Result<(), VaultError> {
    let entries = storage.directory_ls(dir_id, true).await?;

    let mut dirs: Vec<&crate::storage::DirectoryEntry> = Vec::new();
    let mut files: Vec<&crate::storage::DirectoryEntry> = Vec::new();
    let mut revs: Vec<&crate::storage::DirectoryEntry> = Vec::new();
    for entry in &entries {
        match entry.entry_type {
            EntryType::Dir => dirs.push(entry),
            EntryType::File => files.push(entry),
            EntryType::Rev => revs.push(entry),
        }
    }

    // Depth order, ascending, so a parent always exists before its child.
    dirs.sort_by_key(|e| e.path.iter().filter(|&&b| b == b'/').count());
    for dir in dirs {
        let path = root.join(rel_path(&dir.path));
        tokio::fs::create_dir_all(&path).await?;
    }

    for rev in revs {
        let path = root.join(rel_path(&rev.path));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = rev.target.as_hex();
        // A broken symlink: the target text is the hex object id,
        // matching git submodule semantics (spec §4.5).
        let _ = tokio::fs::remove_file(&path).await;
        symlink(&target, &path)?;
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(content_fetch_workers.max(1)));
    let mut handles = Vec::new();
    for file in files {
        let path = root.join(rel_path(&file.path));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mode = DirectoryCooker::coerced_mode(file.perms, EntryType::File);
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
        let storage = storage.clone();
        let entry = file.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let cooker_content = filtered_content_standalone(&storage, &entry).await?;
            write_file(&path, mode, &cooker_content)
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))??;
    }

    Ok(())
}

async fn filtered_content_standalone(
    storage: &Arc<dyn Storage>,
    entry: &crate::storage::DirectoryEntry,
) -> Result<Vec<u8>, VaultError> {
    match entry.status {
        Some(ContentStatus::Absent) => return Ok(ABSENT_MESSAGE.to_vec()),
        Some(ContentStatus::Hidden) => return Ok(HIDDEN_MESSAGE.to_vec()),
        _ => {}
    }
    let Some(sha1) = entry.sha1 else {
        return Ok(MISSING_MESSAGE.to_vec());
    };
    match storage.content_get_data(sha1).await? {
        Some(bytes) => Ok(bytes),
        None => Ok(MISSING_MESSAGE.to_vec()),
    }
}

fn write_file(path: &Path, mode: u32, content: &[u8]) -> Result<(), VaultError> {
    if mode == MODE_SYMLINK {
        let _ = std::fs::remove_file(path);
        symlink(String::from_utf8_lossy(content).as_ref(), path)?;
        return Ok(());
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(content)?;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(mode & 0o777);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

fn rel_path(path: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(path).into_owned())
}


#[async_trait]
impl Cooker for DirectoryCooker {
    fn cache_type_key(&self) -> BundleType {
        BundleType::Directory
    }

    async fn check_exists(&self) -> Result<bool, VaultError> {
        let missing = self.storage.directory_missing(&[self.object_id]).await?;
        Ok(missing.is_empty())
    }

    async fn prepare_bundle(&self, sink: &mut SizeLimitedSink) -> Result<(), VaultError> {
        let tmp_root = tempfile::tempdir()?;
        let top = tmp_root.path().join(self.object_id.as_hex());
        tokio::fs::create_dir_all(&top).await?;
        self.build_directory(&top).await?;

        let mut builder = tar::Builder::new(sink);
        builder.append_dir_all(self.object_id.as_hex(), &top)?;
        builder.finish()?;
        Ok(())
    }
}
