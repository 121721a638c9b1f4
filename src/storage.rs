//! The archive `Storage` interface (spec §6): a narrow, read-only view onto
//! the content-addressed archive the Vault cooks bundles from. Concrete
//! deployments talk to it over RPC; tests use [`InMemoryStorage`].

use async_trait::async_trait;

use crate::errors::VaultError;
use crate::hash::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Dir,
    File,
    Rev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStatus {
    Visible,
    Absent,
    Hidden,
}

/// One row of `directory_ls`. `path` is relative to the directory being
/// listed; `perms` is the raw git-style mode (e.g. `0o100644`).
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: Vec<u8>,
    pub path: Vec<u8>,
    pub entry_type: EntryType,
    pub perms: u32,
    pub status: Option<ContentStatus>,
    pub sha1: Option<[u8; 20]>,
    pub sha1_git: Option<ObjectId>,
    pub target: ObjectId,
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub id: ObjectId,
    pub directory: ObjectId,
    pub parents: Vec<ObjectId>,
    /// Raw bytes, e.g. `b"John Doe <jdoe@example.org>"`.
    pub author_fullname: Vec<u8>,
    pub author_date: i64,
    pub author_offset_minutes: i32,
    pub committer_fullname: Vec<u8>,
    pub committer_date: i64,
    pub committer_offset_minutes: i32,
    pub message: Vec<u8>,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct Release {
    pub id: ObjectId,
    pub name: Vec<u8>,
    pub target: ObjectId,
    pub target_type: ReleaseTargetType,
    pub author_fullname: Option<Vec<u8>>,
    pub date: Option<i64>,
    pub date_offset_minutes: Option<i32>,
    pub message: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTargetType {
    Revision,
    Release,
    Directory,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTargetType {
    Revision,
    Release,
    Directory,
    Content,
    Alias,
}

#[derive(Debug, Clone)]
pub struct SnapshotBranch {
    /// Ref path, e.g. `b"refs/heads/master"`.
    pub name: Vec<u8>,
    pub target: Option<ObjectId>,
    pub target_type: Option<SnapshotTargetType>,
}

#[derive(Debug, Clone)]
pub struct ContentHashes {
    pub sha1: [u8; 20],
    pub sha1_git: ObjectId,
}

/// Narrow read interface onto the archive (spec §6). Every method is
/// async because real deployments reach it over RPC; `InMemoryStorage`
/// resolves immediately for tests.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn directory_missing(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, VaultError>;

    /// Lists a directory's entries, recursively if `recursive` is set
    /// (each `path` then carries the full relative path from the root).
    async fn directory_ls(
        &self,
        dir_id: ObjectId,
        recursive: bool,
    ) -> Result<Vec<DirectoryEntry>, VaultError>;

    async fn revision_missing(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, VaultError>;

    async fn revision_get(&self, ids: &[ObjectId]) -> Result<Vec<Option<Revision>>, VaultError>;

    /// DFS fallback used when no graph service is configured (spec §4.6).
    async fn revision_log(&self, id: ObjectId) -> Result<Vec<Revision>, VaultError>;

    async fn release_get(&self, ids: &[ObjectId]) -> Result<Vec<Option<Release>>, VaultError>;

    async fn snapshot_get_branches(
        &self,
        snapshot_id: ObjectId,
    ) -> Result<Vec<SnapshotBranch>, VaultError>;

    async fn content_find(&self, sha1_git: ObjectId) -> Result<Option<ContentHashes>, VaultError>;

    /// Fetches a content's raw bytes, keyed by `sha1` (the hash over the
    /// content's bytes directly), not `sha1_git` (the git blob hash over
    /// `"blob {len}\0{data}"`). The two hashes differ for every content, so
    /// callers holding only a `sha1_git` must go through
    /// [`Storage::content_find`] first to translate it into the `sha1` this
    /// method expects.
    async fn content_get_data(&self, sha1: [u8; 20]) -> Result<Option<Vec<u8>>, VaultError>;

    /// The raw `fullname` behind a person id, bypassing any display-name
    /// substitution a deployment may apply on the ordinary read path
    /// (spec §4.6 "Display-name override", §9 "Display-name bypass").
    /// Returns `None` when the deployment has no person table at all, in
    /// which case callers should fall back to whatever fullname the
    /// ordinary revision/release read already returned.
    async fn person_fullname_raw(&self, _person_id: i64) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(None)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// An in-memory `Storage` for tests: callers populate the maps
    /// directly rather than going through a builder, matching how the
    /// teacher crate's own fixtures wire up fake dependencies.
    #[derive(Default)]
    pub struct InMemoryStorage {
        pub directories: Mutex<HashMap<ObjectId, Vec<DirectoryEntry>>>,
        pub revisions: Mutex<HashMap<ObjectId, Revision>>,
        pub releases: Mutex<HashMap<ObjectId, Release>>,
        pub snapshots: Mutex<HashMap<ObjectId, Vec<SnapshotBranch>>>,
        /// Keyed by `sha1` (content hash), matching the real backend's
        /// `content_get_data`. Tests populate this directly with whatever
        /// `sha1` a fixture's `ContentHashes`/`DirectoryEntry.sha1` uses.
        pub contents: Mutex<HashMap<[u8; 20], Vec<u8>>>,
    }

    #[async_trait]
    impl Storage for InMemoryStorage {
        async fn directory_missing(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, VaultError> {
            let dirs = self.directories.lock().await;
            Ok(ids.iter().filter(|id| !dirs.contains_key(id)).copied().collect())
        }

        async fn directory_ls(
            &self,
            dir_id: ObjectId,
            _recursive: bool,
        ) -> Result<Vec<DirectoryEntry>, VaultError> {
            Ok(self
                .directories
                .lock()
                .await
                .get(&dir_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn revision_missing(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>, VaultError> {
            let revs = self.revisions.lock().await;
            Ok(ids.iter().filter(|id| !revs.contains_key(id)).copied().collect())
        }

        async fn revision_get(&self, ids: &[ObjectId]) -> Result<Vec<Option<Revision>>, VaultError> {
            let revs = self.revisions.lock().await;
            Ok(ids.iter().map(|id| revs.get(id).cloned()).collect())
        }

        async fn revision_log(&self, id: ObjectId) -> Result<Vec<Revision>, VaultError> {
            let revs = self.revisions.lock().await;
            let mut out = Vec::new();
            let mut stack = vec![id];
            let mut seen = std::collections::HashSet::new();
            while let Some(next) = stack.pop() {
                if !seen.insert(next) {
                    continue;
                }
                if let Some(rev) = revs.get(&next) {
                    stack.extend(rev.parents.iter().copied());
                    out.push(rev.clone());
                }
            }
            Ok(out)
        }

        async fn release_get(&self, ids: &[ObjectId]) -> Result<Vec<Option<Release>>, VaultError> {
            let releases = self.releases.lock().await;
            Ok(ids.iter().map(|id| releases.get(id).cloned()).collect())
        }

        async fn snapshot_get_branches(
            &self,
            snapshot_id: ObjectId,
        ) -> Result<Vec<SnapshotBranch>, VaultError> {
            Ok(self
                .snapshots
                .lock()
                .await
                .get(&snapshot_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn content_find(&self, sha1_git: ObjectId) -> Result<Option<ContentHashes>, VaultError> {
            // The fake has no second hash algorithm of its own, so `sha1`
            // coincides with `sha1_git`'s raw bytes; it still flows through
            // the same `content_get_data(sha1)` seam as a real backend would.
            let contents = self.contents.lock().await;
            Ok(contents.get(&sha1_git.0).map(|_| ContentHashes {
                sha1: sha1_git.0,
                sha1_git,
            }))
        }

        async fn content_get_data(&self, sha1: [u8; 20]) -> Result<Option<Vec<u8>>, VaultError> {
            Ok(self.contents.lock().await.get(&sha1).cloned())
        }
    }
}
