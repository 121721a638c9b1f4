//! Durable request lifecycle (spec §3, §4.2): the `vault_bundle` /
//! `vault_notif_email` tables and the [`store::LifecycleStore`] trait that
//! mediates every mutation through a single transaction.

pub mod entity;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;
use crate::hash::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleType {
    Directory,
    RevisionGitfast,
    RevisionFlat,
    GitBare,
    SnapshotGitbare,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleType::Directory => "directory",
            BundleType::RevisionGitfast => "revision_gitfast",
            BundleType::RevisionFlat => "revision_flat",
            BundleType::GitBare => "git_bare",
            BundleType::SnapshotGitbare => "snapshot_gitbare",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, VaultError> {
        match s {
            "directory" => Ok(BundleType::Directory),
            "revision_gitfast" => Ok(BundleType::RevisionGitfast),
            "revision_flat" => Ok(BundleType::RevisionFlat),
            "git_bare" => Ok(BundleType::GitBare),
            "snapshot_gitbare" => Ok(BundleType::SnapshotGitbare),
            other => Err(VaultError::UnknownBundleType(other.to_string())),
        }
    }

    /// Whether this format's root is expected to be a revision (affects
    /// which `Storage`/`Graph` calls the git-bare cooker makes).
    pub fn is_gitbare_family(&self) -> bool {
        matches!(self, BundleType::GitBare | BundleType::SnapshotGitbare)
    }
}

impl std::fmt::Display for BundleType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    New,
    Pending,
    Done,
    Failed,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::New => "new",
            BundleStatus::Pending => "pending",
            BundleStatus::Done => "done",
            BundleStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, VaultError> {
        match s {
            "new" => Ok(BundleStatus::New),
            "pending" => Ok(BundleStatus::Pending),
            "done" => Ok(BundleStatus::Done),
            "failed" => Ok(BundleStatus::Failed),
            other => Err(VaultError::Internal(format!("unknown bundle status: {other}"))),
        }
    }
}

/// One row of `vault_bundle` (spec §3 "Bundle record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRecord {
    pub id: i64,
    pub bundle_type: BundleType,
    pub object_id: ObjectId,
    pub task_handle: Option<String>,
    pub status: BundleStatus,
    pub sticky: bool,
    pub progress_msg: Option<String>,
    pub ts_created: DateTime<Utc>,
    pub ts_done: Option<DateTime<Utc>>,
    pub ts_last_access: Option<DateTime<Utc>>,
}

/// One row of `vault_notif_email` (spec §3 "Notification entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifEmail {
    pub id: i64,
    pub bundle_id: i64,
    pub email: String,
}
