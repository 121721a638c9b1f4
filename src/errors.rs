//! Error types for the Vault.
//!
//! This module defines a unified error enumeration used across the cache,
//! lifecycle store, scheduler adapter, notifier and cookers. It integrates
//! with `thiserror` to provide rich `Display` implementations and error
//! source chaining where applicable.
//!
//! The three kinds surfaced to users (spec §7) are encoded as a classification
//! on top of the enum rather than as separate types, so every fallible
//! operation can still return a single `VaultError` and only the edges
//! (the cooker framework, the HTTP layer) need to ask "which kind is this".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    /// The requested root object does not exist in the archive.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// No bundle row exists for this (type, id), or it hasn't finished cooking.
    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    /// The bundle type string is not one of the known `BundleType` variants.
    #[error("unknown bundle type: {0}")]
    UnknownBundleType(String),

    /// `id` did not parse as a 20-byte hex hash.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Cooking would exceed `max_bundle_size`.
    #[error("{0}")]
    PolicyError(String),

    /// Cache backend was constructed without `allow_delete`.
    #[error("cache delete is disabled for this backend")]
    DeleteDisabled,

    /// `git fsck` exited non-zero while cooking a git-bare bundle.
    #[error("git fsck failed: {0}")]
    GitFsckFailed(String),

    /// A git subprocess (`git init`/`repack`/`prune-packed`) exited non-zero.
    #[error("git subprocess `{command}` failed: {detail}")]
    GitSubprocessFailed { command: String, detail: String },

    /// Failed to reach the SMTP relay after exhausting retries.
    #[error("notifier delivery failed: {0}")]
    NotifierFailed(String),

    /// Scheduler could not enqueue or describe a task.
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    /// Database operation failed (after exhausting the reconnect budget).
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// I/O error from the cache, temp files, or git subprocesses.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed git object encountered while cooking (unexpected shape).
    #[error("malformed git object: {0}")]
    MalformedObject(String),

    /// Generic custom error for anything else; rendered as InternalError.
    #[error("{0}")]
    Internal(String),
}

/// The three kinds spec §7 commits to showing users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Policy,
    Internal,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::ObjectNotFound(_) | VaultError::BundleNotFound(_) => ErrorKind::NotFound,
            VaultError::PolicyError(_) => ErrorKind::Policy,
            _ => ErrorKind::Internal,
        }
    }

    /// The exact text that is safe to store as `progress_msg` and show to users.
    ///
    /// Policy errors show their real message (it was constructed to be safe for
    /// display); everything else collapses to the fixed apology in spec §4.4 so
    /// internals never leak through the progress column.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Policy => self.to_string(),
            ErrorKind::NotFound => self.to_string(),
            ErrorKind::Internal => {
                "Internal Server Error. This incident will be reported.".to_string()
            }
        }
    }
}
