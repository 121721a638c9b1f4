//! The optional graph service (spec §6): a fast reachability accelerator
//! the git-bare cooker consults before falling back to DFS traversal over
//! `Storage` directly.

use async_trait::async_trait;
use thiserror::Error;

use crate::hash::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwhidKind {
    Revision,
    Release,
    Directory,
    Content,
    Snapshot,
}

#[derive(Debug, Clone, Copy)]
pub struct Swhid {
    pub kind: SwhidKind,
    pub id: ObjectId,
}

/// An edge-type restriction string as accepted by `visit_nodes`, e.g.
/// `"rev:rev"` or `"snp:*,rel:*,rev:rev"`.
pub type EdgeRestriction = &'static str;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("unknown graph node: {0:?}")]
    UnknownNode(Swhid),
    #[error("graph service unavailable: {0}")]
    Unavailable(String),
}

/// Reachability accelerator. Implementations that can't answer a query
/// (including "no graph configured") should return
/// [`GraphError::Unavailable`] so callers fall back to a DFS over
/// `Storage` (spec §4.6).
#[async_trait]
pub trait Graph: Send + Sync {
    async fn visit_nodes(
        &self,
        root: Swhid,
        edges: EdgeRestriction,
    ) -> Result<Vec<Swhid>, GraphError>;
}

/// Placeholder used when no graph service is configured; every call
/// reports itself unavailable so the git-bare cooker always takes the
/// DFS fallback path.
pub struct NoGraph;

#[async_trait]
impl Graph for NoGraph {
    async fn visit_nodes(
        &self,
        _root: Swhid,
        _edges: EdgeRestriction,
    ) -> Result<Vec<Swhid>, GraphError> {
        Err(GraphError::Unavailable("no graph service configured".to_string()))
    }
}
