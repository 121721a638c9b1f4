//! Content-addressed bundle cache (spec §4.1): a path-sliced blob store
//! with atomic rename-into-place writes and an `allow_delete` safety
//! catch guarding production backends against accidental eviction bugs.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::lifecycle::BundleType;

/// A chunked bundle body (spec §4.1 `add_stream(type, id, chunks)`):
/// pulled incrementally rather than materialized up front, so a
/// multi-hundred-megabyte bundle never needs to live in memory all at
/// once on its way into the cache.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, VaultError>> + Send>>;

/// Wraps a single already-materialized buffer as a one-chunk stream, for
/// callers (tests, small cooker-side callbacks) that have the whole
/// bundle in hand and don't need incremental writes.
pub fn single_chunk_stream(bytes: Vec<u8>) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(Bytes::from(bytes)) }))
}

/// A parsed slicing spec, e.g. `"0:1/1:5"` meaning: first path segment is
/// hex chars `[0:1)`, second is hex chars `[1:5)`, remainder is the file
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicingSpec {
    segments: Vec<(usize, usize)>,
}

impl SlicingSpec {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for part in spec.split('/') {
            let (start, end) = part
                .split_once(':')
                .ok_or_else(|| format!("malformed slicing segment: `{part}`"))?;
            let start: usize = start
                .parse()
                .map_err(|_| format!("malformed slicing segment: `{part}`"))?;
            let end: usize = end
                .parse()
                .map_err(|_| format!("malformed slicing segment: `{part}`"))?;
            if end <= start {
                return Err(format!("malformed slicing segment: `{part}`"));
            }
            segments.push((start, end));
        }
        if segments.is_empty() {
            return Err("slicing spec must have at least one segment".to_string());
        }
        Ok(SlicingSpec { segments })
    }

    /// Splits a hex id into its directory components plus the remainder
    /// used as the file name.
    pub fn slice(&self, hex_id: &str) -> Vec<String> {
        let mut parts: Vec<String> = self
            .segments
            .iter()
            .map(|&(start, end)| hex_id[start..end.min(hex_id.len())].to_string())
            .collect();
        let last_end = self.segments.last().map(|&(_, end)| end).unwrap_or(0);
        parts.push(hex_id[last_end.min(hex_id.len())..].to_string());
        parts
    }
}

fn cache_key(bundle_type: BundleType, object_id: ObjectId) -> String {
    format!("{}:{}", bundle_type.as_str(), object_id.as_hex())
}

/// Content-addressed bundle blob store (spec §4.1).
#[async_trait]
pub trait BundleCache: Send + Sync {
    async fn add_stream(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        chunks: ByteStream,
    ) -> Result<(), VaultError>;

    async fn get(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<Vec<u8>, VaultError>;

    async fn is_cached(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
    ) -> Result<bool, VaultError>;

    async fn delete(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<(), VaultError>;
}

/// Filesystem-backed implementation. Paths are `root/<slice...>/<key>`
/// where `<key>` hashes the bundle type in so the same object id never
/// collides across bundle formats.
pub struct FsBundleCache {
    root: PathBuf,
    slicing: SlicingSpec,
    allow_delete: bool,
}

impl FsBundleCache {
    pub fn new(root: PathBuf, slicing: SlicingSpec, allow_delete: bool) -> Self {
        FsBundleCache {
            root,
            slicing,
            allow_delete,
        }
    }

    fn blob_path(&self, bundle_type: BundleType, object_id: ObjectId) -> PathBuf {
        let key = cache_key(bundle_type, object_id);
        let hex = object_id.as_hex();
        let mut path = self.root.clone();
        let components = self.slicing.slice(&hex);
        for component in &components[..components.len() - 1] {
            path.push(component);
        }
        // The file name carries the bundle type too, since the same
        // object id can have bundles of several formats cached at once.
        path.push(format!("{}_{key}", components.last().cloned().unwrap_or_default()));
        path
    }
}

#[async_trait]
impl BundleCache for FsBundleCache {
    async fn add_stream(
        &self,
        bundle_type: BundleType,
        object_id: ObjectId,
        mut chunks: ByteStream,
    ) -> Result<(), VaultError> {
        let dest = self.blob_path(bundle_type, object_id);
        let dir = dest.parent().unwrap_or(Path::new(".")).to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = {
            let dir_for_blocking = dir.clone();
            tokio::task::spawn_blocking(move || NamedTempFile::new_in(&dir_for_blocking))
                .await
                .map_err(|e| VaultError::Internal(e.to_string()))??
        };
        let mut async_file = tokio::fs::File::from_std(tmp.as_file().try_clone()?);
        while let Some(chunk) = chunks.next().await {
            async_file.write_all(&chunk?).await?;
        }
        async_file.flush().await?;
        drop(async_file);

        tokio::task::spawn_blocking(move || tmp.persist(&dest).map_err(|e| VaultError::Io(e.error)))
            .await
            .map_err(|e| VaultError::Internal(e.to_string()))??;

        Ok(())
    }

    async fn get(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<Vec<u8>, VaultError> {
        let path = self.blob_path(bundle_type, object_id);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| VaultError::BundleNotFound(cache_key(bundle_type, object_id)))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn is_cached(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<bool, VaultError> {
        Ok(tokio::fs::metadata(self.blob_path(bundle_type, object_id))
            .await
            .is_ok())
    }

    async fn delete(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<(), VaultError> {
        if !self.allow_delete {
            return Err(VaultError::DeleteDisabled);
        }
        let path = self.blob_path(bundle_type, object_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Io(e)),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// An in-memory `BundleCache` for tests that don't care about the
    /// on-disk path layout, only about what got written.
    #[derive(Default)]
    pub struct InMemoryBundleCache {
        pub blobs: Mutex<HashMap<(BundleType, ObjectId), Vec<u8>>>,
    }

    #[async_trait]
    impl BundleCache for InMemoryBundleCache {
        async fn add_stream(
            &self,
            bundle_type: BundleType,
            object_id: ObjectId,
            mut chunks: ByteStream,
        ) -> Result<(), VaultError> {
            let mut buf = Vec::new();
            while let Some(chunk) = chunks.next().await {
                buf.extend_from_slice(&chunk?);
            }
            self.blobs.lock().await.insert((bundle_type, object_id), buf);
            Ok(())
        }

        async fn get(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<Vec<u8>, VaultError> {
            self.blobs
                .lock()
                .await
                .get(&(bundle_type, object_id))
                .cloned()
                .ok_or_else(|| VaultError::BundleNotFound(cache_key(bundle_type, object_id)))
        }

        async fn is_cached(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<bool, VaultError> {
            Ok(self.blobs.lock().await.contains_key(&(bundle_type, object_id)))
        }

        async fn delete(&self, bundle_type: BundleType, object_id: ObjectId) -> Result<(), VaultError> {
            self.blobs.lock().await.remove(&(bundle_type, object_id));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn slicing_spec_splits_hex_id() {
        let spec = SlicingSpec::parse("0:1/1:5").unwrap();
        let parts = spec.slice("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(parts, vec!["d", "a39a", "3ee5e6b4b0d3255bfef95601890afd80709"]);
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(SlicingSpec::parse("0:1:2").is_err());
        assert!(SlicingSpec::parse("5:1").is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SlicingSpec::parse("0:1/1:5").unwrap();
        let cache = FsBundleCache::new(dir.path().to_path_buf(), spec, true);
        let id = ObjectId::from_str("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();

        assert!(!cache.is_cached(BundleType::Directory, id).await.unwrap());
        cache
            .add_stream(BundleType::Directory, id, single_chunk_stream(b"hello".to_vec()))
            .await
            .unwrap();
        assert!(cache.is_cached(BundleType::Directory, id).await.unwrap());
        assert_eq!(cache.get(BundleType::Directory, id).await.unwrap(), b"hello");
    }

    /// A bundle delivered across several chunks must be reassembled in
    /// order, not just the single-chunk case `single_chunk_stream` covers.
    #[tokio::test]
    async fn multi_chunk_stream_is_reassembled_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SlicingSpec::parse("0:1/1:5").unwrap();
        let cache = FsBundleCache::new(dir.path().to_path_buf(), spec, true);
        let id = ObjectId::from_str("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();

        let chunks: Vec<Result<Bytes, VaultError>> =
            vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo ")), Ok(Bytes::from_static(b"world"))];
        let stream: ByteStream = Box::pin(futures_util::stream::iter(chunks));
        cache.add_stream(BundleType::Directory, id, stream).await.unwrap();
        assert_eq!(cache.get(BundleType::Directory, id).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn delete_refused_without_allow_delete() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SlicingSpec::parse("0:1/1:5").unwrap();
        let cache = FsBundleCache::new(dir.path().to_path_buf(), spec, false);
        let id = ObjectId::from_str("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        cache
            .add_stream(BundleType::Directory, id, single_chunk_stream(b"hello".to_vec()))
            .await
            .unwrap();
        assert!(matches!(
            cache.delete(BundleType::Directory, id).await,
            Err(VaultError::DeleteDisabled)
        ));
    }
}
