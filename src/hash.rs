//! Object identifiers for the archive.
//!
//! The archive is SHA-1-addressed end to end (`sha1_git` in the data model):
//! revisions, directories, releases and contents all carry a 20-byte id, and
//! the git objects the git-bare cooker writes must hash to that same id.
//! `ObjectId` is that 20-byte value with the hex `Display`/`FromStr` pair
//! the rest of the crate (cache paths, SWHIDs, git object filenames) builds
//! on.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::internal::object::types::ObjectType;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ObjectId(pub [u8; 20]);

impl ObjectId {
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != Self::LEN {
            return Err(format!(
                "expected a {}-byte object id, got {}",
                Self::LEN,
                bytes.len()
            ));
        }
        let mut buf = [0u8; 20];
        buf.copy_from_slice(bytes);
        Ok(ObjectId(buf))
    }

    /// Hash of `"{type} {len}\0{data}"`, i.e. the git loose-object hash of `data`
    /// tagged with `kind`'s git object-type name.
    pub fn from_type_and_data(kind: ObjectType, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        let digest = hasher.finalize();
        ObjectId::from_bytes(&digest).expect("sha1 digest is always 20 bytes")
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First five hex characters, as used in notification subjects (spec §4.8/§8 S6).
    pub fn short_hex(&self) -> String {
        self.as_hex().chars().take(5).collect()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId([0u8; 20])
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.as_hex())
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for ObjectId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(format!("expected a 40-char hex object id, got {}", s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        ObjectId::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::from_str("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert_eq!(id.as_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(id.short_hex(), "da39a");
    }

    #[test]
    fn from_type_and_data_matches_git_empty_blob() {
        let id = ObjectId::from_type_and_data(ObjectType::Blob, b"");
        // The well-known git hash of an empty blob.
        assert_eq!(id.as_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }
}
