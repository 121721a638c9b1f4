//! Canonical git object model: the four base object types the git-bare
//! cooker serializes to reconstruct a byte-for-byte `.git` directory from
//! the archive.
//!
//! Every object's on-disk bytes are exactly what git itself would produce,
//! because the cooker's contract is that `ObjectId::from_type_and_data` of
//! `to_data()` must equal the archive's own `sha1_git` for that object.
//! None of these types attempt to represent delta-encoded or packed
//! forms; packing is left to the real `git repack` binary.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tag;
pub mod tree;
pub mod types;

use std::fmt::Display;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::internal::object::types::ObjectType;

/// Common interface implemented by [`blob::Blob`], [`tree::Tree`],
/// [`commit::Commit`] and [`tag::Tag`].
pub trait ObjectTrait: Send + Sync + Display {
    /// Parses an object from its already-decompressed, already-dehydrated
    /// payload (i.e. everything after the `"{type} {len}\0"` header).
    fn from_bytes(data: &[u8]) -> Result<Self, VaultError>
    where
        Self: Sized;

    fn get_type(&self) -> ObjectType;

    /// Serializes the object back to the payload git would hash and store.
    fn to_data(&self) -> Result<Vec<u8>, VaultError>;

    /// The id this object hashes to. The git-bare cooker uses this to
    /// verify every object it writes matches the archive's `sha1_git`
    /// before moving on.
    fn object_id(&self) -> Result<ObjectId, VaultError> {
        let data = self.to_data()?;
        Ok(ObjectId::from_type_and_data(self.get_type(), &data))
    }
}
