//! The blob object: the raw bytes of a file, with no header beyond the
//! `"blob {len}\0"` tag applied by [`super::ObjectTrait::object_id`]
//! /[`super::ObjectTrait::to_data`].
//!
//! Archive contents map onto blobs directly. The git-bare cooker cannot
//! always produce one — a content whose bytes were never retrieved has
//! nothing to reconstruct, so the cooker skips writing that blob entirely
//! rather than fabricate a stand-in under the real object id.

use std::fmt::Display;

use crate::errors::VaultError;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Blob { data }
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "blob ({} bytes)", self.data.len())
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8]) -> Result<Self, VaultError> {
        Ok(Blob {
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn to_data(&self) -> Result<Vec<u8>, VaultError> {
        Ok(self.data.clone())
    }
}
