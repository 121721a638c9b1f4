//! The commit object. In Git, a commit records the tree that represents the
//! full state of the repository at a point in time, the parent commit(s) it
//! follows from, who authored and committed it, and a message.
//!
//! The git-bare cooker constructs one of these per archive revision; its
//! serialized bytes must hash to that revision's `sha1_git`, so the byte
//! layout below is exact, not approximate.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree_id: ObjectId,
    pub parent_ids: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.tree_id)?;
        for parent in &self.parent_ids {
            writeln!(f, "parent {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        tree_id: ObjectId,
        parent_ids: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        Commit {
            tree_id,
            parent_ids,
            author,
            committer,
            message: message.into(),
        }
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8]) -> Result<Self, VaultError> {
        let err = |msg: &str| VaultError::MalformedObject(format!("commit: {msg}"));

        let mut cursor = 0usize;

        let tree_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing tree line"))?;
        let tree_line = &data[cursor..cursor + tree_line_end];
        cursor += tree_line_end + 1;
        if !tree_line.starts_with(b"tree ") {
            return Err(err("expected `tree` line first"));
        }
        let tree_id = ObjectId::from_str(
            tree_line[5..]
                .to_str()
                .map_err(|_| err("tree id is not utf-8"))?,
        )
        .map_err(|e| err(&e))?;

        let mut parent_ids = Vec::new();
        loop {
            let line_end = data[cursor..]
                .find_byte(0x0a)
                .ok_or_else(|| err("unterminated line"))?;
            let line = &data[cursor..cursor + line_end];
            if !line.starts_with(b"parent ") {
                break;
            }
            let parent_id = ObjectId::from_str(
                line[7..]
                    .to_str()
                    .map_err(|_| err("parent id is not utf-8"))?,
            )
            .map_err(|e| err(&e))?;
            parent_ids.push(parent_id);
            cursor += line_end + 1;
        }

        let author_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing author line"))?;
        let author = Signature::from_data(data[cursor..cursor + author_line_end].to_vec())?;
        cursor += author_line_end + 1;

        let committer_line_end = data[cursor..]
            .find_byte(0x0a)
            .ok_or_else(|| err("missing committer line"))?;
        let committer = Signature::from_data(data[cursor..cursor + committer_line_end].to_vec())?;
        cursor += committer_line_end + 1;

        let message = String::from_utf8_lossy(&data[cursor..]).into_owned();

        Ok(Commit {
            tree_id,
            parent_ids,
            author,
            committer,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn to_data(&self) -> Result<Vec<u8>, VaultError> {
        let mut data = Vec::new();
        data.extend(b"tree ");
        data.extend(self.tree_id.as_hex().as_bytes());
        data.push(0x0a);
        for parent_id in &self.parent_ids {
            data.extend(b"parent ");
            data.extend(parent_id.as_hex().as_bytes());
            data.push(0x0a);
        }
        data.extend(b"author ");
        data.extend(self.author.to_data()?);
        data.push(0x0a);
        data.extend(b"committer ");
        data.extend(self.committer.to_data()?);
        data.push(0x0a);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Commit {
        Commit::new(
            ObjectId::from_str("341e54913a3a43069f2927cc0f703e5a9f730df1").unwrap(),
            vec![],
            Signature::new("swh-vault, git-bare cooker", "robot@softwareheritage.org", 1700000000),
            Signature::new("swh-vault, git-bare cooker", "robot@softwareheritage.org", 1700000000),
            "synthetic revision\n",
        )
    }

    #[test]
    fn round_trips_through_bytes() {
        let commit = sample();
        let data = commit.to_data().unwrap();
        let reparsed = Commit::from_bytes(&data).unwrap();
        assert_eq!(reparsed, commit);
    }

    #[test]
    fn object_id_is_deterministic() {
        let commit = sample();
        let a = commit.object_id().unwrap();
        let b = commit.object_id().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_multiple_parents() {
        let raw = b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1\nparent aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\nparent bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\nauthor a <a@example.org> 1700000000 +0000\ncommitter a <a@example.org> 1700000000 +0000\n\nmerge\n";
        let commit = Commit::from_bytes(raw).unwrap();
        assert_eq!(commit.parent_ids.len(), 2);
    }
}
