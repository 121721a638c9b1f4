//! The tree object: a sorted list of `(mode, name, id)` entries describing
//! the contents of a directory. Archive directories (spec §3) map onto
//! these one-for-one; entry order and the exact mode encoding both feed
//! into the hash, so the git-bare cooker must reproduce them precisely.

use std::fmt::Display;

use crate::errors::VaultError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// The subset of git file modes the archive's directory entries can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeItemMode {
    /// Regular file, `100644`.
    Regular,
    /// Executable file, `100755`.
    Executable,
    /// Symbolic link, `120000`.
    Link,
    /// Sub-directory, `40000`.
    Tree,
    /// Gitlink (submodule / revision entry), `160000`.
    Commit,
}

impl TreeItemMode {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            TreeItemMode::Regular => b"100644",
            TreeItemMode::Executable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    pub fn from_bytes(mode: &[u8]) -> Result<Self, VaultError> {
        match mode {
            b"100644" => Ok(TreeItemMode::Regular),
            b"100755" => Ok(TreeItemMode::Executable),
            b"120000" => Ok(TreeItemMode::Link),
            b"40000" | b"040000" => Ok(TreeItemMode::Tree),
            b"160000" => Ok(TreeItemMode::Commit),
            other => Err(VaultError::MalformedObject(format!(
                "unrecognized tree entry mode: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub name: Vec<u8>,
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub items: Vec<TreeItem>,
}

impl Tree {
    /// Sorts entries the way git requires: byte-wise by name, with
    /// directory names treated as if suffixed by `/` so e.g. `foo` sorts
    /// after `foo.txt` but before `foo/bar`.
    pub fn new(mut items: Vec<TreeItem>) -> Self {
        items.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Tree { items }
    }
}

fn sort_key(item: &TreeItem) -> Vec<u8> {
    let mut key = item.name.clone();
    if item.mode == TreeItemMode::Tree {
        key.push(b'/');
    }
    key
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.items {
            writeln!(
                f,
                "{} {}\t{}",
                String::from_utf8_lossy(item.mode.as_bytes()),
                item.id,
                String::from_utf8_lossy(&item.name)
            )?;
        }
        Ok(())
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8]) -> Result<Self, VaultError> {
        let mut items = Vec::new();
        let mut cursor = 0usize;
        while cursor < data.len() {
            let space = data[cursor..]
                .iter()
                .position(|&b| b == b' ')
                .map(|p| cursor + p)
                .ok_or_else(|| VaultError::MalformedObject("tree: missing mode separator".to_string()))?;
            let mode = TreeItemMode::from_bytes(&data[cursor..space])?;

            let nul = data[space + 1..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| space + 1 + p)
                .ok_or_else(|| VaultError::MalformedObject("tree: missing name terminator".to_string()))?;
            let name = data[space + 1..nul].to_vec();

            let id_start = nul + 1;
            let id_end = id_start + ObjectId::LEN;
            if data.len() < id_end {
                return Err(VaultError::MalformedObject("tree: truncated entry id".to_string()));
            }
            let id = ObjectId::from_bytes(&data[id_start..id_end])
                .map_err(VaultError::MalformedObject)?;

            items.push(TreeItem { mode, name, id });
            cursor = id_end;
        }
        Ok(Tree { items })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn to_data(&self) -> Result<Vec<u8>, VaultError> {
        let mut sorted = self.items.clone();
        sorted.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

        let mut data = Vec::new();
        for item in &sorted {
            data.extend(item.mode.as_bytes());
            data.push(b' ');
            data.extend(&item.name);
            data.push(0);
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn id(hex: &str) -> ObjectId {
        ObjectId::from_str(hex).unwrap()
    }

    #[test]
    fn round_trips_through_bytes() {
        let tree = Tree::new(vec![
            TreeItem {
                mode: TreeItemMode::Regular,
                name: b"README.md".to_vec(),
                id: id("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
            },
            TreeItem {
                mode: TreeItemMode::Tree,
                name: b"src".to_vec(),
                id: id("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            },
        ]);
        let data = tree.to_data().unwrap();
        let reparsed = Tree::from_bytes(&data).unwrap();
        assert_eq!(reparsed, tree);
    }

    #[test]
    fn sorts_directories_after_same_prefixed_files() {
        let tree = Tree::new(vec![
            TreeItem {
                mode: TreeItemMode::Tree,
                name: b"foo".to_vec(),
                id: id("da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            },
            TreeItem {
                mode: TreeItemMode::Regular,
                name: b"foo.txt".to_vec(),
                id: id("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
            },
        ]);
        assert_eq!(tree.items[0].name, b"foo.txt");
        assert_eq!(tree.items[1].name, b"foo");
    }
}
