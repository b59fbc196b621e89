//! Core object model
//!
//! Content-addressable storage with Blob, Tree and Commit objects keyed by
//! a 20-byte digest over a `"<kind> <len>\0"` header plus payload, so ids
//! are stable across servers sharing the same backing store.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Compute the id of an object of `kind` with the given payload.
    pub fn for_object(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.tag().as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    fn tag(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

/// Entry mode within a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileMode {
    /// Regular file
    File,
    /// Regular file with the executable bit
    Executable,
    /// Symbolic link; the blob holds the target path
    Symlink,
    /// Sub-tree
    Dir,
    /// Nested repository link; never readable through this server
    Link,
}

impl FileMode {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileMode::Dir | FileMode::Link)
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub mode: FileMode,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, mode: FileMode, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            mode,
            id,
        }
    }
}

/// Directory object
///
/// Entries are kept byte-ordered by name so serialisation is deterministic
/// and lookups match the wire's byte-wise comparison rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectKind::Tree, &self.to_bytes().unwrap_or_default())
    }
}

/// Commit object
///
/// Only the first parent participates in revision synthesis; further
/// parents are preserved but never walked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: String,
    pub committer: String,
    pub message: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Timezone offset in minutes
    pub tz_offset: i32,
}

impl Commit {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectKind::Commit, &self.to_bytes().unwrap_or_default())
    }

    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }

    /// Commit date in the ISO form clients expect.
    pub fn date_string(&self) -> String {
        crate::format_svn_date(self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::new([42u8; 20]);
        assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(id.to_hex().len(), 40);
    }

    #[test]
    fn test_kind_affects_id() {
        let blob = ObjectId::for_object(ObjectKind::Blob, b"data");
        let tree = ObjectId::for_object(ObjectKind::Tree, b"data");
        assert_ne!(blob, tree);
    }

    #[test]
    fn test_tree_entries_ordered() {
        let mut tree = Tree::new();
        let id = ObjectId::new([0u8; 20]);
        tree.insert(TreeEntry::new("b", FileMode::File, id));
        tree.insert(TreeEntry::new("a", FileMode::Dir, id));
        let names: Vec<_> = tree.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_commit_roundtrip() {
        let commit = Commit {
            tree: ObjectId::new([1u8; 20]),
            parents: vec![ObjectId::new([2u8; 20])],
            author: "alice".to_string(),
            committer: "alice".to_string(),
            message: "change".to_string(),
            timestamp: 1234567890,
            tz_offset: 0,
        };
        let restored = Commit::from_bytes(&commit.to_bytes().unwrap()).unwrap();
        assert_eq!(commit.id(), restored.id());
        assert_eq!(restored.first_parent(), Some(ObjectId::new([2u8; 20])));
    }
}
