//! Test support: build commits directly against a repository
//!
//! Used by unit tests here and by the server's integration suites to seed
//! repositories without driving the wire protocol.

use std::collections::BTreeMap;

use crate::object::{Commit, FileMode, ObjectId, ObjectKind, Tree, TreeEntry};
use crate::paths;
use crate::repository::Repository;
use crate::store;

/// One tree mutation.
#[derive(Debug, Clone)]
pub enum TreeOp {
    Put {
        path: String,
        mode: FileMode,
        content: Vec<u8>,
    },
    Delete(String),
}

impl TreeOp {
    pub fn put(path: &str, content: &str) -> Self {
        TreeOp::Put {
            path: path.to_string(),
            mode: FileMode::File,
            content: content.as_bytes().to_vec(),
        }
    }
}

/// Commit regular files; `(path, content)` pairs.
pub async fn commit_files(
    repo: &Repository,
    branch: &str,
    message: &str,
    files: &[(&str, &str)],
) -> u64 {
    let ops: Vec<TreeOp> = files
        .iter()
        .map(|(path, content)| TreeOp::put(path, content))
        .collect();
    apply(repo, branch, message, &ops).await
}

/// Commit entries with explicit modes.
pub async fn commit_entries(
    repo: &Repository,
    branch: &str,
    message: &str,
    entries: &[(&str, FileMode, &[u8])],
) -> u64 {
    let ops: Vec<TreeOp> = entries
        .iter()
        .map(|(path, mode, content)| TreeOp::Put {
            path: path.to_string(),
            mode: *mode,
            content: content.to_vec(),
        })
        .collect();
    apply(repo, branch, message, &ops).await
}

/// Apply tree operations on top of the branch tip and commit the result.
pub async fn apply(repo: &Repository, branch: &str, message: &str, ops: &[TreeOp]) -> u64 {
    let branch = repo.branch(branch).unwrap();
    let _write = repo.lock_branch_for_write(branch).await;
    repo.update_revisions(branch).await.unwrap();
    let tip_rev = repo.latest_revision(branch).await;
    let tip_id = repo.commit_id_at(branch, tip_rev).await.unwrap();
    let tip = store::load_commit(repo.store(), tip_id).await.unwrap();

    // Load every directory touched by an op into a path-keyed map.
    let mut dirs: BTreeMap<String, Tree> = BTreeMap::new();
    dirs.insert(
        String::new(),
        repo.tree(tip.tree).await.unwrap().as_ref().clone(),
    );
    for op in ops {
        let path = match op {
            TreeOp::Put { path, .. } => path,
            TreeOp::Delete(path) => path,
        };
        let mut walked = String::new();
        for segment in paths::parent(path).split('/').filter(|s| !s.is_empty()) {
            let parent_tree = dirs.get(&walked).cloned().unwrap_or_default();
            let child_path = paths::join(&walked, segment);
            if !dirs.contains_key(&child_path) {
                let tree = match parent_tree.get(segment) {
                    Some(entry) if entry.mode.is_dir() => {
                        repo.tree(entry.id).await.unwrap().as_ref().clone()
                    }
                    _ => Tree::new(),
                };
                dirs.insert(child_path.clone(), tree);
            }
            walked = child_path;
        }
    }

    // Apply leaf mutations.
    for op in ops {
        match op {
            TreeOp::Put {
                path,
                mode,
                content,
            } => {
                let blob_id = repo
                    .store()
                    .put(ObjectKind::Blob, bytes::Bytes::from(content.clone()))
                    .await
                    .unwrap();
                let dir = dirs.entry(paths::parent(path).to_string()).or_default();
                dir.insert(TreeEntry::new(paths::base_name(path), *mode, blob_id));
            }
            TreeOp::Delete(path) => {
                let dir = dirs.entry(paths::parent(path).to_string()).or_default();
                dir.remove(paths::base_name(path));
            }
        }
    }

    // Serialise bottom-up, updating parent links.
    let dir_paths: Vec<String> = dirs.keys().cloned().collect();
    for dir_path in dir_paths.iter().rev() {
        if dir_path.is_empty() {
            continue;
        }
        let tree = dirs.get(dir_path).unwrap().clone();
        let parent_path = paths::parent(dir_path).to_string();
        let name = paths::base_name(dir_path).to_string();
        let parent = dirs.get_mut(&parent_path).unwrap();
        if tree.is_empty() {
            parent.remove(&name);
        } else {
            let id = store::put_tree(repo.store(), &tree).await.unwrap();
            parent.insert(TreeEntry::new(name, FileMode::Dir, id));
        }
    }
    let root = dirs.remove("").unwrap();
    let tree_id = store::put_tree(repo.store(), &root).await.unwrap();

    let commit = Commit {
        tree: tree_id,
        parents: vec![tip_id],
        author: "tester".to_string(),
        committer: "tester".to_string(),
        message: message.to_string(),
        timestamp: 1_700_000_000 + (tip_rev as i64 + 1) * 60,
        tz_offset: 0,
    };
    repo.commit_revision(branch, tip_id, commit).await.unwrap()
}

/// Root tree id at a revision.
pub async fn root_tree(repo: &Repository, branch: &str, rev: u64) -> ObjectId {
    let branch = repo.branch(branch).unwrap();
    let id = repo.commit_id_at(branch, rev).await.unwrap();
    store::load_commit(repo.store(), id).await.unwrap().tree
}
