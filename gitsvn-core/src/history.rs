//! Path history
//!
//! Backward first-parent walks answering "when did this path last change",
//! plus tree diffs and content-identity rename detection. Results are
//! memoised: (path, revision) outcomes in a per-branch LRU, (commit, path)
//! entry lookups in an append-only map keyed by content hash.

use crate::error::Result;
use crate::object::{FileMode, ObjectId};
use crate::paths;
use crate::repository::{Branch, CopyFrom, Repository};
use crate::store;

/// Entry identity at one revision: object id plus mode.
pub type EntrySig = (ObjectId, FileMode);

/// Resolve a path inside the commit at `rev` without property resolution.
pub async fn entry_sig(
    repo: &Repository,
    branch: &Branch,
    rev: u64,
    path: &str,
) -> Result<Option<EntrySig>> {
    let commit_id = repo.commit_id_at(branch, rev).await?;
    let key = (commit_id, path.to_string());
    if let Some(memo) = repo.entry_memo.get(&key) {
        return Ok(*memo);
    }
    let commit = store::load_commit(repo.store(), commit_id).await?;
    let mut sig: Option<EntrySig> = Some((commit.tree, FileMode::Dir));
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match sig {
            Some((tree_id, mode)) if mode.is_dir() && mode != FileMode::Link => {
                let tree = repo.tree(tree_id).await?;
                sig = tree.get(segment).map(|entry| (entry.id, entry.mode));
            }
            _ => {
                sig = None;
                break;
            }
        }
    }
    repo.entry_memo.insert(key, sig);
    Ok(sig)
}

/// Largest revision `r' <= rev` at which the entry at `path` changed
/// (added, modified or deleted); `None` when the path never existed up to
/// `rev`.
pub async fn last_change(
    repo: &Repository,
    branch: &Branch,
    path: &str,
    rev: u64,
) -> Result<Option<u64>> {
    let path = paths::normalize(path);
    if let Some(memo) = branch.last_change_memo.lock().get(&(path.clone(), rev)) {
        return Ok(*memo);
    }

    let mut result = None;
    let mut ever_present = false;
    let mut current = entry_sig(repo, branch, rev, &path).await?;
    let mut r = rev;
    loop {
        // A memoised lower revision answers the rest of the walk.
        if r < rev {
            if let Some(memo) = branch.last_change_memo.lock().get(&(path.clone(), r)) {
                result = *memo;
                ever_present = result.is_some();
                break;
            }
        }
        let previous = if r == 0 {
            None
        } else {
            entry_sig(repo, branch, r - 1, &path).await?
        };
        ever_present |= current.is_some();
        if current != previous {
            result = Some(r);
            ever_present = true;
            break;
        }
        if r == 0 {
            break;
        }
        r -= 1;
        current = previous;
    }

    let answer = if ever_present { result } else { None };
    branch
        .last_change_memo
        .lock()
        .put((path, rev), answer);
    Ok(answer)
}

/// One changed node between two trees.
#[derive(Debug, Clone)]
pub struct TreeDiffEntry {
    pub path: String,
    pub old: Option<EntrySig>,
    pub new: Option<EntrySig>,
}

impl TreeDiffEntry {
    /// Changed-path letter as used by `log`.
    pub fn action(&self) -> char {
        match (&self.old, &self.new) {
            (None, Some(_)) => 'A',
            (Some(_), None) => 'D',
            _ => 'M',
        }
    }

    pub fn is_dir(&self) -> bool {
        self.new
            .or(self.old)
            .map(|(_, mode)| mode.is_dir())
            .unwrap_or(false)
    }
}

/// All changed nodes between two tree roots, nested entries included.
pub async fn diff_trees(
    repo: &Repository,
    old_root: Option<ObjectId>,
    new_root: Option<ObjectId>,
) -> Result<Vec<TreeDiffEntry>> {
    let mut out = Vec::new();
    let mut stack = vec![(String::new(), old_root, new_root)];
    while let Some((prefix, old_id, new_id)) = stack.pop() {
        if old_id == new_id {
            continue;
        }
        let old_tree = match old_id {
            Some(id) => Some(repo.tree(id).await?),
            None => None,
        };
        let new_tree = match new_id {
            Some(id) => Some(repo.tree(id).await?),
            None => None,
        };
        let mut names: Vec<&str> = Vec::new();
        if let Some(tree) = old_tree.as_deref() {
            names.extend(tree.iter().map(|e| e.name.as_str()));
        }
        if let Some(tree) = new_tree.as_deref() {
            names.extend(tree.iter().map(|e| e.name.as_str()));
        }
        names.sort_unstable();
        names.dedup();

        // Borrowed names die with this iteration; collect moves first.
        let mut pending = Vec::new();
        for name in names {
            let old = old_tree
                .as_deref()
                .and_then(|t| t.get(name))
                .map(|e| (e.id, e.mode));
            let new = new_tree
                .as_deref()
                .and_then(|t| t.get(name))
                .map(|e| (e.id, e.mode));
            if old == new {
                continue;
            }
            let path = paths::join(&prefix, name);
            let old_is_dir = old.map(|(_, m)| m == FileMode::Dir).unwrap_or(false);
            let new_is_dir = new.map(|(_, m)| m == FileMode::Dir).unwrap_or(false);
            if old_is_dir || new_is_dir {
                pending.push((
                    path.clone(),
                    old.filter(|_| old_is_dir).map(|(id, _)| id),
                    new.filter(|_| new_is_dir).map(|(id, _)| id),
                ));
            }
            out.push(TreeDiffEntry { path, old, new });
        }
        stack.extend(pending);
    }
    Ok(out)
}

/// Rename/copy source for a path that first appeared at `rev`.
///
/// Detection runs in two tiers: identity of content first (an entry with
/// the same object id disappeared from the parent revision), then a
/// size-and-prefix similarity fallback for renames that also edited the
/// file. Either tier must be unambiguous to count.
pub async fn copy_from(
    repo: &Repository,
    branch: &Branch,
    path: &str,
    rev: u64,
) -> Result<Option<CopyFrom>> {
    if !repo.has_rename_detection() || rev == 0 {
        return Ok(None);
    }
    let path = paths::normalize(path);
    let key = (rev, path.clone());
    if let Some(memo) = branch.copy_from_memo.get(&key) {
        return Ok(memo.clone());
    }

    let result = detect_copy_from(repo, branch, &path, rev).await?;
    branch.copy_from_memo.insert(key, result.clone());
    Ok(result)
}

/// Similarity probe window for the fallback tier.
const SIMILARITY_PREFIX: usize = 1024;

async fn detect_copy_from(
    repo: &Repository,
    branch: &Branch,
    path: &str,
    rev: u64,
) -> Result<Option<CopyFrom>> {
    let Some(new_sig) = entry_sig(repo, branch, rev, path).await? else {
        return Ok(None);
    };
    if entry_sig(repo, branch, rev - 1, path).await?.is_some() {
        return Ok(None);
    }
    let old_commit = store::load_commit(
        repo.store(),
        repo.commit_id_at(branch, rev - 1).await?,
    )
    .await?;
    let new_commit =
        store::load_commit(repo.store(), repo.commit_id_at(branch, rev).await?).await?;
    let diff = diff_trees(repo, Some(old_commit.tree), Some(new_commit.tree)).await?;
    let removed: Vec<&TreeDiffEntry> =
        diff.iter().filter(|entry| entry.new.is_none()).collect();

    // Tier one: identity by content.
    let mut identity = removed.iter().filter(|entry| entry.old == Some(new_sig));
    if let Some(first) = identity.next() {
        if identity.next().is_some() {
            return Ok(None);
        }
        return Ok(Some(CopyFrom {
            path: first.path.clone(),
            revision: rev - 1,
        }));
    }

    // Tier two: size and content-prefix similarity; files only.
    let (new_id, new_mode) = new_sig;
    if new_mode.is_dir() {
        return Ok(None);
    }
    let new_content = repo.store().get(new_id).await?;
    let mut similar = Vec::new();
    for entry in &removed {
        let Some((old_id, old_mode)) = entry.old else {
            continue;
        };
        if old_mode.is_dir() {
            continue;
        }
        let old_content = repo.store().get(old_id).await?;
        if contents_similar(&old_content, &new_content) {
            similar.push(entry.path.clone());
        }
    }
    if similar.len() != 1 {
        return Ok(None);
    }
    Ok(Some(CopyFrom {
        path: similar.remove(0),
        revision: rev - 1,
    }))
}

/// Sizes within a factor of two and at least half of the probed prefix
/// shared byte-for-byte.
fn contents_similar(old: &[u8], new: &[u8]) -> bool {
    if old.is_empty() || new.is_empty() {
        return false;
    }
    let (small, large) = if old.len() <= new.len() {
        (old.len(), new.len())
    } else {
        (new.len(), old.len())
    };
    if large > small * 2 {
        return false;
    }
    let probe = small.min(SIMILARITY_PREFIX);
    let shared = old
        .iter()
        .zip(new.iter())
        .take(probe)
        .take_while(|(a, b)| a == b)
        .count();
    shared * 2 >= probe
}
