//! Repository and branch engine
//!
//! A repository ties the content-addressed object store to the synthetic
//! linear revision space: each branch walks its first-parent chain and maps
//! revision numbers onto commit ids. The mapping is persisted and only ever
//! extended at the tip, so numbers stay stable for any commit once observed.

use dashmap::DashMap;
use lru::LruCache;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::access::AccessRules;
use crate::error::{codes, Result, SvnError};
use crate::hooks::HookManager;
use crate::locks::LockRegistry;
use crate::object::{Commit, FileMode, ObjectId, Tree};
use crate::props::PropSource;
use crate::revision::RevisionView;
use crate::store::{self, KeyValueStore, ObjectStore};
use crate::{paths, props};

const REVS_SCHEMA_VERSION: u32 = 1;
const LAST_CHANGE_MEMO_SIZE: usize = 16 * 1024;

/// A branch's synthesised revision state.
#[derive(Default)]
struct BranchState {
    /// Commit ids ordered root-first; index = revision number
    revisions: Vec<ObjectId>,
    /// Reverse map commit → revision
    index: HashMap<ObjectId, u64>,
}

/// One served branch of a repository.
pub struct Branch {
    name: String,
    ref_key: String,
    revs_key: String,
    state: tokio::sync::RwLock<BranchState>,
    /// Held for the whole edit-apply-flush cycle of a commit
    write_lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) last_change_memo: parking_lot::Mutex<LruCache<(String, u64), Option<u64>>>,
    pub(crate) copy_from_memo: DashMap<(u64, String), Option<CopyFrom>>,
}

impl Branch {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_key: format!("ref.{name}"),
            revs_key: format!("revs.{name}.{REVS_SCHEMA_VERSION}"),
            state: tokio::sync::RwLock::new(BranchState::default()),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            last_change_memo: parking_lot::Mutex::new(LruCache::new(
                NonZeroUsize::new(LAST_CHANGE_MEMO_SIZE).unwrap(),
            )),
            copy_from_memo: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// When a path first appeared because of a rename or copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFrom {
    pub path: String,
    pub revision: u64,
}

/// A repository served over the wire protocol.
pub struct Repository {
    name: String,
    uuid: String,
    store: Arc<dyn ObjectStore>,
    meta: KeyValueStore,
    rename_detection: bool,
    access: AccessRules,
    locks: LockRegistry,
    hooks: HookManager,
    branches: BTreeMap<String, Branch>,
    // Append-only caches keyed by content hash; never invalidated.
    tree_cache: DashMap<ObjectId, Arc<Tree>>,
    prop_file_cache: DashMap<ObjectId, Arc<Vec<PropSource>>>,
    dir_prop_cache: DashMap<ObjectId, Arc<Vec<PropSource>>>,
    content_info_cache: DashMap<String, (u64, String)>,
    pub(crate) entry_memo: DashMap<(ObjectId, String), Option<(ObjectId, FileMode)>>,
}

impl Repository {
    /// Open a repository over the given store.
    pub fn open(
        name: &str,
        store: Arc<dyn ObjectStore>,
        meta: KeyValueStore,
        hooks: HookManager,
        access: AccessRules,
        branches: &[String],
        rename_detection: bool,
    ) -> Result<Self> {
        let uuid_key = format!("uuid.{name}");
        let uuid = match meta.get(&uuid_key)? {
            Some(data) => String::from_utf8(data)
                .map_err(|_| SvnError::new(codes::BASE, "corrupt repository uuid"))?,
            None => {
                let uuid = uuid::Uuid::new_v4().to_string();
                meta.put_durable(&uuid_key, uuid.as_bytes())?;
                uuid
            }
        };
        let locks = LockRegistry::open(meta.clone(), name)?;
        let branches = branches
            .iter()
            .map(|branch| (branch.clone(), Branch::new(branch)))
            .collect();
        Ok(Self {
            name: name.to_string(),
            uuid,
            store,
            meta,
            rename_detection,
            access,
            locks,
            hooks,
            branches,
            tree_cache: DashMap::new(),
            prop_file_cache: DashMap::new(),
            dir_prop_cache: DashMap::new(),
            content_info_cache: DashMap::new(),
            entry_memo: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn access(&self) -> &AccessRules {
        &self.access
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    pub fn has_rename_detection(&self) -> bool {
        self.rename_detection
    }

    pub fn branch(&self, name: &str) -> Result<&Branch> {
        self.branches.get(name).ok_or_else(|| {
            SvnError::new(
                codes::RA_SVN_REPOS_NOT_FOUND,
                format!("Unknown branch: {name}"),
            )
        })
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Create the bootstrap empty commit (revision 0) on branches that have
    /// no ref yet.
    pub async fn initialize(&self) -> Result<()> {
        for branch in self.branches.values() {
            if self.read_ref(branch)?.is_some() {
                self.update_revisions(branch).await?;
                continue;
            }
            let tree = Tree::new();
            let tree_id = store::put_tree(self.store.as_ref(), &tree).await?;
            let commit = Commit {
                tree: tree_id,
                parents: Vec::new(),
                author: "system".to_string(),
                committer: "system".to_string(),
                message: "Initial commit".to_string(),
                timestamp: chrono::Utc::now().timestamp(),
                tz_offset: 0,
            };
            let commit_id = store::put_commit(self.store.as_ref(), &commit).await?;
            self.store.flush().await?;
            self.meta
                .put_durable(&branch.ref_key, commit_id.as_bytes())?;
            self.update_revisions(branch).await?;
            tracing::info!(
                repository = self.name,
                branch = branch.name,
                "initialized with empty revision 0"
            );
        }
        Ok(())
    }

    fn read_ref(&self, branch: &Branch) -> Result<Option<ObjectId>> {
        match self.meta.get(&branch.ref_key)? {
            Some(data) if data.len() == 20 => {
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(&data);
                Ok(Some(ObjectId::new(bytes)))
            }
            Some(_) => Err(SvnError::new(codes::BASE, "corrupt branch ref")),
            None => Ok(None),
        }
    }

    /// Bring the revision map up to date with the branch ref.
    ///
    /// New commits extend the list at the tip; the existing prefix is never
    /// rewritten.
    pub async fn update_revisions(&self, branch: &Branch) -> Result<()> {
        let Some(tip) = self.read_ref(branch)? else {
            return Ok(());
        };
        {
            let state = branch.state.read().await;
            if state.revisions.last() == Some(&tip) {
                return Ok(());
            }
        }
        let mut state = branch.state.write().await;
        if state.revisions.is_empty() {
            if let Some(data) = self.meta.get(&branch.revs_key)? {
                let revisions: Vec<ObjectId> = bincode::deserialize(&data).map_err(|e| {
                    SvnError::new(codes::BASE, format!("corrupt revision map: {e}"))
                })?;
                state.index = revisions
                    .iter()
                    .enumerate()
                    .map(|(rev, id)| (*id, rev as u64))
                    .collect();
                state.revisions = revisions;
            }
        }
        if state.revisions.last() == Some(&tip) {
            return Ok(());
        }

        // Walk first parents tip-ward until a known commit is reached.
        let mut fresh = Vec::new();
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            if state.index.contains_key(&id) {
                break;
            }
            let commit = store::load_commit(self.store.as_ref(), id).await?;
            cursor = commit.first_parent();
            fresh.push(id);
        }
        fresh.reverse();
        for id in fresh {
            let rev = state.revisions.len() as u64;
            state.revisions.push(id);
            state.index.insert(id, rev);
        }
        let data = bincode::serialize(&state.revisions)
            .map_err(|e| SvnError::new(codes::BASE, format!("serialize revision map: {e}")))?;
        self.meta.put(&branch.revs_key, &data)?;
        Ok(())
    }

    /// Latest revision number of a branch.
    pub async fn latest_revision(&self, branch: &Branch) -> u64 {
        let state = branch.state.read().await;
        state.revisions.len().saturating_sub(1) as u64
    }

    /// Commit id at a revision.
    pub async fn commit_id_at(&self, branch: &Branch, rev: u64) -> Result<ObjectId> {
        let state = branch.state.read().await;
        state
            .revisions
            .get(rev as usize)
            .copied()
            .ok_or_else(|| SvnError::no_such_revision(rev))
    }

    /// Revision number of a commit, if it was ever observed on the branch.
    pub async fn revision_of(&self, branch: &Branch, id: ObjectId) -> Option<u64> {
        branch.state.read().await.index.get(&id).copied()
    }

    /// Open a revision view.
    pub async fn view<'a>(&'a self, branch: &'a Branch, rev: u64) -> Result<RevisionView<'a>> {
        let id = self.commit_id_at(branch, rev).await?;
        let commit = store::load_commit(self.store.as_ref(), id).await?;
        Ok(RevisionView::new(self, branch, rev, id, commit))
    }

    /// Newest revision whose commit date is not after `timestamp`.
    pub async fn revision_by_date(&self, branch: &Branch, timestamp: i64) -> Result<u64> {
        let latest = self.latest_revision(branch).await;
        let mut best = 0;
        for rev in 0..=latest {
            let id = self.commit_id_at(branch, rev).await?;
            let commit = store::load_commit(self.store.as_ref(), id).await?;
            if commit.timestamp <= timestamp {
                best = rev;
            } else {
                break;
            }
        }
        Ok(best)
    }

    /// Load a tree through the append-only cache.
    pub async fn tree(&self, id: ObjectId) -> Result<Arc<Tree>> {
        if let Some(tree) = self.tree_cache.get(&id) {
            return Ok(tree.clone());
        }
        let tree = Arc::new(store::load_tree(self.store.as_ref(), id).await?);
        self.tree_cache.insert(id, tree.clone());
        Ok(tree)
    }

    /// Parsed property dotfile by blob id.
    pub async fn prop_file(&self, file_name: &str, blob: ObjectId) -> Result<Arc<Vec<PropSource>>> {
        if let Some(parsed) = self.prop_file_cache.get(&blob) {
            return Ok(parsed.clone());
        }
        let data = self.store.get(blob).await?;
        let content = String::from_utf8_lossy(&data);
        let parsed = Arc::new(props::parse_property_file(file_name, &content));
        self.prop_file_cache.insert(blob, parsed.clone());
        Ok(parsed)
    }

    /// Property sources contributed by a directory's own dotfiles.
    pub async fn dir_prop_sources(&self, tree_id: ObjectId) -> Result<Arc<Vec<PropSource>>> {
        if let Some(sources) = self.dir_prop_cache.get(&tree_id) {
            return Ok(sources.clone());
        }
        let tree = self.tree(tree_id).await?;
        let mut collected = Vec::new();
        for entry in tree.iter() {
            if !entry.mode.is_dir() && props::is_property_file(&entry.name) {
                collected.extend(self.prop_file(&entry.name, entry.id).await?.iter().cloned());
            }
        }
        let sources = Arc::new(collected);
        self.dir_prop_cache.insert(tree_id, sources.clone());
        Ok(sources)
    }

    /// Size and md5 of a blob as seen through a filter.
    pub async fn content_info(
        &self,
        filter: &'static str,
        blob: ObjectId,
        load: impl std::future::Future<Output = Result<bytes::Bytes>>,
    ) -> Result<(u64, String)> {
        let key = format!("{filter} {blob}");
        if let Some(info) = self.content_info_cache.get(&key) {
            return Ok(info.clone());
        }
        let content = load.await?;
        let info = (
            content.len() as u64,
            format!("{:x}", md5::compute(&content)),
        );
        self.content_info_cache.insert(key, info.clone());
        Ok(info)
    }

    /// Binary classification of a blob as seen through a filter, persisted
    /// so restarts keep the verdicts.
    pub async fn is_binary(
        &self,
        filter: &'static str,
        blob: ObjectId,
        load: impl std::future::Future<Output = Result<bytes::Bytes>>,
    ) -> Result<bool> {
        let key = format!("bin.{filter}.{blob}");
        if let Some(cached) = self.meta.get(&key)? {
            return Ok(cached == [1]);
        }
        let content = load.await?;
        let probe = &content[..content.len().min(8000)];
        let binary = probe.contains(&0);
        self.meta.put(&key, &[u8::from(binary)])?;
        Ok(binary)
    }

    /// Append one commit at the branch tip under the write lock.
    ///
    /// `expected_tip` is the commit recorded when the edit began; the ref is
    /// compare-and-set against it and a moved tip fails the whole commit.
    pub async fn commit_revision(
        &self,
        branch: &Branch,
        expected_tip: ObjectId,
        commit: Commit,
    ) -> Result<u64> {
        debug_assert_eq!(commit.first_parent(), Some(expected_tip));
        let current = self.read_ref(branch)?;
        if current != Some(expected_tip) {
            return Err(SvnError::new(
                codes::FS_CONFLICT,
                "Branch tip moved during commit",
            ));
        }
        let commit_id = store::put_commit(self.store.as_ref(), &commit).await?;
        self.store.flush().await?;
        self.meta
            .put_durable(&branch.ref_key, commit_id.as_bytes())?;
        self.update_revisions(branch).await?;
        let state = branch.state.read().await;
        state
            .index
            .get(&commit_id)
            .copied()
            .ok_or_else(|| SvnError::new(codes::BASE, "commit not indexed after push"))
    }

    /// Acquire the per-branch write lock for the duration of a commit edit.
    ///
    /// The guard is owned so the editor can hold it across its whole
    /// edit-apply-flush cycle.
    pub async fn lock_branch_for_write(
        &self,
        branch: &Branch,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        branch.write_lock.clone().lock_owned().await
    }
}

/// Resolution of a client URL onto a repository and branch.
pub struct RepositoryInfo {
    pub repository: Arc<Repository>,
    pub branch: String,
    /// `svn://host/prefix` part the client used to reach the repository
    pub base_url: String,
}

/// Longest-prefix repository mapping.
///
/// `svn://host[:port]/<prefix>[/extra]` resolves against registered
/// prefixes; the remainder beyond the prefix selects a path inside the
/// branch root and stays with the session as its parent path.
#[derive(Default)]
pub struct RepositoryMapping {
    entries: BTreeMap<String, (Arc<Repository>, String)>,
}

impl RepositoryMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: &str, repository: Arc<Repository>, branch: &str) {
        self.entries
            .insert(paths::normalize(prefix), (repository, branch.to_string()));
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.entries.values().map(|(repo, _)| repo)
    }

    /// Resolve a client URL; returns the mapping and the in-repository path
    /// remainder.
    pub fn resolve(&self, url: &str) -> Option<(RepositoryInfo, String)> {
        let (scheme_host, path) = split_url(url)?;
        let path = paths::normalize(&path);
        let mut best: Option<(&str, &(Arc<Repository>, String))> = None;
        for (prefix, entry) in &self.entries {
            if paths::is_ancestor(prefix, &path)
                && best.map_or(true, |(b, _)| prefix.len() >= b.len())
            {
                best = Some((prefix, entry));
            }
        }
        let (prefix, (repository, branch)) = best?;
        let remainder = path
            .strip_prefix(prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or("");
        let base_url = if prefix.is_empty() {
            scheme_host
        } else {
            format!("{scheme_host}/{prefix}")
        };
        Some((
            RepositoryInfo {
                repository: repository.clone(),
                branch: branch.clone(),
                base_url,
            },
            remainder.to_string(),
        ))
    }
}

/// Split `svn://host[:port]/path` into base and path parts.
fn split_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("svn://")?;
    match rest.find('/') {
        Some(idx) => Some((
            format!("svn://{}", &rest[..idx]),
            rest[idx + 1..].to_string(),
        )),
        None => Some((format!("svn://{rest}"), String::new())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{MemoryMetaStore, MemoryStore};

    pub(crate) async fn test_repository(name: &str) -> Arc<Repository> {
        let store = Arc::new(MemoryStore::new());
        let meta = KeyValueStore::Memory(MemoryMetaStore::default());
        let repo = Arc::new(
            Repository::open(
                name,
                store,
                meta,
                HookManager::disabled(),
                AccessRules::allow_all(),
                &["master".to_string()],
                true,
            )
            .unwrap(),
        );
        repo.initialize().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_initialize_creates_revision_zero() {
        let repo = test_repository("test").await;
        let branch = repo.branch("master").unwrap();
        assert_eq!(repo.latest_revision(branch).await, 0);
        let view = repo.view(branch, 0).await.unwrap();
        let root = view.root().await.unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let repo = test_repository("test").await;
        repo.initialize().await.unwrap();
        let branch = repo.branch("master").unwrap();
        assert_eq!(repo.latest_revision(branch).await, 0);
    }

    #[tokio::test]
    async fn test_revision_mapping_is_stable() {
        let repo = test_repository("test").await;
        let branch = repo.branch("master").unwrap();
        let rev0 = repo.commit_id_at(branch, 0).await.unwrap();
        assert_eq!(repo.revision_of(branch, rev0).await, Some(0));
        assert!(repo.commit_id_at(branch, 1).await.is_err());
    }

    #[test]
    fn test_split_url() {
        let (base, path) = split_url("svn://example.com/projects/alpha").unwrap();
        assert_eq!(base, "svn://example.com");
        assert_eq!(path, "projects/alpha");
        assert!(split_url("http://example.com/x").is_none());
    }

    #[tokio::test]
    async fn test_mapping_resolution() {
        let repo_a = test_repository("a").await;
        let repo_b = test_repository("b").await;
        let mut mapping = RepositoryMapping::new();
        mapping.register("projects/a", repo_a.clone(), "master");
        mapping.register("projects", repo_b.clone(), "master");

        let (info, rest) = mapping.resolve("svn://host/projects/a/dir/file").unwrap();
        assert_eq!(info.repository.name(), "a");
        assert_eq!(info.base_url, "svn://host/projects/a");
        assert_eq!(rest, "dir/file");

        let (info, rest) = mapping.resolve("svn://host/projects/other").unwrap();
        assert_eq!(info.repository.name(), "b");
        assert_eq!(rest, "other");

        assert!(mapping.resolve("svn://host/elsewhere").is_none());
    }
}
