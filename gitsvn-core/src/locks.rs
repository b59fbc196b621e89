//! Path lock registry
//!
//! Grants exclusive write intents on paths across sessions. The table is an
//! in-memory sorted map guarded by a read-write mutex; every mutation is
//! made durable in the metadata store before the call returns, so locks
//! survive server restarts. Keys are schema-versioned.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{codes, Result, SvnError};
use crate::store::KeyValueStore;
use crate::users::User;

const LOCK_SCHEMA_VERSION: u32 = 2;

/// A granted path lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDesc {
    pub path: String,
    pub token: String,
    pub owner: String,
    pub comment: Option<String>,
    /// Unix seconds
    pub created: i64,
    pub branch: String,
}

impl LockDesc {
    pub fn created_string(&self) -> String {
        crate::format_svn_date(self.created)
    }
}

/// One lock request target.
#[derive(Debug, Clone)]
pub struct LockTarget {
    pub path: String,
    /// Client's belief about the path's revision, checked against history
    pub current_rev: Option<u64>,
}

/// Persistent per-repository lock table.
pub struct LockRegistry {
    table: parking_lot::RwLock<BTreeMap<String, LockDesc>>,
    meta: KeyValueStore,
    storage_key: String,
}

impl LockRegistry {
    /// Load the table for `repo_name` from the metadata store.
    pub fn open(meta: KeyValueStore, repo_name: &str) -> Result<Self> {
        let storage_key = format!("locks.{repo_name}.{LOCK_SCHEMA_VERSION}");
        let table = match meta.get(&storage_key)? {
            Some(data) => bincode::deserialize(&data).map_err(|e| {
                SvnError::new(codes::BASE, format!("corrupt lock table: {e}"))
            })?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            table: parking_lot::RwLock::new(table),
            meta,
            storage_key,
        })
    }

    fn persist(&self, table: &BTreeMap<String, LockDesc>) -> Result<()> {
        let data = bincode::serialize(table)
            .map_err(|e| SvnError::new(codes::BASE, format!("serialize lock table: {e}")))?;
        self.meta.put_durable(&self.storage_key, &data)?;
        Ok(())
    }

    fn new_token() -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        format!("opaquelocktoken:{}", hex::encode(bytes))
    }

    /// Lock every target or none.
    ///
    /// `last_change` supplies the newest revision at which each path changed
    /// so stale `current_rev` claims are rejected before any state mutates.
    pub fn lock(
        &self,
        user: &User,
        branch: &str,
        comment: Option<&str>,
        steal: bool,
        targets: &[LockTarget],
        last_change: impl Fn(&str) -> Result<Option<u64>>,
    ) -> Result<Vec<LockDesc>> {
        if user.is_anonymous() {
            return Err(SvnError::new(
                codes::FS_NO_USER,
                "Anonymous users cannot lock paths",
            ));
        }
        let mut table = self.table.write();

        // Validate the whole target list before touching the table.
        for target in targets {
            let changed = last_change(&target.path)?.ok_or_else(|| {
                SvnError::new(
                    codes::FS_NOT_FOUND,
                    format!("File not found: {}", target.path),
                )
            })?;
            if let Some(current_rev) = target.current_rev {
                if current_rev < changed {
                    return Err(SvnError::new(
                        codes::FS_OUT_OF_DATE,
                        format!("Path '{}' is out of date (r{changed})", target.path),
                    ));
                }
            }
            if let Some(existing) = table.get(&target.path) {
                if !steal {
                    return Err(SvnError::new(
                        codes::FS_PATH_ALREADY_LOCKED,
                        format!(
                            "Path '{}' is already locked by {}",
                            target.path, existing.owner
                        ),
                    ));
                }
            }
        }

        let created = chrono::Utc::now().timestamp();
        let mut granted = Vec::with_capacity(targets.len());
        for target in targets {
            let desc = LockDesc {
                path: target.path.clone(),
                token: Self::new_token(),
                owner: user.username.clone(),
                comment: comment.map(str::to_string),
                created,
                branch: branch.to_string(),
            };
            table.insert(target.path.clone(), desc.clone());
            granted.push(desc);
        }
        self.persist(&table)?;
        Ok(granted)
    }

    /// Release every target or none.
    pub fn unlock(
        &self,
        user: &User,
        break_lock: bool,
        targets: &[(String, Option<String>)],
    ) -> Result<()> {
        let mut table = self.table.write();
        for (path, token) in targets {
            let existing = table.get(path).ok_or_else(|| {
                SvnError::new(codes::FS_NO_SUCH_LOCK, format!("No lock on path '{path}'"))
            })?;
            if !break_lock {
                match token {
                    Some(token) if *token == existing.token => {}
                    Some(_) => {
                        return Err(SvnError::new(
                            codes::FS_BAD_LOCK_TOKEN,
                            format!("Bad lock token for path '{path}'"),
                        ))
                    }
                    None => {
                        return Err(SvnError::new(
                            codes::FS_BAD_LOCK_TOKEN,
                            format!("No lock token given for path '{path}'"),
                        ))
                    }
                }
                if existing.owner != user.username {
                    return Err(SvnError::new(
                        codes::FS_LOCK_OWNER_MISMATCH,
                        format!("Lock on '{path}' is owned by {}", existing.owner),
                    ));
                }
            }
        }
        for (path, _) in targets {
            table.remove(path);
        }
        self.persist(&table)?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<LockDesc> {
        self.table.read().get(path).cloned()
    }

    /// All locks at or below a path prefix.
    pub fn list(&self, prefix: &str) -> Vec<LockDesc> {
        self.table
            .read()
            .values()
            .filter(|desc| crate::paths::is_ancestor(prefix, &desc.path))
            .cloned()
            .collect()
    }

    /// Commit-time enforcement: each modified path must be unlocked, or its
    /// active lock must belong to the committer and be present in `tokens`.
    pub fn check_write(
        &self,
        user: &User,
        path: &str,
        tokens: &BTreeMap<String, String>,
    ) -> Result<()> {
        let table = self.table.read();
        let Some(existing) = table.get(path) else {
            return Ok(());
        };
        if user.is_anonymous() {
            return Err(SvnError::new(
                codes::FS_NO_USER,
                format!("Path '{path}' is locked and no user is given"),
            ));
        }
        if existing.owner != user.username {
            return Err(SvnError::new(
                codes::FS_LOCK_OWNER_MISMATCH,
                format!("Path '{path}' is locked by {}", existing.owner),
            ));
        }
        match tokens.get(path) {
            Some(token) if *token == existing.token => Ok(()),
            _ => Err(SvnError::new(
                codes::FS_BAD_LOCK_TOKEN,
                format!("Lock token for '{path}' not supplied"),
            )),
        }
    }

    /// Drop locks held by `user` on the given paths (post-commit,
    /// `keep_locks = false`).
    pub fn release_after_commit(&self, user: &User, paths: &[String]) -> Result<()> {
        let mut table = self.table.write();
        let mut changed = false;
        for path in paths {
            if table
                .get(path)
                .map(|desc| desc.owner == user.username)
                .unwrap_or(false)
            {
                table.remove(path);
                changed = true;
            }
        }
        if changed {
            self.persist(&table)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMetaStore, KeyValueStore};

    fn registry() -> LockRegistry {
        LockRegistry::open(KeyValueStore::Memory(MemoryMetaStore::default()), "test").unwrap()
    }

    fn target(path: &str) -> LockTarget {
        LockTarget {
            path: path.to_string(),
            current_rev: None,
        }
    }

    fn alice() -> User {
        User::new("alice", "Alice", None)
    }

    fn bob() -> User {
        User::new("bob", "Bob", None)
    }

    fn any_change(_: &str) -> Result<Option<u64>> {
        Ok(Some(1))
    }

    #[test]
    fn test_lock_and_get() {
        let reg = registry();
        let locks = reg
            .lock(&alice(), "master", Some("work"), false, &[target("a")], any_change)
            .unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks[0].token.starts_with("opaquelocktoken:"));
        assert_eq!(reg.get("a").unwrap().owner, "alice");
    }

    #[test]
    fn test_second_lock_fails_without_steal() {
        let reg = registry();
        reg.lock(&alice(), "master", None, false, &[target("a")], any_change)
            .unwrap();
        let err = reg
            .lock(&bob(), "master", None, false, &[target("a")], any_change)
            .unwrap_err();
        assert_eq!(err.code, codes::FS_PATH_ALREADY_LOCKED);
    }

    #[test]
    fn test_steal_replaces_and_invalidates_token() {
        let reg = registry();
        let old = reg
            .lock(&alice(), "master", None, false, &[target("a")], any_change)
            .unwrap();
        let new = reg
            .lock(&bob(), "master", None, true, &[target("a")], any_change)
            .unwrap();
        assert_ne!(old[0].token, new[0].token);
        let err = reg
            .unlock(&alice(), false, &[("a".to_string(), Some(old[0].token.clone()))])
            .unwrap_err();
        assert_eq!(err.code, codes::FS_BAD_LOCK_TOKEN);
    }

    #[test]
    fn test_multi_target_lock_is_atomic() {
        let reg = registry();
        reg.lock(&bob(), "master", None, false, &[target("b")], any_change)
            .unwrap();
        let err = reg
            .lock(
                &alice(),
                "master",
                None,
                false,
                &[target("a"), target("b")],
                any_change,
            )
            .unwrap_err();
        assert_eq!(err.code, codes::FS_PATH_ALREADY_LOCKED);
        assert!(reg.get("a").is_none(), "no partial state after failure");
    }

    #[test]
    fn test_unlock_requires_token_unless_break() {
        let reg = registry();
        let locks = reg
            .lock(&alice(), "master", None, false, &[target("a")], any_change)
            .unwrap();
        assert!(reg
            .unlock(&alice(), false, &[("a".to_string(), None)])
            .is_err());
        reg.unlock(&bob(), true, &[("a".to_string(), None)]).unwrap();
        assert!(reg.get("a").is_none());
        let _ = locks;
    }

    #[test]
    fn test_out_of_date_rejected() {
        let reg = registry();
        let err = reg
            .lock(
                &alice(),
                "master",
                None,
                false,
                &[LockTarget {
                    path: "a".to_string(),
                    current_rev: Some(1),
                }],
                |_| Ok(Some(5)),
            )
            .unwrap_err();
        assert_eq!(err.code, codes::FS_OUT_OF_DATE);
    }

    #[test]
    fn test_check_write() {
        let reg = registry();
        let locks = reg
            .lock(&alice(), "master", None, false, &[target("a")], any_change)
            .unwrap();
        let mut tokens = BTreeMap::new();

        let err = reg.check_write(&alice(), "a", &tokens).unwrap_err();
        assert_eq!(err.code, codes::FS_BAD_LOCK_TOKEN);

        let err = reg.check_write(&bob(), "a", &tokens).unwrap_err();
        assert_eq!(err.code, codes::FS_LOCK_OWNER_MISMATCH);

        tokens.insert("a".to_string(), locks[0].token.clone());
        reg.check_write(&alice(), "a", &tokens).unwrap();
        reg.check_write(&alice(), "unlocked", &tokens).unwrap();
    }

    #[test]
    fn test_persistence_across_reopen() {
        let meta = KeyValueStore::Memory(MemoryMetaStore::default());
        {
            let reg = LockRegistry::open(meta.clone(), "repo").unwrap();
            reg.lock(&alice(), "master", None, false, &[target("a")], any_change)
                .unwrap();
        }
        let reg = LockRegistry::open(meta, "repo").unwrap();
        assert_eq!(reg.get("a").unwrap().owner, "alice");
    }

    #[test]
    fn test_list_by_prefix() {
        let reg = registry();
        reg.lock(
            &alice(),
            "master",
            None,
            false,
            &[target("dir/a"), target("dir/b"), target("other")],
            any_change,
        )
        .unwrap();
        assert_eq!(reg.list("dir").len(), 2);
        assert_eq!(reg.list("").len(), 3);
    }
}
