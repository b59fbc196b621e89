//! gitsvn core library
//!
//! Core functionality for the gitsvn server:
//! - Object model (Blob, Tree, Commit) over a content-addressed store
//! - Branch engine mapping linear revision numbers onto a commit chain
//! - Revision views with path lookup and property resolution
//! - Path history, rename detection and the lock registry
//! - Persistent metadata in a Fjall LSM keyspace

pub mod access;
pub mod error;
pub mod filter;
pub mod history;
pub mod hooks;
pub mod locks;
pub mod object;
pub mod paths;
pub mod props;
pub mod repository;
pub mod revision;
pub mod store;
pub mod testutil;
pub mod users;

pub use access::AccessRules;
pub use error::{codes, Result, SvnError};
pub use hooks::HookManager;
pub use locks::{LockDesc, LockRegistry, LockTarget};
pub use object::{Commit, FileMode, ObjectId, ObjectKind, Tree, TreeEntry};
pub use repository::{Branch, CopyFrom, Repository, RepositoryInfo, RepositoryMapping};
pub use revision::{FileEntry, LastChange, NodeKind, RevisionView};
pub use store::{FjallStore, KeyValueStore, MemoryStore, ObjectStore, StorageError};
pub use users::{HtpasswdUserDb, LocalUserDb, User, UserDb, UserEntry};

/// Format a Unix timestamp the way revision dates travel on the wire.
pub fn format_svn_date(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => "1970-01-01T00:00:00.000000Z".to_string(),
    }
}

/// Parse a wire date back into a Unix timestamp.
pub fn parse_svn_date(date: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(date)
        .ok()
        .map(|dt| dt.timestamp())
}
