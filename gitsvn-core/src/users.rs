//! Users and authentication backends
//!
//! The session engine authenticates against a [`UserDb`]. Two backends:
//! the built-in map from configuration (plain or sha1-hashed passwords)
//! and Apache-style htpasswd files. Anonymous access is a distinguished
//! user, granted only when the repository allows anonymous reads.

use async_trait::async_trait;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{codes, Result, SvnError};

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub real_name: String,
    pub email: Option<String>,
    anonymous: bool,
}

impl User {
    pub fn new(username: impl Into<String>, real_name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            username: username.into(),
            real_name: real_name.into(),
            email,
            anonymous: false,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".to_string(),
            real_name: "anonymous".to_string(),
            email: None,
            anonymous: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}

/// User database seam
#[async_trait]
pub trait UserDb: Send + Sync {
    /// Verify credentials, returning the matching user.
    async fn authenticate(&self, username: &str, password: &str) -> Option<User>;
}

/// One configured account.
#[derive(Debug, Clone)]
pub struct UserEntry {
    /// `plain:` prefix or bare value for cleartext, `sha1:` for a hex digest
    pub password: String,
    pub real_name: String,
    pub email: Option<String>,
}

/// Configuration-backed user database.
#[derive(Default)]
pub struct LocalUserDb {
    users: HashMap<String, UserEntry>,
}

impl LocalUserDb {
    pub fn new(users: HashMap<String, UserEntry>) -> Self {
        Self { users }
    }

    fn verify(stored: &str, password: &str) -> bool {
        if let Some(hex) = stored.strip_prefix("sha1:") {
            let mut hasher = Sha1::new();
            hasher.update(password.as_bytes());
            return hex::encode(hasher.finalize()) == hex.to_lowercase();
        }
        let stored = stored.strip_prefix("plain:").unwrap_or(stored);
        stored == password
    }
}

#[async_trait]
impl UserDb for LocalUserDb {
    async fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        let entry = self.users.get(username)?;
        if Self::verify(&entry.password, password) {
            Some(User::new(
                username,
                entry.real_name.clone(),
                entry.email.clone(),
            ))
        } else {
            None
        }
    }
}

/// Htpasswd-file user database
///
/// Apache-style `username:hash` lines; supported hash forms are `{SHA}`
/// (base64 of the sha1 digest) and plaintext. Other schemes fail
/// verification rather than the whole file.
pub struct HtpasswdUserDb {
    users: HashMap<String, String>,
}

impl HtpasswdUserDb {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SvnError::new(
                codes::BASE,
                format!("Failed to read htpasswd file {}: {e}", path.display()),
            )
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut users = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((username, hash)) = line.split_once(':') else {
                return Err(SvnError::new(
                    codes::BASE,
                    format!("Invalid htpasswd line: {line}"),
                ));
            };
            let username = username.trim();
            let hash = hash.trim();
            if username.is_empty() || hash.is_empty() {
                return Err(SvnError::new(
                    codes::BASE,
                    format!("Invalid htpasswd line (empty username or hash): {line}"),
                ));
            }
            users.insert(username.to_string(), hash.to_string());
        }
        if users.is_empty() {
            return Err(SvnError::new(
                codes::BASE,
                "No valid users found in htpasswd file",
            ));
        }
        Ok(Self { users })
    }

    fn verify(hash: &str, password: &str) -> bool {
        if let Some(expected) = hash.strip_prefix("{SHA}") {
            let mut hasher = Sha1::new();
            hasher.update(password.as_bytes());
            let computed =
                base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
            return computed == expected;
        }
        if hash.starts_with('$') {
            // bcrypt and crypt schemes are not supported.
            tracing::warn!("unsupported htpasswd hash scheme: {}", &hash[..3.min(hash.len())]);
            return false;
        }
        hash == password
    }
}

#[async_trait]
impl UserDb for HtpasswdUserDb {
    async fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        if username.is_empty() || password.is_empty() {
            return None;
        }
        let hash = self.users.get(username)?;
        if Self::verify(hash, password) {
            Some(User::new(username, username, None))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> LocalUserDb {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            UserEntry {
                password: "plain:secret".to_string(),
                real_name: "Alice".to_string(),
                email: Some("alice@example.com".to_string()),
            },
        );
        users.insert(
            "bob".to_string(),
            UserEntry {
                // sha1("hunter2")
                password: "sha1:f3bbbd66a63d4bf1747940578ec3d0103530e21d".to_string(),
                real_name: "Bob".to_string(),
                email: None,
            },
        );
        LocalUserDb::new(users)
    }

    #[tokio::test]
    async fn test_plain_password() {
        let db = db();
        let user = db.authenticate("alice", "secret").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.is_anonymous());
        assert!(db.authenticate("alice", "wrong").await.is_none());
    }

    #[tokio::test]
    async fn test_sha1_password() {
        let db = db();
        assert!(db.authenticate("bob", "hunter2").await.is_some());
        assert!(db.authenticate("bob", "hunter3").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        assert!(db().authenticate("mallory", "x").await.is_none());
    }

    #[test]
    fn test_anonymous_is_flagged() {
        assert!(User::anonymous().is_anonymous());
    }

    #[test]
    fn test_parse_htpasswd() {
        let db = HtpasswdUserDb::parse(
            "# comment\nadmin:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\nguest:letmein\n",
        )
        .unwrap();
        assert!(db.users.contains_key("admin"));
        assert!(db.users.contains_key("guest"));
    }

    #[test]
    fn test_parse_htpasswd_rejects_bad_input() {
        assert!(HtpasswdUserDb::parse("\n# only comments\n").is_err());
        assert!(HtpasswdUserDb::parse("no-colon-here\n").is_err());
        assert!(HtpasswdUserDb::parse(":empty-user\n").is_err());
    }

    #[tokio::test]
    async fn test_htpasswd_sha_password() {
        // {SHA} value for "password"
        let db = HtpasswdUserDb::parse("admin:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n").unwrap();
        assert!(db.authenticate("admin", "password").await.is_some());
        assert!(db.authenticate("admin", "wrong").await.is_none());
    }

    #[tokio::test]
    async fn test_htpasswd_plaintext_password() {
        let db = HtpasswdUserDb::parse("guest:letmein\n").unwrap();
        let user = db.authenticate("guest", "letmein").await.unwrap();
        assert_eq!(user.username, "guest");
        assert!(db.authenticate("guest", "other").await.is_none());
        assert!(db.authenticate("", "letmein").await.is_none());
    }

    #[tokio::test]
    async fn test_htpasswd_unsupported_scheme_fails_closed() {
        let db = HtpasswdUserDb::parse("admin:$2y$05$abcdefghijk\n").unwrap();
        assert!(db.authenticate("admin", "anything").await.is_none());
    }

    #[test]
    fn test_htpasswd_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("htpasswd");
        std::fs::write(&path, "alice:secret\n").unwrap();
        assert!(HtpasswdUserDb::from_file(&path).is_ok());
        assert!(HtpasswdUserDb::from_file(&dir.path().join("missing")).is_err());
    }
}
