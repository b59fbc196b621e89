//! Server configuration
//!
//! Loaded from a TOML file; every section has a workable default so a bare
//! `[repositories.<name>]` entry is enough to serve a repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3690
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_true() -> bool {
    true
}

fn default_auth_timeout() -> u64 {
    30
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Authentication realm; empty means the repository UUID is announced
    #[serde(default)]
    pub realm: String,

    #[serde(default = "default_true")]
    pub reuse_address: bool,

    /// Advertise svndiff1 and send compressed delta windows
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Idle timeout on command reads, seconds; zero disables
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Timeout for the authentication phase, seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Grant anonymous users read access
    #[serde(default)]
    pub anonymous_read: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepoConfig>,

    /// Built-in accounts; ignored when `users_file` is set
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,

    /// Apache-style htpasswd file used instead of the builtin map
    #[serde(default)]
    pub users_file: Option<PathBuf>,

    /// Run hook scripts found in each repository's hooks directory
    #[serde(default)]
    pub hooks_enabled: bool,

    /// Extra environment passed through to hook subprocesses
    #[serde(default)]
    pub hook_env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            realm: String::new(),
            reuse_address: true,
            compression: true,
            idle_timeout_secs: 0,
            auth_timeout_secs: default_auth_timeout(),
            anonymous_read: false,
            cache: CacheConfig::default(),
            repositories: BTreeMap::new(),
            users: BTreeMap::new(),
            users_file: None,
            hooks_enabled: false,
            hook_env: BTreeMap::new(),
        }
    }
}

/// Metadata/object cache placement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the on-disk keyspace; absent means in-memory only
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One served repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Store directory; absent means in-memory (testing)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// URL prefix under which the repository is reachable; defaults to the
    /// repository name
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_true")]
    pub rename_detection: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: None,
            prefix: None,
            branch: default_branch(),
            rename_detection: true,
        }
    }
}

/// One configured account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// `plain:<pw>`, bare cleartext, or `sha1:<hex>`
    pub password: String,

    #[serde(default)]
    pub real_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Example configuration written by `init-config`.
    pub fn example() -> Self {
        let mut config = Config {
            anonymous_read: true,
            ..Config::default()
        };
        config.repositories.insert(
            "repo".to_string(),
            RepoConfig {
                path: Some(PathBuf::from("./data/repo")),
                ..RepoConfig::default()
            },
        );
        config.users.insert(
            "admin".to_string(),
            UserConfig {
                password: "plain:change-me".to_string(),
                real_name: Some("Administrator".to_string()),
                email: None,
            },
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let config: Config = toml::from_str(
            r#"
            port = 3790

            [repositories.alpha]
            branch = "main"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 3790);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.compression);
        let repo = &config.repositories["alpha"];
        assert_eq!(repo.branch, "main");
        assert!(repo.rename_detection);
        assert!(repo.path.is_none());
    }

    #[test]
    fn test_users_file_config() {
        let config: Config = toml::from_str(
            r#"
            users_file = "/etc/gitsvn/htpasswd"

            [repositories.repo]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.users_file,
            Some(PathBuf::from("/etc/gitsvn/htpasswd"))
        );
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_example_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitsvn.toml");
        Config::example().to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert!(loaded.repositories.contains_key("repo"));
        assert!(loaded.users.contains_key("admin"));
    }
}
