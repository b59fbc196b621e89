//! Repository hook support
//!
//! Hooks are opaque executables living under `<hooks-dir>/`:
//! - pre-commit: runs before a commit is published (can reject)
//! - post-commit: runs after a commit is published (notification)
//!
//! Scripts receive data on stdin and must exit 0 to succeed. A pre-hook's
//! non-zero exit rejects the operation and its output becomes the error
//! message, surfaced with the hook-failure protocol code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{codes, Result, SvnError};

/// Manages hook scripts for a repository.
pub struct HookManager {
    hooks_dir: Option<PathBuf>,
    /// Extra environment passed through to hook processes
    env: HashMap<String, String>,
}

impl HookManager {
    /// Hooks are expected in `<repo_root>/hooks/`.
    pub fn new(repo_path: PathBuf, env: HashMap<String, String>) -> Self {
        Self {
            hooks_dir: Some(repo_path.join("hooks")),
            env,
        }
    }

    /// A manager that runs nothing; used when hook execution is disabled.
    pub fn disabled() -> Self {
        Self {
            hooks_dir: None,
            env: HashMap::new(),
        }
    }

    fn hook_path(&self, name: &str) -> Option<PathBuf> {
        let dir = self.hooks_dir.as_ref()?;
        let path = dir.join(name);
        path.exists().then_some(path)
    }

    /// Execute a hook, piping `stdin_data` to it. Missing hooks allow.
    async fn run_hook(&self, name: &str, stdin_data: &str) -> Result<()> {
        let Some(hook_path) = self.hook_path(name) else {
            return Ok(());
        };
        let repo_root = hook_path
            .parent()
            .and_then(Path::parent)
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let mut child = Command::new(&hook_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GITSVN_REPO", repo_root)
            .envs(&self.env)
            .spawn()
            .map_err(|e| {
                SvnError::new(
                    codes::REPOS_HOOK_FAILURE,
                    format!("Failed to execute hook '{name}': {e}"),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(stdin_data.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            SvnError::new(
                codes::REPOS_HOOK_FAILURE,
                format!("Failed to wait for hook '{name}': {e}"),
            )
        })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!(
                "Hook '{name}' exited with code {}",
                output.status.code().unwrap_or(-1)
            )
        };
        Err(SvnError::new(
            codes::REPOS_HOOK_FAILURE,
            format!("Hook '{name}' rejected the operation: {msg}"),
        ))
    }

    /// Run the pre-commit hook. `files` carries `(action, path)` pairs.
    pub async fn run_pre_commit(
        &self,
        author: &str,
        log: &str,
        files: &[(char, String)],
    ) -> Result<()> {
        let mut data = String::new();
        data.push_str(&format!("AUTHOR: {author}\n"));
        data.push_str(&format!("LOG: {log}\n"));
        data.push_str("FILES:\n");
        for (action, path) in files {
            data.push_str(&format!("{action} {path}\n"));
        }
        self.run_hook("pre-commit", &data).await
    }

    /// Run the post-commit hook; failures are logged, never surfaced as a
    /// commit error, since the commit is already published.
    pub async fn run_post_commit(&self, rev: u64, author: &str, log: &str) -> Option<String> {
        let mut data = String::new();
        data.push_str(&format!("REVISION: {rev}\n"));
        data.push_str(&format!("AUTHOR: {author}\n"));
        data.push_str(&format!("LOG: {log}\n"));
        match self.run_hook("post-commit", &data).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("post-commit hook error (ignored): {e}");
                Some(e.message)
            }
        }
    }
}
