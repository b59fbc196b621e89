//! Revision views and path entries
//!
//! A revision view is a lazily materialised snapshot of one branch revision.
//! Lookups walk tree objects from the commit root, accumulating the property
//! sources of every ancestor directory so the resolved entry can answer
//! property queries the way clients expect.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{codes, Result, SvnError};
use crate::filter::{self, ContentFilter};
use crate::history;
use crate::object::{Commit, FileMode, ObjectId, TreeEntry};
use crate::props::{self, names, PropSource};
use crate::repository::{Branch, CopyFrom, Repository};
use crate::paths;

/// Node kind as spoken on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    None,
    File,
    Dir,
}

impl NodeKind {
    pub fn word(&self) -> &'static str {
        match self {
            NodeKind::None => "none",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }
}

/// Last modification of an entry.
#[derive(Debug, Clone)]
pub struct LastChange {
    pub revision: u64,
    pub author: String,
    pub date: String,
}

/// One branch revision, materialised on demand.
pub struct RevisionView<'a> {
    repo: &'a Repository,
    branch: &'a Branch,
    rev: u64,
    commit_id: ObjectId,
    commit: Commit,
}

impl<'a> RevisionView<'a> {
    pub(crate) fn new(
        repo: &'a Repository,
        branch: &'a Branch,
        rev: u64,
        commit_id: ObjectId,
        commit: Commit,
    ) -> Self {
        Self {
            repo,
            branch,
            rev,
            commit_id,
            commit,
        }
    }

    pub fn revision(&self) -> u64 {
        self.rev
    }

    pub fn commit(&self) -> &Commit {
        &self.commit
    }

    pub fn commit_id(&self) -> ObjectId {
        self.commit_id
    }

    /// Revision properties as reported by `rev-proplist`.
    pub fn properties(&self) -> Vec<(String, String)> {
        vec![
            ("svn:author".to_string(), self.commit.author.clone()),
            ("svn:date".to_string(), self.commit.date_string()),
            ("svn:log".to_string(), self.commit.message.clone()),
            ("git-commit".to_string(), self.commit_id.to_hex()),
        ]
    }

    /// The root directory entry.
    pub async fn root(&self) -> Result<FileEntry<'a>> {
        Ok(FileEntry {
            repo: self.repo,
            branch: self.branch,
            rev: self.rev,
            path: String::new(),
            entry: TreeEntry::new("", FileMode::Dir, self.commit.tree),
            prop_chain: Vec::new(),
        })
    }

    /// Look up a path; `None` when absent at this revision.
    pub async fn file(&self, path: &str) -> Result<Option<FileEntry<'a>>> {
        let path = paths::normalize(path);
        if path.is_empty() {
            return Ok(Some(self.root().await?));
        }
        let mut chain = Vec::new();
        let mut current = TreeEntry::new("", FileMode::Dir, self.commit.tree);
        let mut walked = String::new();
        for segment in path.split('/') {
            if current.mode == FileMode::Link {
                return Err(SvnError::forbidden(&walked));
            }
            if !current.mode.is_dir() {
                return Ok(None);
            }
            chain.push(self.repo.dir_prop_sources(current.id).await?);
            let tree = self.repo.tree(current.id).await?;
            match tree.get(segment) {
                Some(entry) => {
                    walked = paths::join(&walked, segment);
                    current = entry.clone();
                }
                None => return Ok(None),
            }
        }
        Ok(Some(FileEntry {
            repo: self.repo,
            branch: self.branch,
            rev: self.rev,
            path,
            entry: current,
            prop_chain: chain,
        }))
    }

    /// Copy-from record for a path that first appeared at this revision.
    pub async fn copy_from(&self, path: &str) -> Result<Option<CopyFrom>> {
        history::copy_from(self.repo, self.branch, path, self.rev).await
    }
}

/// A resolved directory entry within one revision.
pub struct FileEntry<'a> {
    repo: &'a Repository,
    branch: &'a Branch,
    rev: u64,
    path: String,
    entry: TreeEntry,
    /// Property sources of ancestor directories, root first
    prop_chain: Vec<Arc<Vec<PropSource>>>,
}

impl<'a> FileEntry<'a> {
    pub fn file_name(&self) -> &str {
        &self.entry.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.entry.mode
    }

    pub fn object_id(&self) -> ObjectId {
        self.entry.id
    }

    pub fn revision(&self) -> u64 {
        self.rev
    }

    pub fn is_dir(&self) -> bool {
        self.entry.mode.is_dir()
    }

    pub fn kind(&self) -> NodeKind {
        if self.is_dir() {
            NodeKind::Dir
        } else {
            NodeKind::File
        }
    }

    fn filter(&self) -> &'static dyn ContentFilter {
        filter::for_mode(self.entry.mode)
    }

    /// Identity of the client-visible content; equal hashes mean no text
    /// delta is needed.
    pub fn content_hash(&self) -> String {
        format!("{} {}", self.filter().name(), self.entry.id)
    }

    /// Client-visible content, transformed by the entry's filter.
    pub async fn content(&self) -> Result<Bytes> {
        match self.entry.mode {
            FileMode::Dir => Err(SvnError::new(
                codes::FS_NOT_FILE,
                format!("Path is not a file: /{}", self.path),
            )),
            FileMode::Link => Err(SvnError::forbidden(&self.path)),
            _ => {
                let raw = self.repo.store().get(self.entry.id).await?;
                Ok(self.filter().read(raw))
            }
        }
    }

    async fn content_info(&self) -> Result<(u64, String)> {
        self.repo
            .content_info(self.filter().name(), self.entry.id, self.content())
            .await
    }

    /// Client-visible size; directories report zero.
    pub async fn size(&self) -> Result<u64> {
        if self.is_dir() {
            return Ok(0);
        }
        Ok(self.content_info().await?.0)
    }

    pub async fn md5(&self) -> Result<String> {
        Ok(self.content_info().await?.1)
    }

    /// Child entries of a directory, property chains extended.
    pub async fn entries(&self) -> Result<Vec<FileEntry<'a>>> {
        if self.entry.mode == FileMode::Link {
            return Err(SvnError::forbidden(&self.path));
        }
        if !self.is_dir() {
            return Err(SvnError::new(
                codes::FS_NOT_DIRECTORY,
                format!("Path is not a directory: /{}", self.path),
            ));
        }
        let mut chain = self.prop_chain.clone();
        chain.push(self.repo.dir_prop_sources(self.entry.id).await?);
        let tree = self.repo.tree(self.entry.id).await?;
        Ok(tree
            .iter()
            .map(|entry| FileEntry {
                repo: self.repo,
                branch: self.branch,
                rev: self.rev,
                path: paths::join(&self.path, &entry.name),
                entry: entry.clone(),
                prop_chain: chain.clone(),
            })
            .collect())
    }

    /// Versioned properties.
    pub async fn properties(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        if self.is_dir() {
            let sources = self.repo.dir_prop_sources(self.entry.id).await?;
            out.extend(props::dir_props_from_sources(&sources));
        } else {
            out.extend(props::file_props_from_chain(
                &self.prop_chain,
                &self.entry.name,
            ));
            match self.entry.mode {
                FileMode::Executable => out.push((
                    names::EXECUTABLE.to_string(),
                    names::FLAG_VALUE.to_string(),
                )),
                FileMode::Symlink => {
                    out.push((names::SPECIAL.to_string(), names::FLAG_VALUE.to_string()))
                }
                _ => {
                    // Unattributed binary content still needs a mime type so
                    // clients stop treating it as text.
                    if !out.iter().any(|(name, _)| name == names::MIME_TYPE)
                        && self
                            .repo
                            .is_binary(self.filter().name(), self.entry.id, self.content())
                            .await?
                    {
                        out.push((
                            names::MIME_TYPE.to_string(),
                            "application/octet-stream".to_string(),
                        ));
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Last modification at or before this entry's revision.
    pub async fn last_change(&self) -> Result<LastChange> {
        let revision = history::last_change(self.repo, self.branch, &self.path, self.rev)
            .await?
            .ok_or_else(|| SvnError::not_found(&self.path))?;
        let id = self.repo.commit_id_at(self.branch, revision).await?;
        let commit = crate::store::load_commit(self.repo.store(), id).await?;
        Ok(LastChange {
            revision,
            author: commit.author.clone(),
            date: commit.date_string(),
        })
    }

    /// Entry pseudo-properties sent with report entries.
    pub async fn rev_properties(&self) -> Result<Vec<(String, String)>> {
        let change = self.last_change().await?;
        Ok(vec![
            (
                names::ENTRY_COMMITTED_REV.to_string(),
                change.revision.to_string(),
            ),
            (names::ENTRY_COMMITTED_DATE.to_string(), change.date),
            (names::ENTRY_LAST_AUTHOR.to_string(), change.author),
            (
                names::ENTRY_UUID.to_string(),
                self.repo.uuid().to_string(),
            ),
        ])
    }
}

impl SvnError {
    /// Entry exists but may not be revealed to this session.
    pub fn forbidden(path: &str) -> Self {
        Self::new(
            codes::RA_NOT_AUTHORIZED,
            format!("Entry is not accessible: /{path}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::test_repository;
    use crate::testutil;

    #[tokio::test]
    async fn test_root_of_empty_revision() {
        let repo = test_repository("test").await;
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 0).await.unwrap();
        let root = view.root().await.unwrap();
        assert_eq!(root.kind(), NodeKind::Dir);
        assert!(root.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_and_content() {
        let repo = test_repository("test").await;
        let rev = testutil::commit_files(
            &repo,
            "master",
            "add files",
            &[("README", "hello\n"), ("src/lib.rs", "pub fn f() {}\n")],
        )
        .await;
        assert_eq!(rev, 1);
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 1).await.unwrap();

        let readme = view.file("README").await.unwrap().unwrap();
        assert_eq!(readme.kind(), NodeKind::File);
        assert_eq!(readme.content().await.unwrap(), Bytes::from("hello\n"));
        assert_eq!(readme.md5().await.unwrap(), "b1946ac92492d2347c6235b4d2611184");
        assert_eq!(readme.size().await.unwrap(), 6);

        let dir = view.file("src").await.unwrap().unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.entries().await.unwrap().len(), 1);

        assert!(view.file("missing").await.unwrap().is_none());
        assert!(view.file("README/sub").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_properties_from_dotfiles() {
        let repo = test_repository("test").await;
        testutil::commit_files(
            &repo,
            "master",
            "props",
            &[
                (".gitignore", "*.o\n"),
                (".gitattributes", "*.txt eol=lf\n"),
                ("note.txt", "x\n"),
            ],
        )
        .await;
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 1).await.unwrap();

        let root = view.root().await.unwrap();
        let props = root.properties().await.unwrap();
        assert!(props.iter().any(|(n, v)| n == names::IGNORE && v == "*.o\n"));

        let note = view.file("note.txt").await.unwrap().unwrap();
        let props = note.properties().await.unwrap();
        assert!(props.iter().any(|(n, v)| n == names::EOL_STYLE && v == "LF"));
    }

    #[tokio::test]
    async fn test_last_change_tracks_modification() {
        let repo = test_repository("test").await;
        testutil::commit_files(&repo, "master", "one", &[("a", "1"), ("b", "1")]).await;
        testutil::commit_files(&repo, "master", "two", &[("a", "2")]).await;
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 2).await.unwrap();

        let a = view.file("a").await.unwrap().unwrap();
        assert_eq!(a.last_change().await.unwrap().revision, 2);
        let b = view.file("b").await.unwrap().unwrap();
        assert_eq!(b.last_change().await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_binary_content_gets_mime_type() {
        let repo = test_repository("test").await;
        testutil::commit_entries(
            &repo,
            "master",
            "mixed",
            &[
                ("image.bin", FileMode::File, b"\x89PNG\0\0data".as_slice()),
                ("plain.txt", FileMode::File, b"just text\n".as_slice()),
            ],
        )
        .await;
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 1).await.unwrap();

        let binary = view.file("image.bin").await.unwrap().unwrap();
        let props = binary.properties().await.unwrap();
        assert!(props
            .iter()
            .any(|(n, v)| n == names::MIME_TYPE && v == "application/octet-stream"));

        let plain = view.file("plain.txt").await.unwrap().unwrap();
        let props = plain.properties().await.unwrap();
        assert!(!props.iter().any(|(n, _)| n == names::MIME_TYPE));
    }

    #[tokio::test]
    async fn test_symlink_content_is_special_form() {
        let repo = test_repository("test").await;
        testutil::commit_entries(
            &repo,
            "master",
            "link",
            &[("ln", FileMode::Symlink, b"target".as_slice())],
        )
        .await;
        let branch = repo.branch("master").unwrap();
        let view = repo.view(branch, 1).await.unwrap();
        let ln = view.file("ln").await.unwrap().unwrap();
        assert_eq!(ln.content().await.unwrap(), Bytes::from("link target"));
        let props = ln.properties().await.unwrap();
        assert!(props.iter().any(|(n, _)| n == names::SPECIAL));
    }
}
