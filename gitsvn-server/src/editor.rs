//! Commit editor (write path)
//!
//! Consumes the client's editor command stream, materialises a mutable tree
//! overlay on top of the base revision and publishes a new commit with a
//! compare-and-set branch update. The overlay is a flat arena of open
//! directories indexed by token; files stream their deltas into a memory
//! sink that spills to a scratch file past a threshold.
//!
//! ```text
//! commit
//!    params:   ( logmsg:string ? ( ( lock-path:string lock-token:string )
//!                ... ) keep-locks:bool )
//!    response: ( )
//!    Upon successful completion of the edit, the server sends the
//!    commit-info reply.
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use gitsvn_core::error::codes;
use gitsvn_core::object::{Commit, FileMode, ObjectId, ObjectKind, Tree, TreeEntry};
use gitsvn_core::props::names;
use gitsvn_core::{filter, history, paths, store, SvnError};
use gitsvn_protocol::{Item, ItemReader};

use crate::session::{Result, ServerError, Session};

/// Delta payloads buffered in memory up to this size, then spilled to disk.
const MEMORY_SINK_LIMIT: usize = 8 * 1024 * 1024;

/// Streamed sink for incoming textdelta bytes.
enum Sink {
    Memory(Vec<u8>),
    Scratch(tokio::fs::File, usize),
}

impl Sink {
    fn new() -> Self {
        Sink::Memory(Vec::new())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Sink::Memory(buf) if buf.len() + data.len() <= MEMORY_SINK_LIMIT => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Sink::Memory(buf) => {
                let std_file = tempfile::tempfile().map_err(SvnError::from)?;
                let mut file = tokio::fs::File::from_std(std_file);
                file.write_all(buf).await.map_err(SvnError::from)?;
                file.write_all(data).await.map_err(SvnError::from)?;
                let len = buf.len() + data.len();
                *self = Sink::Scratch(file, len);
                Ok(())
            }
            Sink::Scratch(file, len) => {
                file.write_all(data).await.map_err(SvnError::from)?;
                *len += data.len();
                Ok(())
            }
        }
    }

    async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Sink::Memory(buf) => Ok(buf),
            Sink::Scratch(mut file, len) => {
                file.seek(SeekFrom::Start(0)).await.map_err(SvnError::from)?;
                let mut buf = Vec::with_capacity(len);
                file.read_to_end(&mut buf).await.map_err(SvnError::from)?;
                Ok(buf)
            }
        }
    }
}

/// One open directory in the overlay arena.
struct DirState {
    parent: Option<usize>,
    name: String,
    path: String,
    tree: Tree,
    base_rev: u64,
    closed: bool,
}

/// One file under edit.
struct FileState {
    path: String,
    dir: usize,
    added: bool,
    base_mode: Option<FileMode>,
    /// Client-visible base content identity for the delta source
    base_blob: Option<ObjectId>,
    base_rev: u64,
    sink: Option<Sink>,
    props: BTreeMap<String, Option<String>>,
}

struct EditState {
    base_rev: Option<u64>,
    dirs: Vec<DirState>,
    dir_tokens: HashMap<String, usize>,
    files: HashMap<String, FileState>,
    /// `(action, path)` of every modification, for hooks and lock checks
    changed: Vec<(char, String)>,
}

impl EditState {
    fn new() -> Self {
        Self {
            base_rev: None,
            dirs: Vec::new(),
            dir_tokens: HashMap::new(),
            files: HashMap::new(),
            changed: Vec::new(),
        }
    }

    fn dir(&mut self, token: &str) -> Result<usize> {
        self.dir_tokens
            .get(token)
            .copied()
            .filter(|&idx| !self.dirs[idx].closed)
            .ok_or_else(|| {
                SvnError::new(
                    codes::STREAM_MALFORMED_DATA,
                    format!("Unknown directory token: {token}"),
                )
                .into()
            })
    }

    fn file(&mut self, token: &str) -> Result<&mut FileState> {
        self.files.get_mut(token).ok_or_else(|| {
            ServerError::from(SvnError::new(
                codes::STREAM_MALFORMED_DATA,
                format!("Unknown file token: {token}"),
            ))
        })
    }
}

pub async fn commit<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let message = params.read_string()?;
    let mut lock_tokens: BTreeMap<String, String> = BTreeMap::new();
    if let Some(mut list) = params.read_trailing_list().unwrap_or(None) {
        while !list.at_end() {
            let mut pair = list.read_list()?;
            let path = pair.read_string()?;
            let token = pair.read_string()?;
            lock_tokens.insert(session.repository_path(&path), token);
        }
    }
    let keep_locks = params.read_trailing_bool().unwrap_or(None).unwrap_or(false);

    session.check_write(session.parent())?;

    // The write lock covers the whole edit-apply-flush cycle.
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let guard = repo.lock_branch_for_write(branch).await;
    repo.update_revisions(branch).await?;
    let tip_rev = repo.latest_revision(branch).await;
    let tip_id = repo.commit_id_at(branch, tip_rev).await?;

    session.send_auth_request().await?;
    session.send_success_empty().await?;

    let mut edit = EditState::new();
    let outcome = drive_edit(session, &mut edit, tip_rev).await;
    match outcome {
        Ok(EditOutcome::Aborted) => {
            drop(guard);
            debug!("edit aborted by client");
            session.send_success_empty().await
        }
        Ok(EditOutcome::Closed) => {
            let result =
                publish(session, &mut edit, tip_rev, tip_id, &message, &lock_tokens, keep_locks)
                    .await;
            drop(guard);
            match result {
                Ok((new_rev, date, author, post_err)) => {
                    info!(revision = new_rev, author = %author, "commit published");
                    session
                        .writer
                        .list_begin()
                        .word("success")
                        .list_begin()
                        .number(new_rev)
                        .list_begin()
                        .string(&date)
                        .list_end()
                        .list_begin()
                        .string(&author)
                        .list_end()
                        .list_begin()
                        .string_opt(post_err.as_deref())
                        .list_end()
                        .list_end()
                        .list_end();
                    Ok(session.writer.flush().await?)
                }
                Err(err) => Err(err),
            }
        }
        Err(err) => {
            // Discard the overlay; the client sees the failure and the
            // session continues.
            drop(guard);
            Err(err)
        }
    }
}

enum EditOutcome {
    Closed,
    Aborted,
}

async fn drive_edit<R, W>(
    session: &mut Session<R, W>,
    edit: &mut EditState,
    tip_rev: u64,
) -> Result<EditOutcome>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    // The editor stream is pipelined: after a semantic error the remaining
    // commands drain unanswered until close-edit or abort-edit, and the
    // failure becomes the single command response.
    let mut pending_error: Option<SvnError> = None;
    loop {
        session.parser.read_list_begin().await?;
        let cmd = session.parser.read_word().await?;
        let args = session.parser.read_list_items().await?;
        if pending_error.is_some() {
            match cmd.as_str() {
                "abort-edit" | "close-edit" => {
                    return Err(pending_error.take().expect("pending error").into())
                }
                _ => continue,
            }
        }
        let result = apply_edit_command(session, edit, tip_rev, &cmd, &args).await;
        match result {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {}
            Err(ServerError::Svn(err)) => pending_error = Some(err),
            Err(err) => return Err(err),
        }
    }
}

async fn apply_edit_command<R, W>(
    session: &mut Session<R, W>,
    edit: &mut EditState,
    tip_rev: u64,
    cmd: &str,
    args: &[Item],
) -> Result<Option<EditOutcome>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let items = match args.first() {
        Some(Item::List(items)) => items.as_slice(),
        _ => &[],
    };
    let mut reader = ItemReader::new(items);
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;

    match cmd {
        "open-root" => {
            let rev = reader.read_optional_number().unwrap_or(None).unwrap_or(tip_rev);
            let token = reader.read_string()?;
            let view = repo.view(branch, rev).await?;
            let root = view.root().await?;
            let tree = repo.tree(root.object_id()).await?.as_ref().clone();
            // The session parent scopes the edit; open the parent chain's
            // tree so paths resolve relative to it.
            let parent_path = session.parent().to_string();
            let tree = if parent_path.is_empty() {
                tree
            } else {
                match view.file(&parent_path).await? {
                    Some(entry) if entry.is_dir() => {
                        repo.tree(entry.object_id()).await?.as_ref().clone()
                    }
                    _ => Tree::new(),
                }
            };
            edit.base_rev = Some(rev);
            edit.dirs.push(DirState {
                parent: None,
                name: String::new(),
                path: parent_path,
                tree,
                base_rev: rev,
                closed: false,
            });
            edit.dir_tokens.insert(token, 0);
        }
        "open-dir" => {
            let path = reader.read_string()?;
            let parent_token = reader.read_string()?;
            let child_token = reader.read_string()?;
            let rev = reader.read_optional_number().unwrap_or(None);
            let parent_idx = edit.dir(&parent_token)?;
            let name = paths::base_name(&path).to_string();
            let full_path = session.repository_path(&path);
            session.check_write(&full_path)?;
            let entry = edit.dirs[parent_idx].tree.get(&name).cloned().ok_or_else(|| {
                SvnError::new(codes::FS_NOT_FOUND, format!("Directory not found: {path}"))
            })?;
            if !entry.mode.is_dir() {
                return Err(SvnError::new(
                    codes::FS_NOT_DIRECTORY,
                    format!("Path is not a directory: {path}"),
                )
                .into());
            }
            let tree = repo.tree(entry.id).await?.as_ref().clone();
            let base_rev = rev.unwrap_or(edit.dirs[parent_idx].base_rev);
            edit.dirs.push(DirState {
                parent: Some(parent_idx),
                name,
                path: full_path,
                tree,
                base_rev,
                closed: false,
            });
            edit.dir_tokens.insert(child_token, edit.dirs.len() - 1);
        }
        "add-dir" => {
            let path = reader.read_string()?;
            let parent_token = reader.read_string()?;
            let child_token = reader.read_string()?;
            let copy = read_copy_source(&mut reader);
            let parent_idx = edit.dir(&parent_token)?;
            let name = paths::base_name(&path).to_string();
            let full_path = session.repository_path(&path);
            session.check_write(&full_path)?;
            if edit.dirs[parent_idx].tree.get(&name).is_some() {
                return Err(SvnError::new(
                    codes::FS_CONFLICT,
                    format!("Path already exists: {path}"),
                )
                .into());
            }
            let tree = match &copy {
                Some((copy_path, copy_rev)) => {
                    let source_path = session.path_from_url(copy_path).unwrap_or_else(|_| {
                        paths::normalize(copy_path)
                    });
                    let view = repo.view(branch, *copy_rev).await?;
                    match view.file(&source_path).await? {
                        Some(entry) if entry.is_dir() => {
                            repo.tree(entry.object_id()).await?.as_ref().clone()
                        }
                        _ => {
                            return Err(SvnError::new(
                                codes::FS_NOT_FOUND,
                                format!("Copy source not found: {copy_path}@{copy_rev}"),
                            )
                            .into())
                        }
                    }
                }
                None => Tree::new(),
            };
            let base_rev = edit.dirs[parent_idx].base_rev;
            edit.changed.push(('A', full_path.clone()));
            edit.dirs.push(DirState {
                parent: Some(parent_idx),
                name,
                path: full_path,
                tree,
                base_rev,
                closed: false,
            });
            edit.dir_tokens.insert(child_token, edit.dirs.len() - 1);
        }
        "change-dir-prop" => {
            // Directory properties are derived from tracked dotfiles; the
            // values accompanying an edit carry no independent state.
            let _token = reader.read_string()?;
            let _name = reader.read_string()?;
        }
        "close-dir" => {
            let token = reader.read_string()?;
            let idx = edit.dir(&token)?;
            close_dir(&repo, edit, idx).await?;
        }
        "delete-entry" => {
            let path = reader.read_string()?;
            let _rev = reader.read_optional_number().unwrap_or(None);
            let parent_token = reader.read_string()?;
            let parent_idx = edit.dir(&parent_token)?;
            let name = paths::base_name(&path).to_string();
            let full_path = session.repository_path(&path);
            session.check_write(&full_path)?;
            if edit.dirs[parent_idx].tree.remove(&name).is_none() {
                return Err(SvnError::new(
                    codes::FS_NOT_FOUND,
                    format!("Entry not found: {path}"),
                )
                .into());
            }
            edit.changed.push(('D', full_path));
        }
        "add-file" => {
            let path = reader.read_string()?;
            let dir_token = reader.read_string()?;
            let file_token = reader.read_string()?;
            let copy = read_copy_source(&mut reader);
            let dir = edit.dir(&dir_token)?;
            let full_path = session.repository_path(&path);
            session.check_write(&full_path)?;
            let name = paths::base_name(&path).to_string();
            if edit.dirs[dir].tree.get(&name).is_some() {
                return Err(SvnError::new(
                    codes::FS_CONFLICT,
                    format!("Path already exists: {path}"),
                )
                .into());
            }
            let (base_mode, base_blob) = match &copy {
                Some((copy_path, copy_rev)) => {
                    let source_path = session.path_from_url(copy_path).unwrap_or_else(|_| {
                        paths::normalize(copy_path)
                    });
                    let view = repo.view(branch, *copy_rev).await?;
                    match view.file(&source_path).await? {
                        Some(entry) if !entry.is_dir() => {
                            (Some(entry.mode()), Some(entry.object_id()))
                        }
                        _ => {
                            return Err(SvnError::new(
                                codes::FS_NOT_FOUND,
                                format!("Copy source not found: {copy_path}@{copy_rev}"),
                            )
                            .into())
                        }
                    }
                }
                None => (None, None),
            };
            let base_rev = edit.dirs[dir].base_rev;
            edit.files.insert(
                file_token,
                FileState {
                    path: full_path,
                    dir,
                    added: true,
                    base_mode,
                    base_blob,
                    base_rev,
                    sink: None,
                    props: BTreeMap::new(),
                },
            );
        }
        "open-file" => {
            let path = reader.read_string()?;
            let dir_token = reader.read_string()?;
            let file_token = reader.read_string()?;
            let rev = reader.read_optional_number().unwrap_or(None);
            let dir = edit.dir(&dir_token)?;
            let full_path = session.repository_path(&path);
            session.check_write(&full_path)?;
            let name = paths::base_name(&path).to_string();
            let entry = edit.dirs[dir].tree.get(&name).cloned().ok_or_else(|| {
                SvnError::new(codes::FS_NOT_FOUND, format!("File not found: {path}"))
            })?;
            if entry.mode.is_dir() {
                return Err(SvnError::new(
                    codes::FS_NOT_FILE,
                    format!("Path is not a file: {path}"),
                )
                .into());
            }
            let base_rev = rev.unwrap_or(edit.dirs[dir].base_rev);
            edit.files.insert(
                file_token,
                FileState {
                    path: full_path,
                    dir,
                    added: false,
                    base_mode: Some(entry.mode),
                    base_blob: Some(entry.id),
                    base_rev,
                    sink: None,
                    props: BTreeMap::new(),
                },
            );
        }
        "apply-textdelta" => {
            let token = reader.read_string()?;
            let file = edit.file(&token)?;
            file.sink = Some(Sink::new());
        }
        "textdelta-chunk" => {
            let token = reader.read_string()?;
            let chunk = reader.read_bytes()?;
            let file = edit.file(&token)?;
            match &mut file.sink {
                Some(sink) => sink.write(&chunk).await?,
                None => {
                    return Err(SvnError::new(
                        codes::STREAM_MALFORMED_DATA,
                        "textdelta-chunk without apply-textdelta",
                    )
                    .into())
                }
            }
        }
        "textdelta-end" => {
            let token = reader.read_string()?;
            edit.file(&token)?;
        }
        "change-file-prop" => {
            let token = reader.read_string()?;
            let name = reader.read_string()?;
            let value = reader.read_optional_string().unwrap_or(None);
            let file = edit.file(&token)?;
            file.props.insert(name, value);
        }
        "close-file" => {
            let token = reader.read_string()?;
            let declared_md5 = match reader.read_trailing_list().unwrap_or(None) {
                Some(mut list) if !list.at_end() => Some(list.read_string()?),
                _ => None,
            };
            let file = edit.files.remove(&token).ok_or_else(|| {
                SvnError::new(
                    codes::STREAM_MALFORMED_DATA,
                    format!("Unknown file token: {token}"),
                )
            })?;
            close_file(&repo, edit, file, declared_md5).await?;
        }
        "close-edit" => return Ok(Some(EditOutcome::Closed)),
        "abort-edit" => return Ok(Some(EditOutcome::Aborted)),
        other => {
            return Err(SvnError::new(
                codes::RA_SVN_UNKNOWN_CMD,
                format!("Unsupported editor command: {other}"),
            )
            .into())
        }
    }
    Ok(None)
}

/// `( ?copy-path copy-rev )` trailing tuple of add-dir/add-file.
fn read_copy_source(reader: &mut ItemReader<'_>) -> Option<(String, u64)> {
    let mut list = reader.read_trailing_list().ok().flatten()?;
    if list.at_end() {
        return None;
    }
    let path = list.read_string().ok()?;
    let rev = list.read_number().ok()?;
    Some((path, rev))
}

async fn close_dir(
    repo: &gitsvn_core::Repository,
    edit: &mut EditState,
    idx: usize,
) -> Result<()> {
    if edit.dirs[idx].closed {
        return Ok(());
    }
    edit.dirs[idx].closed = true;
    let Some(parent) = edit.dirs[idx].parent else {
        return Ok(());
    };
    let tree = edit.dirs[idx].tree.clone();
    let id = store::put_tree(repo.store(), &tree).await?;
    let name = edit.dirs[idx].name.clone();
    edit.dirs[parent]
        .tree
        .insert(TreeEntry::new(name, FileMode::Dir, id));
    Ok(())
}

async fn close_file(
    repo: &gitsvn_core::Repository,
    edit: &mut EditState,
    file: FileState,
    declared_md5: Option<String>,
) -> Result<()> {
    // Client-visible base content feeding the delta.
    let base_mode = file.base_mode.unwrap_or(FileMode::File);
    let base_content = match file.base_blob {
        Some(blob) => {
            let raw = repo.store().get(blob).await?;
            filter::for_mode(base_mode).read(raw)
        }
        None => bytes::Bytes::new(),
    };

    let content = match file.sink {
        Some(sink) => {
            let delta = sink.into_bytes().await?;
            gitsvn_protocol::apply_svndiff(&base_content, &delta).map_err(|e| {
                SvnError::new(codes::STREAM_MALFORMED_DATA, format!("Bad delta: {e}"))
            })?
        }
        None => base_content.to_vec(),
    };

    if let Some(declared) = &declared_md5 {
        let actual = format!("{:x}", md5::compute(&content));
        if actual != declared.to_lowercase() {
            return Err(SvnError::new(
                codes::CHECKSUM_MISMATCH,
                format!(
                    "Checksum mismatch for '{}': expected {declared}, actual {actual}",
                    file.path
                ),
            )
            .into());
        }
    }

    // Mode from accumulated property changes, falling back to the base.
    let special = match file.props.get(names::SPECIAL) {
        Some(value) => value.is_some(),
        None => base_mode == FileMode::Symlink,
    };
    let executable = match file.props.get(names::EXECUTABLE) {
        Some(value) => value.is_some(),
        None => base_mode == FileMode::Executable,
    };
    let mode = if special {
        FileMode::Symlink
    } else if executable {
        FileMode::Executable
    } else {
        FileMode::File
    };

    let stored = filter::for_mode(mode).write(bytes::Bytes::from(content));
    let blob_id = repo.store().put(ObjectKind::Blob, stored).await?;
    let name = paths::base_name(&file.path).to_string();
    edit.dirs[file.dir]
        .tree
        .insert(TreeEntry::new(name, mode, blob_id));
    edit.changed
        .push((if file.added { 'A' } else { 'M' }, file.path));
    Ok(())
}

/// Serialise the overlay bottom-up, run checks and hooks, publish the
/// commit and answer with the new revision.
async fn publish<R, W>(
    session: &mut Session<R, W>,
    edit: &mut EditState,
    tip_rev: u64,
    tip_id: ObjectId,
    message: &str,
    lock_tokens: &BTreeMap<String, String>,
    keep_locks: bool,
) -> Result<(u64, String, String, Option<String>)>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;

    if edit.dirs.is_empty() {
        return Err(SvnError::new(
            codes::STREAM_MALFORMED_DATA,
            "Edit closed without open-root",
        )
        .into());
    }

    // Close any directories the client left open, children first.
    for idx in (0..edit.dirs.len()).rev() {
        close_dir(&repo, edit, idx).await?;
    }

    // Out-of-date and lock checks over everything the edit touched.
    for (_, path) in &edit.changed {
        if let Some(changed_at) = history::last_change(&repo, branch, path, tip_rev).await? {
            if changed_at > edit.base_rev.unwrap_or(tip_rev) {
                return Err(SvnError::new(
                    codes::WC_NOT_UP_TO_DATE,
                    format!("Path '/{path}' is out of date (changed in r{changed_at})"),
                )
                .into());
            }
        }
        repo.locks()
            .check_write(session.user(), path, lock_tokens)?;
    }

    repo.hooks()
        .run_pre_commit(&session.user().username, message, &edit.changed)
        .await?;

    // Root overlay tree becomes the new commit tree; a non-empty session
    // parent grafts it back onto the full base tree.
    let root_tree_id = {
        let root = &edit.dirs[0];
        let id = store::put_tree(repo.store(), &root.tree).await?;
        if root.path.is_empty() {
            id
        } else {
            graft_subtree(&repo, branch, tip_rev, &root.path, id).await?
        }
    };

    let timestamp = chrono::Utc::now().timestamp();
    let author = session.user().username.clone();
    let commit = Commit {
        tree: root_tree_id,
        parents: vec![tip_id],
        author: author.clone(),
        committer: author.clone(),
        message: message.to_string(),
        timestamp,
        tz_offset: 0,
    };
    let date = commit.date_string();
    let new_rev = repo.commit_revision(branch, tip_id, commit).await?;

    if !keep_locks {
        let paths: Vec<String> = edit.changed.iter().map(|(_, p)| p.clone()).collect();
        repo.locks().release_after_commit(session.user(), &paths)?;
    }

    let post_err = repo
        .hooks()
        .run_post_commit(new_rev, &author, message)
        .await;

    Ok((new_rev, date, author, post_err))
}

/// Rebuild ancestor trees when the edit was rooted below the repository
/// root (session parent), returning the new root tree id.
async fn graft_subtree(
    repo: &gitsvn_core::Repository,
    branch: &gitsvn_core::Branch,
    base_rev: u64,
    subtree_path: &str,
    subtree_id: ObjectId,
) -> Result<ObjectId> {
    let view = repo.view(branch, base_rev).await?;
    let root = view.root().await?;

    // Collect ancestor trees root-first.
    let mut chain: Vec<(String, Tree)> = vec![(String::new(), {
        repo.tree(root.object_id()).await?.as_ref().clone()
    })];
    let mut walked = String::new();
    for segment in subtree_path.split('/').filter(|s| !s.is_empty()) {
        let current = &chain.last().expect("chain is never empty").1;
        let tree = match current.get(segment) {
            Some(entry) if entry.mode.is_dir() => repo.tree(entry.id).await?.as_ref().clone(),
            _ => Tree::new(),
        };
        walked = paths::join(&walked, segment);
        chain.push((walked.clone(), tree));
    }

    // Replace the subtree and serialise back up.
    let mut child_id = subtree_id;
    for idx in (0..chain.len() - 1).rev() {
        let child_name = paths::base_name(&chain[idx + 1].0).to_string();
        let (_, tree) = &mut chain[idx];
        tree.insert(TreeEntry::new(child_name, FileMode::Dir, child_id));
        child_id = store::put_tree(repo.store(), tree).await?;
    }
    Ok(child_id)
}
