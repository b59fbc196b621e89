//! Delta reporter
//!
//! Drives the report-then-edit halves of `update`, `switch`, `status`,
//! `diff` and the replay commands. The client first describes what it has
//! (`set-path` / `delete-path` / `link-path`), then the server walks old
//! and new revision views in parallel and streams a tree-structured edit
//! script honouring per-path depth overrides.
//!
//! ```text
//! set-path:
//! params: ( path:string rev:number start-empty:bool
//! ? [ lock-token:string ] ? depth:word )
//!
//! delete-path:
//! params: ( path:string )
//!
//! link-path:
//! params: ( path:string url:string rev:number start-empty:bool
//! ? [ lock-token:string ] ? depth:word )
//! ```
//!
//! Directory open/add headers are deferred: they are queued on a stack and
//! written only when a descendant actually produces output, so an
//! up-to-date subtree emits nothing at all.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use gitsvn_core::error::codes;
use gitsvn_core::repository::{Branch, CopyFrom, Repository};
use gitsvn_core::revision::FileEntry;
use gitsvn_core::users::User;
use gitsvn_core::{history, paths, SvnError};
use gitsvn_protocol::{DeltaGenerator, Item, ItemReader, SvnWriter};

use crate::depth::{Depth, DepthAction};
use crate::session::{Result, ServerError, Session};
use crate::step::Step;

/// Which command family opened the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaCommand {
    Update,
    Switch,
    Status,
    Diff,
    Replay,
}

/// Parsed command parameters shared by the delta family.
#[derive(Debug, Clone)]
pub struct DeltaParams {
    pub command: DeltaCommand,
    /// Target path, relative to the session parent
    pub target: String,
    pub rev: Option<u64>,
    pub depth: Depth,
    pub send_copyfrom: bool,
    /// Rebase target for switch/diff
    pub switch_url: Option<String>,
    /// Emit textdelta chunk payloads (status and diff-without-text skip them)
    pub text_deltas: bool,
    /// Send `svn:entry:*` pseudo-properties with each entry
    pub include_internal_props: bool,
    /// Copy-from sources older than this are suppressed
    pub low_water: Option<u64>,
}

/// One `set-path` / `link-path` report entry.
#[derive(Debug, Clone)]
struct SetPathArgs {
    rev: u64,
    start_empty: bool,
    depth: Depth,
    /// Rebased source location for `link-path`
    link_path: Option<String>,
}

/// Collected report state for one delta command.
pub struct ReportPipeline {
    params: DeltaParams,
    paths: HashMap<String, SetPathArgs>,
    deleted: HashSet<String>,
    forced: HashMap<String, HashSet<String>>,
}

impl ReportPipeline {
    pub fn new(params: DeltaParams) -> Self {
        Self {
            params,
            paths: HashMap::new(),
            deleted: HashSet::new(),
            forced: HashMap::new(),
        }
    }

    fn wc_path(&self, name: &str) -> String {
        paths::join(&self.params.target, &paths::normalize(name))
    }

    fn force_path(&mut self, wc_path: &str) {
        let mut path = wc_path.to_string();
        while !path.is_empty() {
            let parent = paths::parent(&path).to_string();
            let fresh = self.forced.entry(parent.clone()).or_default().insert(path);
            if !fresh {
                break;
            }
            path = parent;
        }
    }

    fn set_path(&mut self, name: &str, args: SetPathArgs) {
        let wc_path = self.wc_path(name);
        self.force_path(&wc_path);
        self.paths.insert(wc_path, args);
    }

    fn delete_path(&mut self, name: &str) {
        let wc_path = self.wc_path(name);
        self.force_path(&wc_path);
        self.deleted.insert(wc_path);
    }

    /// Step body: read one report sub-command, then requeue or finish.
    pub async fn read_report_command<R, W>(mut self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + Sync,
    {
        session.parser.read_list_begin().await?;
        let cmd = session.parser.read_word().await?;
        let args = session.parser.read_list_items().await?;
        debug!(command = %cmd, "report command");

        let items = match args.first() {
            Some(Item::List(items)) => items.as_slice(),
            _ => &[],
        };
        let mut reader = ItemReader::new(items);

        match cmd.as_str() {
            "set-path" => {
                let path = reader.read_string()?;
                let rev = reader.read_number()?;
                let start_empty = reader.read_bool()?;
                let _lock_tokens = reader.read_trailing_list();
                let depth = reader
                    .read_trailing_string()
                    .unwrap_or(None)
                    .map(|w| Depth::parse(&w))
                    .unwrap_or(Depth::Unknown);
                self.set_path(
                    &path,
                    SetPathArgs {
                        rev,
                        start_empty,
                        depth,
                        link_path: None,
                    },
                );
                session.push_step(Step::ReportCommand(self));
            }
            "delete-path" => {
                let path = reader.read_string()?;
                self.delete_path(&path);
                session.push_step(Step::ReportCommand(self));
            }
            "link-path" => {
                let path = reader.read_string()?;
                let url = reader.read_string()?;
                let rev = reader.read_number()?;
                let start_empty = reader.read_bool()?;
                let _lock_tokens = reader.read_trailing_list();
                let depth = reader
                    .read_trailing_string()
                    .unwrap_or(None)
                    .map(|w| Depth::parse(&w))
                    .unwrap_or(Depth::Unknown);
                let link_path = session.path_from_url(&url)?;
                self.set_path(
                    &path,
                    SetPathArgs {
                        rev,
                        start_empty,
                        depth,
                        link_path: Some(link_path),
                    },
                );
                session.push_step(Step::ReportCommand(self));
            }
            "finish-report" => {
                session.push_step(Step::FinishReport(self));
            }
            "abort-report" => {
                session.send_success_empty().await?;
            }
            other => {
                let err = SvnError::new(
                    codes::RA_SVN_UNKNOWN_CMD,
                    format!("Unsupported report command: {other}"),
                );
                session.send_failure(&err).await?;
                session.push_step(Step::ReportCommand(self));
            }
        }
        Ok(())
    }

    /// Step body: permission gate, stream the delta, read the verdict.
    pub async fn finish<R, W>(self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + Sync,
    {
        session.check_read(&session.repository_path(&self.params.target))?;
        session.send_auth_request().await?;

        self.send_delta(session).await?;

        session
            .writer
            .list_begin()
            .word("close-edit")
            .list_begin()
            .list_end()
            .list_end();
        session.writer.flush().await?;

        // Client verdict on the applied edit.
        session.parser.read_list_begin().await?;
        let status = session.parser.read_word().await?;
        let verdict = session.parser.read_list_items().await?;
        match status.as_str() {
            "success" => {
                session.send_success_empty().await?;
            }
            "failure" => {
                let failures = parse_failures(&verdict);
                for failure in &failures {
                    tracing::warn!(
                        code = failure.code,
                        "received client error: {}",
                        failure.message
                    );
                }
                session
                    .writer
                    .list_begin()
                    .word("abort-edit")
                    .list_begin()
                    .list_end()
                    .list_end();
                session.writer.list_begin().word("failure").list_begin();
                for failure in &failures {
                    session
                        .writer
                        .list_begin()
                        .number(failure.code as u64)
                        .string(&failure.message)
                        .string(&failure.file)
                        .number(failure.line)
                        .list_end();
                }
                session.writer.list_end().list_end();
                session.writer.flush().await?;
            }
            other => {
                return Err(ServerError::Protocol(gitsvn_protocol::ProtocolError::Message(
                    format!("unexpected client status: {other}"),
                )));
            }
        }
        Ok(())
    }

    /// Emit `target-rev` through `close-dir` for the collected report.
    pub async fn send_delta<R, W>(&self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + Sync,
    {
        let root_args = self.paths.get(&self.params.target).ok_or_else(|| {
            SvnError::new(codes::STREAM_MALFORMED_DATA, "Report has no root entry")
        })?;

        let target_rev = match self.params.rev {
            Some(rev) => rev,
            None => session.latest_revision().await?,
        };

        let repo = session.repo_arc();
        let branch = repo.branch(session.branch_name())?;
        repo.update_revisions(branch).await?;

        session
            .writer
            .list_begin()
            .word("target-rev")
            .list_begin()
            .number(target_rev)
            .list_end()
            .list_end();

        let sender_user = session.user().clone();
        let sender_parent = session.parent().to_string();
        let sender_compression = session.compression_enabled();
        let sender_access = repo.access();
        let mut sender = DeltaSender {
            repo: &repo,
            branch,
            writer: &mut session.writer,
            user: sender_user,
            parent: sender_parent,
            compression: sender_compression,
            access: sender_access,
            params: &self.params,
            paths: &self.paths,
            deleted: &self.deleted,
            forced: &self.forced,
            target_rev,
            low_water: self.params.low_water.unwrap_or_else(|| {
                self.paths.values().map(|args| args.rev).min().unwrap_or(0)
            }),
            pending: Vec::new(),
            token_counter: 0,
        };
        sender.send_root(root_args).await?;
        session.writer.flush().await?;
        Ok(())
    }
}

struct ClientFailure {
    code: u32,
    message: String,
    file: String,
    line: u64,
}

fn parse_failures(items: &[Item]) -> Vec<ClientFailure> {
    let mut out = Vec::new();
    // Verdict shape: ( failure ( ( code msg file line ) ... ) )
    let Some(Item::List(failures)) = items.first() else {
        return out;
    };
    for item in failures {
        let Item::List(fields) = item else { continue };
        let mut reader = ItemReader::new(fields);
        let (Ok(code), Ok(message), Ok(file), Ok(line)) = (
            reader.read_number(),
            reader.read_string(),
            reader.read_string(),
            reader.read_number(),
        ) else {
            continue;
        };
        out.push(ClientFailure {
            code: code as u32,
            message,
            file,
            line,
        });
    }
    out
}

/// A deferred open/add header plus its matching close.
struct PendingHeader {
    written: bool,
    open: OpenEntry,
    close: CloseEntry,
}

#[derive(Clone)]
struct OpenEntry {
    /// `open-dir`, `add-dir`, `open-file` or `add-file`
    command: &'static str,
    path: String,
    parent_token: String,
    token: String,
    /// Base revision for opens
    rev: Option<u64>,
    /// Copy source for adds
    copy: Option<CopyFrom>,
    /// Entry pseudo-properties written right after the header
    rev_props: Vec<(String, String)>,
}

enum CloseEntry {
    Dir { token: String },
    File { token: String, md5: String },
}

/// Tree walker streaming the edit script.
struct DeltaSender<'r, 's, W> {
    repo: &'r Repository,
    branch: &'r Branch,
    writer: &'s mut SvnWriter<W>,
    user: User,
    parent: String,
    compression: bool,
    access: &'r gitsvn_core::AccessRules,
    params: &'s DeltaParams,
    paths: &'s HashMap<String, SetPathArgs>,
    deleted: &'s HashSet<String>,
    forced: &'s HashMap<String, HashSet<String>>,
    target_rev: u64,
    low_water: u64,
    pending: Vec<PendingHeader>,
    token_counter: u64,
}

impl<'r, 's, W> DeltaSender<'r, 's, W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    fn next_token(&mut self) -> String {
        self.token_counter += 1;
        format!("t{}", self.token_counter)
    }

    fn full_path(&self, wc_path: &str) -> String {
        paths::join(&self.parent, wc_path)
    }

    fn can_read(&self, wc_path: &str) -> bool {
        self.access.can_read(&self.user, &self.full_path(wc_path))
    }

    /// Flush deferred headers, oldest first, then hand out the writer.
    async fn get_writer(&mut self) -> Result<&mut SvnWriter<W>> {
        for i in 0..self.pending.len() {
            if self.pending[i].written {
                continue;
            }
            self.pending[i].written = true;
            let open = self.pending[i].open.clone();
            let kind = if open.command.ends_with("file") {
                "file"
            } else {
                "dir"
            };
            self.writer
                .list_begin()
                .word(open.command)
                .list_begin()
                .string(&open.path)
                .string(&open.parent_token)
                .string(&open.token)
                .list_begin();
            if let Some(rev) = open.rev {
                self.writer.number(rev);
            }
            if let Some(copy) = &open.copy {
                self.writer
                    .string(&format!("/{}", copy.path))
                    .number(copy.revision);
            }
            self.writer.list_end().list_end().list_end();
            for (name, value) in &open.rev_props {
                change_prop(self.writer, kind, &open.token, name, Some(value));
            }
        }
        Ok(&mut *self.writer)
    }

    /// Emit the close of the top pending header when its open was written.
    async fn finish_header(&mut self) -> Result<()> {
        let header = self
            .pending
            .pop()
            .expect("finish_header without pending header");
        if !header.written {
            return Ok(());
        }
        match &header.close {
            CloseEntry::Dir { token } => {
                self.writer
                    .list_begin()
                    .word("close-dir")
                    .list_begin()
                    .string(token)
                    .list_end()
                    .list_end();
            }
            CloseEntry::File { token, md5 } => {
                self.writer
                    .list_begin()
                    .word("close-file")
                    .list_begin()
                    .string(token)
                    .list_begin()
                    .string(md5)
                    .list_end()
                    .list_end()
                    .list_end();
            }
        }
        Ok(())
    }

    fn start_empty(&self, wc_path: &str) -> bool {
        self.paths
            .get(wc_path)
            .map(|args| args.start_empty)
            .unwrap_or(false)
    }

    fn wc_depth_for(&self, wc_path: &str, parent_depth: Depth) -> Depth {
        match self.paths.get(wc_path) {
            Some(args) => args.depth,
            None => parent_depth.deepen(),
        }
    }

    async fn view_file(&self, rev: u64, path: &str) -> Result<Option<FileEntry<'r>>> {
        let view = self.repo.view(self.branch, rev).await?;
        Ok(view.file(path).await?)
    }

    /// Old view of a report path, honouring per-path overrides.
    async fn prev_entry(
        &self,
        wc_path: &str,
        inherited: Option<FileEntry<'r>>,
    ) -> Result<Option<FileEntry<'r>>> {
        if self.deleted.contains(wc_path) {
            return Ok(None);
        }
        let Some(args) = self.paths.get(wc_path) else {
            return Ok(inherited);
        };
        if args.rev == 0 && args.link_path.is_none() {
            return Ok(None);
        }
        let lookup = match &args.link_path {
            Some(link) => link.clone(),
            None => self.full_path(wc_path),
        };
        // Reports may reference revisions beyond this branch's history;
        // treat those entries as absent on the client.
        match self.repo.commit_id_at(self.branch, args.rev).await {
            Ok(_) => self.view_file(args.rev, &lookup).await,
            Err(_) => Ok(None),
        }
    }

    async fn send_root(&mut self, root_args: &SetPathArgs) -> Result<()> {
        let root_token = self.next_token();
        self.writer
            .list_begin()
            .word("open-root")
            .list_begin()
            .list_begin()
            .number(root_args.rev)
            .list_end()
            .string(&root_token)
            .list_end()
            .list_end();

        let full_target = self.full_path(&self.params.target);
        // Switch and diff rebase the new side onto the requested URL.
        let new_lookup = match &self.params.switch_url {
            Some(url_path) => url_path.clone(),
            None => full_target.clone(),
        };

        let new_entry = self.view_file(self.target_rev, &new_lookup).await?;
        let old_inherited = match self.repo.commit_id_at(self.branch, root_args.rev).await {
            Ok(_) => self.view_file(root_args.rev, &full_target).await?,
            Err(_) => None,
        };
        let old_entry = self
            .prev_entry(&self.params.target, old_inherited)
            .await?;

        let requested = match self.params.depth {
            Depth::Unknown => {
                if new_entry.is_some() {
                    Depth::Infinity
                } else {
                    Depth::Empty
                }
            }
            depth => depth,
        };

        self.update_entry(
            self.params.target.clone(),
            old_entry,
            new_entry,
            root_token.clone(),
            self.params.target.is_empty(),
            root_args.depth,
            requested,
        )
        .await?;

        self.writer
            .list_begin()
            .word("close-dir")
            .list_begin()
            .string(&root_token)
            .list_end()
            .list_end();
        Ok(())
    }

    fn update_entry<'a>(
        &'a mut self,
        wc_path: String,
        old: Option<FileEntry<'r>>,
        new: Option<FileEntry<'r>>,
        parent_token: String,
        root_dir: bool,
        wc_depth: Depth,
        requested: Depth,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>
    where
        'r: 'a,
    {
        Box::pin(async move {
            let mut old = old;
            if let Some(old_entry) = &old {
                let kind_changed = match &new {
                    Some(new_entry) => new_entry.is_dir() != old_entry.is_dir(),
                    None => true,
                };
                if kind_changed {
                    let rev = old_entry.last_change().await?.revision;
                    self.remove_entry(&wc_path, rev, &parent_token).await?;
                    old = None;
                }
            }
            let Some(new) = new else {
                return Ok(());
            };

            if new.is_dir() {
                // Nested repository links and unreadable directories appear
                // absent instead of failing the stream.
                if new.mode() == gitsvn_core::FileMode::Link || !self.can_read(&wc_path) {
                    let writer = self.get_writer().await?;
                    writer
                        .list_begin()
                        .word("absent-dir")
                        .list_begin()
                        .string(&wc_path)
                        .string(&parent_token)
                        .list_end()
                        .list_end();
                    return Ok(());
                }
                self.update_dir(wc_path, old, new, parent_token, root_dir, wc_depth, requested)
                    .await
            } else {
                if !self.can_read(&wc_path) {
                    let writer = self.get_writer().await?;
                    writer
                        .list_begin()
                        .word("absent-file")
                        .list_begin()
                        .string(&wc_path)
                        .string(&parent_token)
                        .list_end()
                        .list_end();
                    return Ok(());
                }
                self.update_file(wc_path, old, new, parent_token).await
            }
        })
    }

    async fn update_dir(
        &mut self,
        wc_path: String,
        prev: Option<FileEntry<'r>>,
        new: FileEntry<'r>,
        parent_token: String,
        root_dir: bool,
        wc_depth: Depth,
        requested: Depth,
    ) -> Result<()> {
        let token;
        let has_header;
        let mut old;
        if root_dir && wc_path.is_empty() {
            token = parent_token;
            old = prev;
            has_header = false;
        } else {
            token = self.next_token();
            old = self
                .send_entry_header(&wc_path, prev, &new, "dir", &parent_token, &token)
                .await?;
            has_header = true;
        }
        if self.start_empty(&wc_path) {
            old = None;
        }

        if root_dir && self.params.include_internal_props {
            let rev_props = new.rev_properties().await?;
            let writer = self.get_writer().await?;
            for (name, value) in &rev_props {
                change_prop(writer, "dir", &token, name, Some(value));
            }
        }
        self.update_props("dir", &token, &old, &new).await?;
        self.update_dir_entries(&wc_path, old, &new, &token, wc_depth, requested)
            .await?;

        if has_header {
            self.finish_header().await?;
        }
        Ok(())
    }

    async fn update_dir_entries(
        &mut self,
        wc_path: &str,
        old: Option<FileEntry<'r>>,
        new: &FileEntry<'r>,
        token: &str,
        wc_depth: Depth,
        requested: Depth,
    ) -> Result<()> {
        let dir_action = wc_depth.determine_action(requested, true);
        let file_action = wc_depth.determine_action(requested, false);

        let new_entries = new.entries().await?;
        let new_names: HashSet<String> = new_entries
            .iter()
            .map(|entry| entry.file_name().to_string())
            .collect();

        let mut forced: HashSet<String> = self
            .forced
            .get(wc_path)
            .cloned()
            .unwrap_or_default();

        let mut old_map: HashMap<String, FileEntry<'r>> = HashMap::new();
        if let Some(old_dir) = &old {
            for old_entry in old_dir.entries().await? {
                let entry_path = paths::join(wc_path, old_entry.file_name());
                if new_names.contains(old_entry.file_name()) {
                    old_map.insert(old_entry.file_name().to_string(), old_entry);
                    continue;
                }
                let rev = old_entry.last_change().await?.revision;
                self.remove_entry(&entry_path, rev, token).await?;
                forced.remove(&entry_path);
            }
        }

        // Forced paths the new tree no longer has are gone from the client's
        // point of view too.
        let new_rev = self.target_rev;
        for entry_path in forced.clone() {
            match paths::child_name(wc_path, &entry_path) {
                Some(name) if new_names.contains(name) => continue,
                _ => {
                    self.remove_entry(&entry_path, new_rev, token).await?;
                    forced.remove(&entry_path);
                }
            }
        }

        for new_entry in new_entries {
            let entry_path = paths::join(wc_path, new_entry.file_name());
            let inherited = old_map.remove(new_entry.file_name());
            let old_entry = self.prev_entry(&entry_path, inherited).await?;

            let action = if new_entry.is_dir() {
                dir_action
            } else {
                file_action
            };
            let was_forced = forced.remove(&entry_path);

            if !was_forced
                && action == DepthAction::Normal
                && requested == wc_depth
                && entries_equal(&old_entry, &new_entry).await?
            {
                continue;
            }
            if action == DepthAction::Skip {
                continue;
            }

            let entry_depth = self.wc_depth_for(&entry_path, wc_depth);
            let old_for_entry = if action == DepthAction::Upgrade {
                None
            } else {
                old_entry
            };
            self.update_entry(
                entry_path,
                old_for_entry,
                Some(new_entry),
                token.to_string(),
                false,
                entry_depth,
                requested.deepen(),
            )
            .await?;
        }
        Ok(())
    }

    async fn update_file(
        &mut self,
        wc_path: String,
        prev: Option<FileEntry<'r>>,
        new: FileEntry<'r>,
        parent_token: String,
    ) -> Result<()> {
        let token = self.next_token();
        let old = self
            .send_entry_header(&wc_path, prev, &new, "file", &parent_token, &token)
            .await?;

        let content_changed = match &old {
            Some(old_entry) => old_entry.content_hash() != new.content_hash(),
            None => true,
        };
        if content_changed {
            let compression = self.compression;
            let text_deltas = self.params.text_deltas;
            let source = match &old {
                Some(old_entry) => old_entry.content().await?,
                None => bytes::Bytes::new(),
            };
            let target = new.content().await?;
            let writer = self.get_writer().await?;
            writer
                .list_begin()
                .word("apply-textdelta")
                .list_begin()
                .string(&token)
                .list_begin()
                .list_end()
                .list_end()
                .list_end();
            if text_deltas {
                let windows = DeltaGenerator::new(compression).generate(&source, &target)?;
                for window in windows {
                    self.writer
                        .list_begin()
                        .word("textdelta-chunk")
                        .list_begin()
                        .string(&token)
                        .binary(&window)
                        .list_end()
                        .list_end();
                    self.writer.flush().await?;
                }
            }
            self.writer
                .list_begin()
                .word("textdelta-end")
                .list_begin()
                .string(&token)
                .list_end()
                .list_end();
        }
        self.update_props("file", &token, &old, &new).await?;
        self.finish_header().await?;
        Ok(())
    }

    /// Push the deferred open/add header; returns the delta base entry
    /// (previous content, or the copy-from source for adds).
    async fn send_entry_header(
        &mut self,
        wc_path: &str,
        prev: Option<FileEntry<'r>>,
        new: &FileEntry<'r>,
        kind: &'static str,
        parent_token: &str,
        token: &str,
    ) -> Result<Option<FileEntry<'r>>> {
        let rev_props = if self.params.include_internal_props {
            new.rev_properties().await?
        } else {
            Vec::new()
        };
        let close = if kind == "dir" {
            CloseEntry::Dir {
                token: token.to_string(),
            }
        } else {
            CloseEntry::File {
                token: token.to_string(),
                md5: new.md5().await?,
            }
        };

        match prev {
            Some(prev) => {
                let rev = prev.last_change().await?.revision;
                self.pending.push(PendingHeader {
                    written: false,
                    open: OpenEntry {
                        command: if kind == "dir" { "open-dir" } else { "open-file" },
                        path: wc_path.to_string(),
                        parent_token: parent_token.to_string(),
                        token: token.to_string(),
                        rev: Some(rev),
                        copy: None,
                        rev_props,
                    },
                    close,
                });
                Ok(Some(prev))
            }
            None => {
                let copy = self.copy_from(new).await?;
                let base = match &copy {
                    Some(copy) => self.view_file(copy.revision, &copy.path).await?,
                    None => None,
                };
                self.pending.push(PendingHeader {
                    written: false,
                    open: OpenEntry {
                        command: if kind == "dir" { "add-dir" } else { "add-file" },
                        path: wc_path.to_string(),
                        parent_token: parent_token.to_string(),
                        token: token.to_string(),
                        rev: None,
                        copy,
                        rev_props,
                    },
                    close,
                });
                // An add always produces output.
                self.get_writer().await?;
                Ok(base)
            }
        }
    }

    async fn copy_from(&self, new: &FileEntry<'r>) -> Result<Option<CopyFrom>> {
        if !self.params.send_copyfrom {
            return Ok(None);
        }
        let found =
            history::copy_from(self.repo, self.branch, new.path(), self.target_rev).await?;
        match found {
            Some(copy) if copy.revision >= self.low_water => Ok(Some(copy)),
            _ => Ok(None),
        }
    }

    async fn update_props(
        &mut self,
        kind: &'static str,
        token: &str,
        old: &Option<FileEntry<'r>>,
        new: &FileEntry<'r>,
    ) -> Result<()> {
        let old_props = match old {
            Some(entry) => entry.properties().await?,
            None => Vec::new(),
        };
        let new_props = new.properties().await?;
        let diff = props_diff(&old_props, &new_props);
        if old.is_none() {
            self.get_writer().await?;
        }
        for (name, value) in &diff {
            let writer = self.get_writer().await?;
            change_prop(writer, kind, token, name, value.as_deref());
        }
        Ok(())
    }

    async fn remove_entry(&mut self, wc_path: &str, rev: u64, parent_token: &str) -> Result<()> {
        if self.deleted.contains(wc_path) {
            return Ok(());
        }
        let writer = self.get_writer().await?;
        writer
            .list_begin()
            .word("delete-entry")
            .list_begin()
            .string(wc_path)
            .list_begin()
            .number(rev)
            .list_end()
            .string(parent_token)
            .list_end()
            .list_end();
        Ok(())
    }
}

fn change_prop<W: AsyncWrite + Unpin>(
    writer: &mut SvnWriter<W>,
    kind: &str,
    token: &str,
    name: &str,
    value: Option<&str>,
) {
    writer
        .list_begin()
        .word(&format!("change-{kind}-prop"))
        .list_begin()
        .string(token)
        .string(name)
        .list_begin()
        .string_opt(value)
        .list_end()
        .list_end()
        .list_end();
}

/// Property diff: removed keys map to `None`.
fn props_diff(
    old: &[(String, String)],
    new: &[(String, String)],
) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for (name, old_value) in old {
        let new_value = new.iter().find(|(n, _)| n == name).map(|(_, v)| v);
        if new_value != Some(old_value) {
            out.push((name.clone(), new_value.cloned()));
        }
    }
    for (name, new_value) in new {
        if !old.iter().any(|(n, _)| n == name) {
            out.push((name.clone(), Some(new_value.clone())));
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Equality for the skip test: same object, mode and resolved properties.
async fn entries_equal(
    old: &Option<FileEntry<'_>>,
    new: &FileEntry<'_>,
) -> Result<bool> {
    let Some(old) = old else {
        return Ok(false);
    };
    if old.object_id() != new.object_id() || old.mode() != new.mode() {
        return Ok(false);
    }
    Ok(old.properties().await? == new.properties().await?)
}

/// Replay one revision as an editor stream: used by `replay` and
/// `replay-range`.
pub async fn replay_revision<R, W>(
    session: &mut Session<R, W>,
    rev: u64,
    low_water: u64,
    send_deltas: bool,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let params = DeltaParams {
        command: DeltaCommand::Replay,
        target: String::new(),
        rev: Some(rev),
        depth: Depth::Infinity,
        send_copyfrom: session.repo().has_rename_detection(),
        switch_url: None,
        text_deltas: send_deltas,
        include_internal_props: false,
        low_water: Some(low_water),
    };
    let mut pipeline = ReportPipeline::new(params);
    pipeline.set_path(
        "",
        SetPathArgs {
            rev: rev.saturating_sub(1),
            start_empty: rev == 0,
            depth: Depth::Infinity,
            link_path: None,
        },
    );
    pipeline.send_delta(session).await?;
    session
        .writer
        .list_begin()
        .word("close-edit")
        .list_begin()
        .list_end()
        .list_end();
    session
        .writer
        .list_begin()
        .word("finish-replay")
        .list_begin()
        .list_end()
        .list_end();
    session.writer.flush().await?;
    Ok(())
}
