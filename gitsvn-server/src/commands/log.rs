//! History commands: log, get-locations, get-location-segments
//!
//! All three stream entries ahead of the final response, terminated by the
//! bare word `done`.

use tokio::io::{AsyncRead, AsyncWrite};

use gitsvn_core::error::codes;
use gitsvn_core::{history, paths, store, SvnError};
use gitsvn_protocol::ItemReader;

use crate::session::{Result, Session};

/// ```text
/// log
///    params:   ( ( target-path:string ... ) ( start-rev:number )
///                ( end-rev:number ) changed-paths:bool strict-node:bool
///                ? limit:number ? include-merged-revisions:bool )
///    Before sending response, server sends log entries, ending with "done".
/// ```
pub async fn log<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    session.check_read(session.parent())?;
    let targets = params.read_string_list()?;
    let start = params.read_optional_number().unwrap_or(None);
    let end = params.read_optional_number().unwrap_or(None);
    let changed_paths = params.read_bool().unwrap_or(false);
    let _strict_node = params.read_bool().unwrap_or(false);
    let limit = params.read_trailing_number().unwrap_or(None).unwrap_or(0);

    let latest = session.latest_revision().await?;
    let start = start.unwrap_or(latest).min(latest);
    let end = end.unwrap_or(0).min(latest);

    let full_targets: Vec<String> = targets
        .iter()
        .map(|target| session.repository_path(target))
        .collect();

    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;

    let revs: Vec<u64> = if start >= end {
        (end..=start).rev().collect()
    } else {
        (start..=end).collect()
    };

    let mut sent = 0u64;
    for rev in revs {
        let commit_id = repo.commit_id_at(branch, rev).await?;
        let commit = store::load_commit(repo.store(), commit_id).await?;
        let parent_tree = match commit.first_parent() {
            Some(parent_id) => Some(store::load_commit(repo.store(), parent_id).await?.tree),
            None => None,
        };
        let diff = history::diff_trees(&repo, parent_tree, Some(commit.tree)).await?;

        if !full_targets.is_empty()
            && !diff.iter().any(|entry| {
                full_targets.iter().any(|target| {
                    paths::is_ancestor(target, &entry.path)
                        || paths::is_ancestor(&entry.path, target)
                })
            })
        {
            continue;
        }

        session.writer.list_begin().list_begin();
        if changed_paths {
            for entry in &diff {
                if !session.can_read(&entry.path) {
                    continue;
                }
                session
                    .writer
                    .list_begin()
                    .string(&format!("/{}", entry.path))
                    .word(&entry.action().to_string());
                if entry.action() == 'A' {
                    if let Some(copy) =
                        history::copy_from(&repo, branch, &entry.path, rev).await?
                    {
                        session
                            .writer
                            .string(&format!("/{}", copy.path))
                            .number(copy.revision);
                    }
                }
                session.writer.list_end();
            }
        }
        session
            .writer
            .list_end()
            .number(rev)
            .list_begin()
            .string(&commit.author)
            .list_end()
            .list_begin()
            .string(&commit.date_string())
            .list_end()
            .list_begin()
            .string(&commit.message)
            .list_end()
            .bool(false)
            .bool(false)
            .number(0)
            .list_begin()
            .list_end()
            .list_end();
        session.writer.flush().await?;

        sent += 1;
        if limit > 0 && sent >= limit {
            break;
        }
    }

    session.writer.word("done");
    session.send_success_empty().await
}

/// ```text
/// get-locations
///    params:   ( path:string peg-rev:number ( rev:number ... ) )
///    location-entry: ( rev:number abs-path:string ) | done
/// ```
pub async fn get_locations<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let peg_rev = params.read_number()?;
    let loc_revs = params.read_number_list()?;
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;
    session.latest_revision().await?;

    let segments = trace_segments(session, &full_path, peg_rev, 0).await?;
    for loc_rev in loc_revs {
        let found = segments
            .iter()
            .find(|segment| segment.min_rev <= loc_rev && loc_rev <= segment.max_rev);
        if let Some(segment) = found {
            session
                .writer
                .list_begin()
                .number(loc_rev)
                .string(&format!("/{}", segment.path))
                .list_end();
        }
    }
    session.writer.word("done");
    session.send_success_empty().await
}

/// ```text
/// get-location-segments
///    params:   ( path:string [ peg-rev:number ] [ start-rev:number ]
///                [ end-rev:number ] )
///    location-entry: ( range-start:number range-end:number
///                      [ abs-path:string ] ) | done
/// ```
pub async fn get_location_segments<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let peg = params.read_optional_number().unwrap_or(None);
    let start = params.read_optional_number().unwrap_or(None);
    let end = params.read_optional_number().unwrap_or(None);

    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;
    let latest = session.latest_revision().await?;

    let end_rev = end.unwrap_or(0);
    let peg_rev = peg.unwrap_or(latest);
    let start_rev = start.unwrap_or(peg_rev);
    if end_rev > start_rev || start_rev > peg_rev {
        session.writer.word("done");
        return Err(SvnError::new(
            codes::BASE,
            format!("Invalid revision range: peg: {peg_rev}, start: {start_rev}, end {end_rev}"),
        )
        .into());
    }

    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    if history::last_change(&repo, branch, &full_path, peg_rev)
        .await?
        .is_none()
    {
        session.writer.word("done");
        return Err(SvnError::new(
            codes::FS_NOT_FOUND,
            format!("File not found: {full_path}@{peg_rev}"),
        )
        .into());
    }

    let segments = trace_segments(session, &full_path, peg_rev, end_rev).await?;
    for segment in &segments {
        if segment.min_rev <= start_rev {
            session
                .writer
                .list_begin()
                .number(segment.min_rev.max(end_rev))
                .number(segment.max_rev.min(start_rev))
                .list_begin()
                .string(&segment.path)
                .list_end()
                .list_end();
        }
    }
    session.writer.word("done");
    session.send_success_empty().await
}

/// One identity era of a path across renames.
struct Segment {
    path: String,
    min_rev: u64,
    max_rev: u64,
}

/// Walk the copy-from chain from `path@peg` down to `floor`.
async fn trace_segments<R, W>(
    session: &Session<R, W>,
    path: &str,
    peg_rev: u64,
    floor: u64,
) -> Result<Vec<Segment>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;

    let mut segments = Vec::new();
    let mut path = path.to_string();
    let mut max_rev = peg_rev;
    loop {
        // Era start: jump back through changes while the entry exists.
        let mut min_rev = max_rev;
        while min_rev > 0 {
            if history::entry_sig(&repo, branch, min_rev - 1, &path)
                .await?
                .is_none()
            {
                break;
            }
            match history::last_change(&repo, branch, &path, min_rev - 1).await? {
                Some(change) => min_rev = change,
                None => break,
            }
        }
        segments.push(Segment {
            path: path.clone(),
            min_rev,
            max_rev,
        });
        if min_rev <= floor {
            break;
        }
        match history::copy_from(&repo, branch, &path, min_rev).await? {
            Some(copy) => {
                max_rev = copy.revision;
                path = copy.path;
            }
            None => break,
        }
    }
    Ok(segments)
}
