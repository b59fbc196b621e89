//! Lock commands
//!
//! ```text
//! lock
//!    params:    ( path:string [ comment:string ] steal-lock:bool
//!                 [ current-rev:number ] )
//!    response:  ( lock:lockdesc )
//! ```
//!
//! The `-many` variants stream one result per target, then `done`, then the
//! command response.

use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

use gitsvn_core::locks::{LockDesc, LockTarget};
use gitsvn_core::history;
use gitsvn_protocol::{ItemReader, SvnWriter};

use crate::session::{Result, Session};

fn write_lock_desc<W: tokio::io::AsyncWrite + Unpin>(writer: &mut SvnWriter<W>, desc: &LockDesc) {
    writer
        .list_begin()
        .string(&format!("/{}", desc.path))
        .string(&desc.token)
        .string(&desc.owner)
        .list_begin()
        .string_opt(desc.comment.as_deref())
        .list_end()
        .string(&desc.created_string())
        .list_begin()
        .list_end()
        .list_end();
}

/// Newest change per target path, used for the stale-revision check; absent
/// paths map to `None` so the registry rejects them.
async fn last_changes<R, W>(
    session: &Session<R, W>,
    paths: &[String],
) -> Result<HashMap<String, Option<u64>>>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    repo.update_revisions(branch).await?;
    let head = repo.latest_revision(branch).await;
    let mut out = HashMap::new();
    for path in paths {
        let value = match history::entry_sig(&repo, branch, head, path).await? {
            Some(_) => history::last_change(&repo, branch, path, head).await?,
            None => None,
        };
        out.insert(path.clone(), value);
    }
    Ok(out)
}

pub async fn lock<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let comment = params.read_optional_string().unwrap_or(None);
    let steal = params.read_bool()?;
    let current_rev = params.read_optional_number().unwrap_or(None);

    let full_path = session.repository_path(&path);
    session.check_write(&full_path)?;

    let changes = last_changes(session, std::slice::from_ref(&full_path)).await?;
    let target = LockTarget {
        path: full_path.clone(),
        current_rev,
    };
    let granted = session.repo().locks().lock(
        session.user(),
        session.branch_name(),
        comment.as_deref(),
        steal,
        std::slice::from_ref(&target),
        |p| Ok(changes.get(p).copied().flatten()),
    )?;

    session.writer.list_begin().word("success").list_begin();
    write_lock_desc(&mut session.writer, &granted[0]);
    session.writer.list_end().list_end();
    Ok(session.writer.flush().await?)
}

/// ```text
/// lock-many
///    params:    ( [ comment:string ] steal-lock:bool
///                 ( ( path:string [ current-rev:number ] ) ... ) )
/// ```
pub async fn lock_many<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let comment = params.read_optional_string().unwrap_or(None);
    let steal = params.read_bool()?;
    let mut targets = Vec::new();
    let mut list = params.read_list()?;
    while !list.at_end() {
        let mut pair = list.read_list()?;
        let path = pair.read_string()?;
        let current_rev = if pair.at_end() {
            None
        } else {
            pair.read_optional_number().unwrap_or(None)
        };
        targets.push((session.repository_path(&path), current_rev));
    }

    let all_paths: Vec<String> = targets.iter().map(|(p, _)| p.clone()).collect();
    let changes = last_changes(session, &all_paths).await?;

    for (path, current_rev) in targets {
        if let Err(err) = session.check_write(&path) {
            write_lock_failure(session, err).await?;
            continue;
        }
        let target = LockTarget {
            path: path.clone(),
            current_rev,
        };
        let result = session.repo().locks().lock(
            session.user(),
            session.branch_name(),
            comment.as_deref(),
            steal,
            std::slice::from_ref(&target),
            |p| Ok(changes.get(p).copied().flatten()),
        );
        match result {
            Ok(granted) => {
                session.writer.list_begin().word("success").list_begin();
                write_lock_desc(&mut session.writer, &granted[0]);
                session.writer.list_end().list_end();
            }
            Err(err) => write_lock_failure(session, err.into()).await?,
        }
        session.writer.flush().await?;
    }
    session.writer.word("done");
    session.send_success_empty().await
}

async fn write_lock_failure<R, W>(
    session: &mut Session<R, W>,
    err: crate::session::ServerError,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let err = match err {
        crate::session::ServerError::Svn(err) => err,
        crate::session::ServerError::Protocol(err) => return Err(err.into()),
    };
    session
        .writer
        .list_begin()
        .word("failure")
        .list_begin()
        .list_begin()
        .number(err.code as u64)
        .string(&err.message)
        .string("")
        .number(0)
        .list_end()
        .list_end()
        .list_end();
    Ok(())
}

pub async fn unlock<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let token = params.read_optional_string().unwrap_or(None);
    let break_lock = params.read_bool()?;

    let full_path = session.repository_path(&path);
    session.check_write(&full_path)?;
    session
        .repo()
        .locks()
        .unlock(session.user(), break_lock, &[(full_path, token)])?;
    session.send_success_empty().await
}

/// ```text
/// unlock-many
///    params:    ( break-lock:bool ( ( path:string [ token:string ] ) ... ) )
/// ```
pub async fn unlock_many<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let break_lock = params.read_bool()?;
    let mut targets = Vec::new();
    let mut list = params.read_list()?;
    while !list.at_end() {
        let mut pair = list.read_list()?;
        let path = pair.read_string()?;
        let token = if pair.at_end() {
            None
        } else {
            pair.read_optional_string().unwrap_or(None)
        };
        targets.push((session.repository_path(&path), token));
    }

    for (path, token) in targets {
        let result = session
            .check_write(&path)
            .and_then(|()| {
                Ok(session.repo().locks().unlock(
                    session.user(),
                    break_lock,
                    std::slice::from_ref(&(path.clone(), token.clone())),
                )?)
            });
        match result {
            Ok(()) => {
                session
                    .writer
                    .list_begin()
                    .word("success")
                    .list_begin()
                    .string(&format!("/{path}"))
                    .list_end()
                    .list_end();
            }
            Err(err) => write_lock_failure(session, err).await?,
        }
        session.writer.flush().await?;
    }
    session.writer.word("done");
    session.send_success_empty().await
}

pub async fn get_lock<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let desc = session.repo().locks().get(&full_path);
    session.writer.list_begin().word("success").list_begin().list_begin();
    if let Some(desc) = &desc {
        write_lock_desc(&mut session.writer, desc);
    }
    session.writer.list_end().list_end().list_end();
    Ok(session.writer.flush().await?)
}

pub async fn get_locks<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let descs = session.repo().locks().list(&full_path);
    session.writer.list_begin().word("success").list_begin().list_begin();
    for desc in &descs {
        write_lock_desc(&mut session.writer, desc);
    }
    session.writer.list_end().list_end().list_end();
    Ok(session.writer.flush().await?)
}
