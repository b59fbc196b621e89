//! Single-round informational commands
//!
//! Wire shapes follow the protocol's established grammar, e.g.
//!
//! ```text
//! check-path
//!    params:   ( path:string [ rev:number ] )
//!    response: ( kind:node-kind )
//! stat
//!    params:   ( path:string [ rev:number ] )
//!    response: ( ? entry:dirent )
//! ```

use tokio::io::{AsyncRead, AsyncWrite};

use gitsvn_core::error::codes;
use gitsvn_core::revision::NodeKind;
use gitsvn_core::{parse_svn_date, paths, SvnError};
use gitsvn_protocol::ItemReader;

use crate::session::{Result, Session};

pub async fn get_latest_rev<R, W>(
    session: &mut Session<R, W>,
    _params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    session.check_read(session.parent())?;
    let rev = session.latest_revision().await?;
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .number(rev)
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}

pub async fn get_dated_rev<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    session.check_read(session.parent())?;
    let date = params.read_string()?;
    let timestamp = parse_svn_date(&date)
        .ok_or_else(|| SvnError::new(codes::BASE, format!("Invalid date: {date}")))?;
    session.latest_revision().await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let rev = repo.revision_by_date(branch, timestamp).await?;
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .number(rev)
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}

pub async fn check_path<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let rev = session.revision_or_latest(rev).await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let kind = match view.file(&full_path).await? {
        Some(entry) => entry.kind(),
        None => NodeKind::None,
    };
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .word(kind.word())
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}

pub async fn stat<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let rev = session.revision_or_latest(rev).await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let Some(entry) = view.file(&full_path).await? else {
        return Err(SvnError::new(codes::ILLEGAL_TARGET, "File not found").into());
    };
    let size = entry.size().await?;
    let has_props = !entry.properties().await?.is_empty();
    let change = entry.last_change().await?;
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .list_begin()
        .list_begin()
        .word(entry.kind().word())
        .number(size)
        .bool(has_props)
        .number(change.revision)
        .list_begin()
        .string(&change.date)
        .list_end()
        .list_begin()
        .string(&change.author)
        .list_end()
        .list_end()
        .list_end()
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}

/// ```text
/// get-dir
///    params:   ( path:string [ rev:number ] want-props:bool
///                want-contents:bool ? ( field:dirent-field ... ) )
///    response: ( rev:number ( props ) ( entry:dirent ... ) )
/// ```
pub async fn get_dir<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let want_props = params.read_bool().unwrap_or(true);
    let want_contents = params.read_bool().unwrap_or(true);
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let rev = session.revision_or_latest(rev).await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let Some(dir) = view.file(&full_path).await? else {
        return Err(SvnError::not_found(&full_path).into());
    };
    if !dir.is_dir() {
        return Err(SvnError::new(
            codes::FS_NOT_DIRECTORY,
            format!("Path is not a directory: /{full_path}"),
        )
        .into());
    }

    let props = if want_props {
        dir.properties().await?
    } else {
        Vec::new()
    };
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .number(rev)
        .map(props.iter().map(|(n, v)| (n.as_str(), v.as_str())));

    session.writer.list_begin();
    if want_contents {
        for entry in dir.entries().await? {
            if !session.can_read(entry.path()) {
                continue;
            }
            let size = entry.size().await?;
            let has_props = !entry.properties().await?.is_empty();
            let change = entry.last_change().await?;
            session
                .writer
                .list_begin()
                .string(entry.file_name())
                .word(entry.kind().word())
                .number(size)
                .bool(has_props)
                .number(change.revision)
                .list_begin()
                .string(&change.date)
                .list_end()
                .list_begin()
                .string(&change.author)
                .list_end()
                .list_end();
        }
    }
    session.writer.list_end().list_end().list_end();
    Ok(session.writer.flush().await?)
}

/// ```text
/// get-file
///    params:   ( path:string [ rev:number ] want-props:bool
///                want-contents:bool )
///    response: ( [ md5:string ] rev:number ( props ) )
///    If want-contents: contents follow as string chunks ended by an empty
///    string, then the final ( success ( ) ).
/// ```
pub async fn get_file<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let want_props = params.read_bool().unwrap_or(true);
    let want_contents = params.read_bool().unwrap_or(false);
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let rev = session.revision_or_latest(rev).await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let Some(file) = view.file(&full_path).await? else {
        return Err(SvnError::not_found(&full_path).into());
    };
    if file.is_dir() {
        return Err(SvnError::new(
            codes::FS_NOT_FILE,
            format!("Path is not a file: /{full_path}"),
        )
        .into());
    }

    let md5 = file.md5().await?;
    let props = if want_props {
        file.properties().await?
    } else {
        Vec::new()
    };
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .list_begin()
        .string(&md5)
        .list_end()
        .number(rev)
        .map(props.iter().map(|(n, v)| (n.as_str(), v.as_str())))
        .list_end()
        .list_end();

    if want_contents {
        let content = file.content().await?;
        for chunk in content.chunks(64 * 1024) {
            session.writer.binary(chunk);
            session.writer.flush().await?;
        }
        session.writer.binary(b"");
        session
            .writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_end()
            .list_end();
    }
    Ok(session.writer.flush().await?)
}

/// Inherited properties: every ancestor directory with versioned props.
pub async fn get_iprops<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let path = params.read_string()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let full_path = session.repository_path(&path);
    session.check_read(&full_path)?;

    let rev = session.revision_or_latest(rev).await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;

    // Ancestors root-first, excluding the path itself.
    let mut ancestors = vec![String::new()];
    let mut walked = String::new();
    for segment in full_path.split('/').filter(|s| !s.is_empty()) {
        walked = paths::join(&walked, segment);
        if walked != full_path {
            ancestors.push(walked.clone());
        }
    }

    session.writer.list_begin().word("success").list_begin().list_begin();
    for ancestor in ancestors {
        let Some(dir) = view.file(&ancestor).await? else {
            continue;
        };
        let props = dir.properties().await?;
        if props.is_empty() {
            continue;
        }
        session
            .writer
            .list_begin()
            .string(&ancestor)
            .map(props.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .list_end();
    }
    session.writer.list_end().list_end().list_end();
    Ok(session.writer.flush().await?)
}

pub async fn reparent<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let url = params.read_string()?;
    session.set_parent_from_url(&url)?;
    session.check_read(session.parent())?;
    session.send_success_empty().await
}

/// ```text
/// rev-prop
///    params:   ( rev:number name:string )
///    response: ( [ value:string ] )
/// ```
pub async fn rev_prop<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    session.check_read(session.parent())?;
    let rev = params.read_number()?;
    let name = params.read_string()?;
    session.latest_revision().await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let value = view
        .properties()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v);
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .list_begin()
        .string_opt(value.as_deref())
        .list_end()
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}

pub async fn rev_proplist<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    session.check_read(session.parent())?;
    let rev = params.read_number()?;
    session.latest_revision().await?;
    let repo = session.repo_arc();
    let branch = repo.branch(session.branch_name())?;
    let view = repo.view(branch, rev).await?;
    let props = view.properties();
    session
        .writer
        .list_begin()
        .word("success")
        .list_begin()
        .map(props.iter().map(|(n, v)| (n.as_str(), v.as_str())))
        .list_end()
        .list_end();
    Ok(session.writer.flush().await?)
}
