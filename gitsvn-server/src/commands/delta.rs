//! Report-driven commands: update, switch, status, diff, replay
//!
//! ```text
//! update
//!    params: ( [ rev:number ] target:string recurse:bool ? depth:word
//!              send-copyfrom-args:bool ? ignore-ancestry:bool )
//! switch
//!    params: ( [ rev:number ] target:string recurse:bool url:string
//!              ? depth:word ? send-copyfrom-args:bool ? ignore-ancestry:bool )
//! status
//!    params: ( target:string recurse:bool ? [ rev:number ] ? depth:word )
//! diff
//!    params: ( [ rev:number ] target:string recurse:bool ignore-ancestry:bool
//!              url:string ? text-deltas:bool ? depth:word )
//! replay
//!    params: ( revision:number low-water-mark:number send-deltas:bool )
//! replay-range
//!    params: ( start-rev:number end-rev:number low-water-mark:number
//!              send-deltas:bool )
//! ```
//!
//! The four report commands answer nothing up front; they push a report
//! step and the real response happens after `finish-report`.

use tokio::io::{AsyncRead, AsyncWrite};

use gitsvn_core::error::codes;
use gitsvn_core::SvnError;
use gitsvn_protocol::ItemReader;

use crate::depth::Depth;
use crate::reporter::{self, DeltaCommand, DeltaParams, ReportPipeline};
use crate::session::{Result, Session};
use crate::step::Step;

fn depth_or(reader: &mut ItemReader<'_>, recurse: bool) -> Depth {
    match reader.read_trailing_string().unwrap_or(None) {
        Some(word) => Depth::parse(&word),
        None if recurse => Depth::Infinity,
        None => Depth::Files,
    }
}

pub async fn update<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let rev = params.read_optional_number().unwrap_or(None);
    let target = params.read_string()?;
    let recurse = params.read_bool()?;
    let depth = depth_or(params, recurse);
    let send_copyfrom = params.read_trailing_bool().unwrap_or(None).unwrap_or(false)
        && session.repo().has_rename_detection();

    let pipeline = ReportPipeline::new(DeltaParams {
        command: DeltaCommand::Update,
        target,
        rev,
        depth,
        send_copyfrom,
        switch_url: None,
        text_deltas: true,
        include_internal_props: true,
        low_water: None,
    });
    session.push_step(Step::ReportCommand(pipeline));
    Ok(())
}

pub async fn switch<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let rev = params.read_optional_number().unwrap_or(None);
    let target = params.read_string()?;
    let recurse = params.read_bool()?;
    let url = params.read_string()?;
    let depth = depth_or(params, recurse);

    let switch_path = session.path_from_url(&url)?;
    let pipeline = ReportPipeline::new(DeltaParams {
        command: DeltaCommand::Switch,
        target,
        rev,
        depth,
        send_copyfrom: false,
        switch_url: Some(switch_path),
        text_deltas: true,
        include_internal_props: true,
        low_water: None,
    });
    session.push_step(Step::ReportCommand(pipeline));
    Ok(())
}

pub async fn status<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let target = params.read_string()?;
    let recurse = params.read_bool()?;
    let rev = params.read_optional_number().unwrap_or(None);
    let depth = depth_or(params, recurse);

    let pipeline = ReportPipeline::new(DeltaParams {
        command: DeltaCommand::Status,
        target,
        rev,
        depth,
        send_copyfrom: false,
        switch_url: None,
        text_deltas: false,
        include_internal_props: false,
        low_water: None,
    });
    session.push_step(Step::ReportCommand(pipeline));
    Ok(())
}

pub async fn diff<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let rev = params.read_optional_number().unwrap_or(None);
    let target = params.read_string()?;
    let recurse = params.read_bool()?;
    let _ignore_ancestry = params.read_bool()?;
    let url = params.read_string()?;
    let text_deltas = params.read_trailing_bool().unwrap_or(None).unwrap_or(true);
    let depth = depth_or(params, recurse);

    let switch_path = session.path_from_url(&url)?;
    let pipeline = ReportPipeline::new(DeltaParams {
        command: DeltaCommand::Diff,
        target,
        rev,
        depth,
        send_copyfrom: false,
        switch_url: Some(switch_path),
        text_deltas,
        include_internal_props: false,
        low_water: None,
    });
    session.push_step(Step::ReportCommand(pipeline));
    Ok(())
}

pub async fn replay<R, W>(session: &mut Session<R, W>, params: &mut ItemReader<'_>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let rev = params.read_number()?;
    let low_water = params.read_number()?;
    let send_deltas = params.read_bool()?;

    session.check_read(session.parent())?;
    let latest = session.latest_revision().await?;
    if rev > latest {
        return Err(SvnError::no_such_revision(rev).into());
    }
    reporter::replay_revision(session, rev, low_water, send_deltas).await?;
    session.send_success_empty().await
}

pub async fn replay_range<R, W>(
    session: &mut Session<R, W>,
    params: &mut ItemReader<'_>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let start_rev = params.read_number()?;
    let end_rev = params.read_number()?;
    let low_water = params.read_number()?;
    let send_deltas = params.read_bool()?;

    if start_rev > end_rev {
        return Err(SvnError::new(
            codes::BASE,
            format!("Invalid revision range: start: {start_rev}, end {end_rev}"),
        )
        .into());
    }
    session.check_read(session.parent())?;
    let latest = session.latest_revision().await?;
    if end_rev > latest {
        return Err(SvnError::no_such_revision(end_rev).into());
    }

    let repo = session.repo_arc();
    for rev in start_rev..=end_rev {
        let branch = repo.branch(session.branch_name())?;
        let view = repo.view(branch, rev).await?;
        let props = view.properties();
        session
            .writer
            .list_begin()
            .word("revprops")
            .map(props.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .list_end();
        reporter::replay_revision(session, rev, low_water, send_deltas).await?;
    }
    session.send_success_empty().await
}
