//! Command registry and dispatch
//!
//! Every command arrives as `( word ( args... ) )`; the session loop has
//! already consumed the frame, so dispatch unwraps the argument tuple,
//! runs the command's permission check and then its handler. Unknown words
//! answer with the unknown-command code and the session continues.

pub mod delta;
pub mod info;
pub mod locks;
pub mod log;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use gitsvn_core::error::codes;
use gitsvn_core::SvnError;
use gitsvn_protocol::{Item, ItemReader};

use crate::session::{Result, Session};

pub async fn dispatch<R, W>(
    session: &mut Session<R, W>,
    cmd: &str,
    args: &[Item],
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let mut outer = ItemReader::new(args);
    let mut params = match outer.read_list() {
        Ok(reader) => reader,
        // Tolerate a bare argument form for unknown commands.
        Err(_) => ItemReader::new(args),
    };

    match cmd {
        "get-latest-rev" => info::get_latest_rev(session, &mut params).await,
        "get-dated-rev" => info::get_dated_rev(session, &mut params).await,
        "check-path" => info::check_path(session, &mut params).await,
        "stat" => info::stat(session, &mut params).await,
        "get-dir" => info::get_dir(session, &mut params).await,
        "get-file" => info::get_file(session, &mut params).await,
        "get-iprops" => info::get_iprops(session, &mut params).await,
        "reparent" => info::reparent(session, &mut params).await,
        "rev-prop" => info::rev_prop(session, &mut params).await,
        "rev-proplist" => info::rev_proplist(session, &mut params).await,
        "log" => log::log(session, &mut params).await,
        "get-locations" => log::get_locations(session, &mut params).await,
        "get-location-segments" => log::get_location_segments(session, &mut params).await,
        "lock" => locks::lock(session, &mut params).await,
        "lock-many" => locks::lock_many(session, &mut params).await,
        "unlock" => locks::unlock(session, &mut params).await,
        "unlock-many" => locks::unlock_many(session, &mut params).await,
        "get-lock" => locks::get_lock(session, &mut params).await,
        "get-locks" => locks::get_locks(session, &mut params).await,
        "update" => delta::update(session, &mut params).await,
        "switch" => delta::switch(session, &mut params).await,
        "status" => delta::status(session, &mut params).await,
        "diff" => delta::diff(session, &mut params).await,
        "replay" => delta::replay(session, &mut params).await,
        "replay-range" => delta::replay_range(session, &mut params).await,
        "commit" => crate::editor::commit(session, &mut params).await,
        _ => {
            warn!(command = %cmd, "unsupported command");
            let err = SvnError::new(
                codes::RA_SVN_UNKNOWN_CMD,
                format!("Unsupported command: {cmd}"),
            );
            session.send_failure(&err).await?;
            Ok(())
        }
    }
}
