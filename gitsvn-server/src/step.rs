//! Pending session steps
//!
//! Multi-round commands park their continuation here instead of blocking
//! the reader: the session loop drains the step stack before reading the
//! next command, so report sub-commands interleave cleanly with the
//! outbound stream.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::reporter::ReportPipeline;
use crate::session::{Result, Session};

/// One parked continuation.
pub enum Step {
    /// Read the next report sub-command for a pending delta pipeline.
    ReportCommand(ReportPipeline),
    /// Report finished: permission gate, then compute and stream the delta.
    FinishReport(ReportPipeline),
}

impl Step {
    pub async fn process<R, W>(self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + Sync,
    {
        match self {
            Step::ReportCommand(pipeline) => pipeline.read_report_command(session).await,
            Step::FinishReport(pipeline) => pipeline.finish(session).await,
        }
    }
}
