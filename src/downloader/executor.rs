//! Transfer program supervision
//!
//! The bytes are moved by an external program (aria2c or the Google Drive
//! helper). This module spawns it, relays its output to the log, and turns
//! its exit status into a job outcome. Cancellation kills the child and waits
//! for it before reporting failure.

use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{ChildStderr, ChildStdout, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use super::events::EventNotifier;
use super::history::History;
use super::models::{DownloadEvent, Job, JobStatus, Outcome};
use super::provider::TransferPlan;

/// How long output may keep flowing once the transfer program has exited
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

pub struct TransferExecutor {
    history: Arc<History>,
    notifier: Arc<dyn EventNotifier>,
}

impl TransferExecutor {
    pub fn new(history: Arc<History>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self { history, notifier }
    }

    /// Run one transfer to completion and record the result.
    ///
    /// Must be called only once the caller holds a worker slot: the job is
    /// marked `DOWNLOADING` before anything else happens.
    #[instrument(name = "transfer", level = "debug", skip_all, fields(id = %job.id, provider = plan.provider))]
    pub async fn execute(
        &self,
        job: &Job,
        plan: &TransferPlan,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.history.update_status(&job.id, JobStatus::Downloading);
        self.notifier
            .broadcast(DownloadEvent::new(job, JobStatus::Downloading));
        info!(name = %job.name, destination = ?plan.destination, "Starting download");

        let outcome = run_transfer(&job.id, plan, cancel).await;

        let status = JobStatus::from(outcome);
        self.history.update_status(&job.id, status);
        self.notifier.broadcast(DownloadEvent::new(job, status));
        match outcome {
            Outcome::Completed => info!(name = %job.name, "Download completed"),
            Outcome::Failed => error!(name = %job.name, "Download failed"),
        }
        outcome
    }
}

/// Spawn the planned program and wait for it, or kill it on cancellation.
pub async fn run_transfer(id: &str, plan: &TransferPlan, cancel: &CancellationToken) -> Outcome {
    if cancel.is_cancelled() {
        warn!("Download cancelled before starting");
        return Outcome::Failed;
    }

    if let Err(e) = tokio::fs::create_dir_all(&plan.destination).await {
        error!(error = %e, destination = ?plan.destination, "Failed to create destination directory");
        return Outcome::Failed;
    }

    // Arguments may carry auth tokens, only the program name is logged.
    debug!(program = %plan.program, args = plan.args.len(), "Spawning transfer program");
    let mut child = match Command::new(&plan.program)
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!(error = %e, program = %plan.program, "Failed to spawn transfer program");
            return Outcome::Failed;
        }
    };

    // Relays run on their own task: a descendant may hold the pipes open
    // after the child itself has exited.
    let mut relay = tokio::spawn(
        relay_all(id.to_string(), child.stdout.take(), child.stderr.take())
            .in_current_span(),
    );

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let outcome = match finished {
        Some(Ok(status)) if status.success() => Outcome::Completed,
        Some(Ok(status)) => {
            error!(code = ?status.code(), "Transfer program exited with failure");
            Outcome::Failed
        }
        Some(Err(e)) => {
            error!(error = %e, "Failed to wait for transfer program");
            Outcome::Failed
        }
        None => {
            warn!("Download cancelled, stopping transfer program");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill transfer program");
            }
            Outcome::Failed
        }
    };

    if tokio::time::timeout(OUTPUT_DRAIN, &mut relay).await.is_err() {
        debug!("Transfer output still open after exit, detaching");
        relay.abort();
    }
    outcome
}

async fn relay_all(
    id: String,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) {
    tokio::join!(relay_output(&id, stdout), relay_output(&id, stderr));
}

/// Forward each line the child writes to the log until the pipe closes.
async fn relay_output<R: AsyncRead + Unpin>(id: &str, stream: Option<R>) {
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    info!(target: "transfer", id, "{line}");
                }
            }
            Err(e) => {
                debug!(error = %e, "Transfer output closed");
                break;
            }
        }
    }
}
