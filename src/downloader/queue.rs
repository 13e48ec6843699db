//! Download queue management
//!
//! Submissions are deduplicated against the history and pushed onto a job
//! queue. A fixed number of workers pull from that queue, so the number of
//! transfer programs running at once never exceeds the worker count no
//! matter whether a job came from a single request, a retry, or a pack.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, info, instrument, span, warn};
use url::Url;

use super::events::EventNotifier;
use super::executor::TransferExecutor;
use super::history::{Admission, History};
use super::models::{
    Category, DownloadEvent, FilenamePolicy, Job, JobStatus, Outcome, SubmitOutcome,
};
use super::pack::{PackReport, PackRequest, fetch_manifest};
use super::provider::Planner;
use super::{DownloadError, Result};

/// Transfers allowed to run at the same time
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Jobs that may wait for a worker before submitters have to wait too
const QUEUE_CAPACITY: usize = 1024;

struct QueuedJob {
    job: Job,
    policy: FilenamePolicy,
    done: Option<oneshot::Sender<Outcome>>,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<QueuedJob>>>;

pub struct DownloadQueue {
    history: Arc<History>,
    notifier: Arc<dyn EventNotifier>,
    planner: Arc<Planner>,
    client: reqwest::Client,
    tx: mpsc::Sender<QueuedJob>,
    rx: SharedReceiver,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency: usize,
}

impl DownloadQueue {
    /// Start a queue with `concurrency` workers. Must be called inside a tokio runtime.
    pub fn new(
        planner: Planner,
        history: Arc<History>,
        notifier: Arc<dyn EventNotifier>,
        concurrency: usize,
    ) -> Self {
        Self::with_queue_capacity(planner, history, notifier, concurrency, QUEUE_CAPACITY)
    }

    fn with_queue_capacity(
        planner: Planner,
        history: Arc<History>,
        notifier: Arc<dyn EventNotifier>,
        concurrency: usize,
        capacity: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx: SharedReceiver = Arc::new(AsyncMutex::new(rx));
        let planner = Arc::new(planner);
        let shutdown = CancellationToken::new();
        let executor = Arc::new(TransferExecutor::new(history.clone(), notifier.clone()));

        let workers = (0..concurrency)
            .map(|index| {
                let worker_span = span!(Level::DEBUG, "download_worker", worker = index);
                tokio::spawn(
                    worker(
                        rx.clone(),
                        executor.clone(),
                        planner.clone(),
                        shutdown.clone(),
                    )
                    .instrument(worker_span),
                )
            })
            .collect();

        info!(workers = concurrency, "Download queue started");

        Self {
            history,
            notifier,
            planner,
            client: reqwest::Client::new(),
            tx,
            rx,
            shutdown,
            workers: Mutex::new(workers),
            concurrency,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Submit a single download. Returns as soon as the job is queued.
    pub async fn submit(
        &self,
        url: impl Into<String>,
        name: Option<String>,
        category: Category,
    ) -> Result<SubmitOutcome> {
        let job = Job::new(url, name, category);
        self.enqueue(job, FilenamePolicy::Derive, None).await
    }

    async fn enqueue(
        &self,
        job: Job,
        policy: FilenamePolicy,
        done: Option<oneshot::Sender<Outcome>>,
    ) -> Result<SubmitOutcome> {
        // Queue space is reserved before the ledger records anything, so a
        // caller dropped while the queue is full leaves no job behind.
        let permit = self.tx.reserve().await.map_err(|_| {
            warn!(id = %job.id, "Queue is shut down, rejecting job");
            DownloadError::QueueClosed
        })?;

        let (outcome, job) = match self.history.admit(job) {
            Admission::Duplicate(existing) => {
                info!(id = %existing.id, status = %existing.status, "Download already known, skipping");
                return Ok(SubmitOutcome::Duplicated);
            }
            Admission::New(job) => (SubmitOutcome::Received, job),
            Admission::Retry(job) => (SubmitOutcome::Retrying, job),
        };

        info!(id = %job.id, name = %job.name, status = %job.status, "Adding download to queue");
        self.notifier.broadcast(DownloadEvent::new(&job, job.status));

        permit.send(QueuedJob { job, policy, done });
        Ok(outcome)
    }

    /// Import every item of a pack manifest and wait for all admitted
    /// transfers to finish, successful or not.
    #[instrument(skip(self))]
    pub async fn import_pack(&self, manifest_url: &str) -> Result<PackReport> {
        let items = fetch_manifest(&self.client, manifest_url).await?;
        let target = self.planner.settings().target;
        let mut report = PackReport::default();
        let mut pending = Vec::new();

        for item in items {
            let category = match item.category.parse::<Category>() {
                Ok(category) => category,
                Err(e) => {
                    warn!(name = %item.name, error = %e, "Skipping pack item");
                    report.skipped += 1;
                    continue;
                }
            };

            if !target.supports(category) {
                warn!(
                    name = %item.name,
                    %category,
                    target = target.as_str(),
                    "Skipping pack item, not supported by target app"
                );
                report.skipped += 1;
                continue;
            }

            if let Err(e) = Url::parse(&item.url) {
                warn!(name = %item.name, error = %e, "Skipping pack item with invalid URL");
                report.skipped += 1;
                continue;
            }

            let policy = if item.force_filename {
                FilenamePolicy::Derive
            } else {
                FilenamePolicy::RemoteSuggested
            };
            let (done_tx, done_rx) = oneshot::channel();
            let job = Job::new(item.url, Some(item.name), category);

            match self.enqueue(job, policy, Some(done_tx)).await {
                Ok(SubmitOutcome::Duplicated) => report.duplicated += 1,
                Ok(_) => {
                    report.admitted += 1;
                    pending.push(done_rx);
                }
                Err(e) => {
                    error!(error = %e, "Failed to queue pack item");
                    report.failed += 1;
                }
            }
        }

        info!(
            admitted = report.admitted,
            duplicated = report.duplicated,
            skipped = report.skipped,
            "Pack queued, waiting for transfers"
        );

        for outcome in join_all(pending).await {
            match outcome {
                Ok(Outcome::Completed) => report.completed += 1,
                // A dropped sender means the job never ran to completion.
                Ok(Outcome::Failed) | Err(_) => report.failed += 1,
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            "Pack import finished"
        );
        Ok(report)
    }

    /// Import several packs concurrently. A manifest that cannot be fetched
    /// only fails its own pack.
    pub async fn import_packs(&self, packs: Vec<PackRequest>) -> Vec<Result<PackReport>> {
        join_all(packs.into_iter().map(|pack| async move {
            info!(pack = %pack.name, "Start download of pack");
            let result = self.import_pack(pack.url.as_str()).await;
            if let Err(e) = &result {
                error!(pack = %pack.name, error = %e, "Pack import failed");
            }
            result
        }))
        .await
    }

    /// Stop all workers. In-flight transfers are killed and marked failed,
    /// as are jobs still waiting in the queue.
    pub async fn shutdown(&self) {
        info!("Shutting down download queue");
        self.shutdown.cancel();

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Download worker panicked");
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        // Also picks up jobs sent through permits reserved before the close.
        while let Some(queued) = rx.recv().await {
            fail_unstarted(&self.history, self.notifier.as_ref(), queued);
        }
        debug!("Download queue drained");
    }
}

fn fail_unstarted(history: &History, notifier: &dyn EventNotifier, queued: QueuedJob) {
    history.update_status(&queued.job.id, JobStatus::Failed);
    notifier.broadcast(DownloadEvent::new(&queued.job, JobStatus::Failed));
    if let Some(done) = queued.done {
        let _ = done.send(Outcome::Failed);
    }
}

async fn worker(
    rx: SharedReceiver,
    executor: Arc<TransferExecutor>,
    planner: Arc<Planner>,
    shutdown: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                queued = rx.recv() => queued,
            }
        };

        let Some(queued) = next else {
            debug!("Worker stopping");
            break;
        };

        let plan = planner.plan(&queued.job, queued.policy);
        let outcome = executor.execute(&queued.job, &plan, &shutdown).await;
        if let Some(done) = queued.done {
            let _ = done.send(outcome);
        }
    }
}
