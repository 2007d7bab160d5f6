//! The job dispatcher: one serialized loop owning every job transition.
//!
//! The loop selects over four inputs:
//!
//! - **intake**: record the job (`put_job`), answer the submitter, and on
//!   success launch its runner on a separate task
//! - **queries**: report the latest [`JobResult`] for an instance
//! - **results**: apply a finished runner's result (`update_job`)
//! - **reap ticker**: delete old finished jobs
//!
//! Failures while applying results or reaping are logged only; the submitter
//! has already been answered by then. Closing the intake queue (dropping every
//! [`JobQueue`]) stops the loop.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use svcbroker_core::{BrokerJob, InstanceId, JobResult, SCHEMA_VERSION};

use super::runner::OperationRunner;
use super::supervisor::PanicReport;
use crate::config::JobsConfig;
use crate::persistence::{BrokerStore, PersistError};
use crate::provisioner::Provisioner;

const QUEUE_DEPTH: usize = 64;

/// Why a job could not be queued or queried.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Rejected(#[from] PersistError),

    #[error("job dispatcher is not running")]
    Closed,
}

impl QueueError {
    /// The instance already has a job in progress.
    pub fn is_job_exists(&self) -> bool {
        matches!(self, QueueError::Rejected(e) if e.is_job_exists())
    }
}

struct Submission {
    job: BrokerJob,
    accept: oneshot::Sender<Result<(), PersistError>>,
}

struct ResultQuery {
    instance_id: InstanceId,
    reply: oneshot::Sender<JobResult>,
}

/// Client side of a running dispatcher. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    intake: mpsc::Sender<Submission>,
    queries: mpsc::Sender<ResultQuery>,
}

impl JobQueue {
    /// Hand a job to the dispatcher and wait until it is recorded or rejected.
    pub async fn queue_job(&self, mut job: BrokerJob) -> Result<(), QueueError> {
        job.version = SCHEMA_VERSION;
        job.last_updated = chrono::Utc::now();

        let (accept, accepted) = oneshot::channel();
        self.intake
            .send(Submission { job, accept })
            .await
            .map_err(|_| QueueError::Closed)?;
        accepted.await.map_err(|_| QueueError::Closed)??;
        Ok(())
    }

    /// The latest result of the job for `instance_id`.
    ///
    /// An instance without a job reports a failed result carrying
    /// "no job exists for this instance id".
    pub async fn job_result(&self, instance_id: &InstanceId) -> Result<JobResult, QueueError> {
        let (reply, answer) = oneshot::channel();
        self.queries
            .send(ResultQuery {
                instance_id: instance_id.clone(),
                reply,
            })
            .await
            .map_err(|_| QueueError::Closed)?;
        answer.await.map_err(|_| QueueError::Closed)
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission").field("job", &self.job).finish()
    }
}

impl std::fmt::Debug for ResultQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultQuery")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Handle to a spawned dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    queue: JobQueue,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Close this handle's side of the intake queue and wait for the loop to
    /// exit. The loop keeps running while other [`JobQueue`] clones are alive.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        let Self { queue, join } = self;
        drop(queue);
        join.await
    }
}

/// Builds and spawns the dispatcher loop.
pub struct JobDispatcher {
    store: BrokerStore,
    runner: OperationRunner,
    config: JobsConfig,
}

impl JobDispatcher {
    pub fn new(store: BrokerStore, provisioner: Arc<dyn Provisioner>, config: JobsConfig) -> Self {
        let runner = OperationRunner::new(store.clone(), provisioner, config);
        Self::with_runner(runner)
    }

    pub fn with_runner(runner: OperationRunner) -> Self {
        Self {
            store: runner.store().clone(),
            config: *runner.config(),
            runner,
        }
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let (intake_tx, intake_rx) = mpsc::channel(QUEUE_DEPTH);
        let (query_tx, query_rx) = mpsc::channel(QUEUE_DEPTH);
        let join = tokio::spawn(self.run(intake_rx, query_rx));

        DispatcherHandle {
            queue: JobQueue {
                intake: intake_tx,
                queries: query_tx,
            },
            join,
        }
    }

    async fn run(
        self,
        mut intake: mpsc::Receiver<Submission>,
        mut queries: mpsc::Receiver<ResultQuery>,
    ) {
        let (results_tx, mut results) = mpsc::channel::<JobResult>(QUEUE_DEPTH);

        // `interval` panics on a zero period.
        let period = self.config.reap_interval.max(std::time::Duration::from_millis(1));
        let mut reap = tokio::time::interval_at(Instant::now() + period, period);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(reap_interval_secs = period.as_secs(), "job dispatcher started");

        loop {
            tokio::select! {
                submission = intake.recv() => match submission {
                    Some(submission) => self.accept(submission, &results_tx).await,
                    None => break,
                },
                Some(query) = queries.recv() => self.answer(query).await,
                Some(result) = results.recv() => self.apply(result).await,
                _ = reap.tick() => self.reap().await,
            }
        }

        info!("job dispatcher stopped");
    }

    async fn accept(&self, submission: Submission, results: &mpsc::Sender<JobResult>) {
        let Submission { job, accept } = submission;

        if let Err(e) = self.store.put_job(&job).await {
            debug!(instance_id = %job.instance_id, error = %e, "job rejected");
            let _ = accept.send(Err(e));
            return;
        }

        let _ = accept.send(Ok(()));
        self.launch(job, results.clone());
    }

    /// Run the job on its own task, under a supervisor that fails the job if
    /// the runner task itself dies.
    fn launch(&self, job: BrokerJob, results: mpsc::Sender<JobResult>) {
        let runner = self.runner.clone();
        let instance_id = job.instance_id.clone();
        let job_kind = job.job_kind;
        let task = tokio::spawn(async move { runner.run_job(&job).await });

        tokio::spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    let report = PanicReport::from_join_error(join_err);
                    error!(
                        instance_id = %instance_id,
                        job_kind = %job_kind,
                        panic = %report.message,
                        backtrace = %report.backtrace,
                        "job panicked"
                    );
                    JobResult::panicked(instance_id.clone())
                }
            };
            if results.send(result).await.is_err() {
                warn!(instance_id = %instance_id, "dispatcher stopped; dropping job result");
            }
        });
    }

    async fn answer(&self, query: ResultQuery) {
        let ResultQuery { instance_id, reply } = query;
        let result = match self.store.get_job(&instance_id).await {
            Ok(job) => job.job_result,
            Err(e) if e.is_key_not_found() => JobResult::no_job(instance_id),
            Err(e) => JobResult::failed(instance_id, e.to_string()),
        };
        let _ = reply.send(result);
    }

    async fn apply(&self, result: JobResult) {
        info!(instance_id = %result.instance_id, status = %result.status, "updating job");
        if let Err(e) = self.store.update_job(&result).await {
            error!(instance_id = %result.instance_id, error = %e, "error updating job");
        }
    }

    async fn reap(&self) {
        info!("reaping jobs");
        match self.store.reap_jobs(self.config.reap_after).await {
            Ok(reaped) => debug!(reaped, "reaped jobs"),
            Err(e) => error!(error = %e, "error reaping jobs"),
        }
    }
}
