//! Execution Coordinator
//!
//! Turns trigger requests into queued executions and runs them on a
//! bounded worker pool.
//!
//! # Worker pool
//!
//! The pool is a semaphore with one permit per worker. Each admitted
//! execution holds a permit while its [`JobRunner`] walks the steps on a
//! blocking thread, so at most `worker_threads` executions run at once.
//! With [`SubmissionPolicy::Queue`] a submission made while every worker is
//! busy waits for a permit; with [`SubmissionPolicy::Reject`] it fails
//! before any snapshot is created.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use super::report::ExecutionReport;
use super::runner::JobRunner;
use super::snapshot::build_snapshot;
use crate::command::CommandRegistry;
use crate::error::EngineError;
use crate::model::{Id, JobExecution, Trigger};
use crate::settings::{Settings, SubmissionPolicy};
use crate::store::Store;

struct Inner {
    store: Arc<dyn Store>,
    runner: JobRunner,
    permits: Arc<Semaphore>,
    pool_size: usize,
    policy: SubmissionPolicy,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Entry point for triggering, cancelling and inspecting executions.
///
/// Cheap to clone; clones share the same pool.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use jobloom::command::CommandRegistry;
/// use jobloom::execution::Coordinator;
/// use jobloom::settings::Settings;
/// use jobloom::store::MemoryStore;
///
/// # async fn demo() -> Result<(), jobloom::EngineError> {
/// let coordinator = Coordinator::new(
///     Arc::new(MemoryStore::new()),
///     CommandRegistry::with_builtins(),
///     &Settings::default(),
/// );
/// let execution_id = coordinator.trigger_manual(1, 42).await?;
/// coordinator.drain().await;
/// println!("{}", coordinator.query_status(execution_id)?.render());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, registry: CommandRegistry, settings: &Settings) -> Self {
        let pool_size = settings.worker_threads.max(1);
        let runner = JobRunner::new(store.clone(), Arc::new(registry), settings.work_dir.clone());

        info!(
            "Worker pool ready ({} workers, policy: {})",
            pool_size,
            settings.submission_policy.as_str()
        );

        Self {
            inner: Arc::new(Inner {
                store,
                runner,
                permits: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                policy: settings.submission_policy,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Workers not currently holding an execution.
    pub fn idle_workers(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Queues an execution of `job_id` on behalf of a user.
    ///
    /// Inactive jobs may be triggered manually; deleted and snapshot jobs may not.
    ///
    /// # Returns
    ///
    /// The new execution's id. The execution itself runs in the background.
    pub async fn trigger_manual(&self, job_id: Id, user_id: Id) -> Result<Id, EngineError> {
        self.submit(job_id, Trigger::Manual { user_id }).await
    }

    /// Queues an execution of `job_id` fired by schedule `schedule_id`.
    pub async fn trigger_scheduled(&self, job_id: Id, schedule_id: Id) -> Result<Id, EngineError> {
        self.submit(job_id, Trigger::Scheduled { schedule_id }).await
    }

    /// Requests cancellation of an execution.
    ///
    /// The runner honours the request before its next step starts; a step
    /// already running is not interrupted. Repeated requests keep the
    /// first requester and time.
    pub fn cancel(&self, execution_id: Id, user_id: Id) -> Result<JobExecution, EngineError> {
        let mut finished = false;
        let execution = self.inner.store.modify_execution(execution_id, &mut |e| {
            if e.status.is_terminal() {
                finished = true;
            } else if e.cancelled_on.is_none() {
                e.cancelled_on = Some(Utc::now());
                e.cancelled_by_user_id = Some(user_id);
            }
        })?;

        if finished {
            return Err(EngineError::ExecutionFinished(execution_id));
        }
        info!(
            "Cancellation requested for execution {} by user {}",
            execution_id, user_id
        );
        Ok(execution)
    }

    /// Current state of an execution and its steps.
    pub fn query_status(&self, execution_id: Id) -> Result<ExecutionReport, EngineError> {
        ExecutionReport::load(self.inner.store.as_ref(), execution_id)
    }

    /// Waits until every execution submitted so far has finished.
    pub async fn drain(&self) {
        loop {
            let pending = std::mem::take(&mut *self.tasks());
            if pending.is_empty() {
                return;
            }
            debug!("Waiting for {} execution task(s)", pending.len());
            for handle in pending {
                if let Err(e) = handle.await {
                    error!("Execution task ended abnormally: {}", e);
                }
            }
        }
    }

    async fn submit(&self, job_id: Id, trigger: Trigger) -> Result<Id, EngineError> {
        let permit = match self.inner.policy {
            SubmissionPolicy::Reject => Some(
                self.inner
                    .permits
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| EngineError::ConcurrencyExhausted {
                        pool_size: self.inner.pool_size,
                    })?,
            ),
            SubmissionPolicy::Queue => None,
        };

        let store = self.inner.store.as_ref();
        let snapshot = build_snapshot(store, job_id)?;
        let execution = store.insert_execution(JobExecution::queued(job_id, snapshot.job.id, trigger))?;
        info!(
            "Queued execution {} of job {} '{}' ({:?})",
            execution.id, job_id, snapshot.job.name, trigger
        );

        let handle = tokio::spawn(run_execution(self.inner.clone(), execution.id, permit));
        let mut tasks = self.tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);

        Ok(execution.id)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits for a worker if needed, then runs the execution on a blocking thread.
async fn run_execution(inner: Arc<Inner>, execution_id: Id, permit: Option<OwnedSemaphorePermit>) {
    let permit = match permit {
        Some(permit) => permit,
        None => match inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                abandon(&inner.runner, execution_id, "worker pool closed");
                return;
            }
        },
    };

    let runner = inner.runner.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        runner.run(execution_id)
    })
    .await;

    match result {
        Ok(Ok(status)) => debug!("Worker finished execution {} ({})", execution_id, status),
        Ok(Err(e)) => {
            error!("Execution {} stopped: {}", execution_id, e);
            abandon(&inner.runner, execution_id, &e.to_string());
        }
        Err(e) => {
            error!("Worker for execution {} panicked: {}", execution_id, e);
            abandon(&inner.runner, execution_id, "worker panicked");
        }
    }
}

fn abandon(runner: &JobRunner, execution_id: Id, reason: &str) {
    if let Err(e) = runner.abandon(execution_id, reason) {
        warn!("Could not mark execution {} failed: {}", execution_id, e);
    }
}
