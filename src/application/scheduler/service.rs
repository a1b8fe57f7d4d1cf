//! Scheduler service
//!
//! Single driver task that, on every tick (and on demand after a
//! schedule-affecting mutation), pulls due jobs from storage, verifies
//! their dependencies, enqueues executions into the runner's queue and
//! advances each job's next firing time. All of its mutable state is
//! serialised through the tick itself; concurrent schedule edits are
//! handled by re-reading the job before the enqueue write.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{Job, JobExecution, JobStatus, Trigger};
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::repositories::{ExecutionRepository, JobRepository, Store};
use crate::infrastructure::config::CoreConfig;

use crate::application::runner::queue::ExecutionQueue;

/// Tick-driven job dispatcher
pub struct SchedulerService {
    store: Arc<dyn Store>,
    queue: Arc<ExecutionQueue>,
    tick: std::time::Duration,
    wake: Notify,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SchedulerService {
    pub fn new(store: Arc<dyn Store>, queue: Arc<ExecutionQueue>, config: &CoreConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            queue,
            tick: config.scheduler_tick(),
            wake: Notify::new(),
            driver: std::sync::Mutex::new(None),
            shutdown,
        })
    }

    /// Starts the driver task
    pub fn start(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = scheduler.wake.notified() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = scheduler.run_tick(Utc::now()).await {
                    error!("scheduler tick failed: {}", e);
                }
            }
        });
        *self.driver.lock().unwrap() = Some(handle);
        info!(tick_seconds = self.tick.as_secs(), "scheduler started");
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }

    /// Requests an immediate tick after a schedule-affecting mutation
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    /// One dispatch pass over the due jobs
    ///
    /// Public so tests (and the CLI's one-shot mode) can drive the
    /// scheduler with a pinned clock.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> CoreResult<()> {
        let due = self.store.list_executable_jobs(now).await?;
        debug!(due = due.len(), "scheduler tick");

        for job in due {
            // Reconcile with concurrent edits: work from the current
            // version, not the snapshot the hot query returned.
            let current = match self.store.get_job(job.id).await {
                Ok(current) => current,
                Err(CoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if !current.is_due(now) {
                continue;
            }

            if !self.dependencies_met(&current).await? {
                debug!(job = %current.name, "dependencies unmet; deferred");
                continue;
            }

            if let Err(e) = self.enqueue(&current, now).await {
                warn!(job = %current.name, "enqueue failed: {}", e);
            }
        }
        Ok(())
    }

    /// True iff every dependency's most recent execution completed
    pub async fn dependencies_met(&self, job: &Job) -> CoreResult<bool> {
        for dependency in &job.dependencies {
            let latest = self.store.latest_execution(*dependency).await?;
            let completed = latest.is_some_and(|e| {
                e.status == crate::domain::entities::ExecutionStatus::Completed
            });
            if !completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Creates the queued execution and advances the job's firing time
    async fn enqueue(&self, job: &Job, now: DateTime<Utc>) -> CoreResult<()> {
        let mut execution = JobExecution::queued(job.id, job.priority, Trigger::Scheduled, now);
        execution.scheduled_at = job.next_execution_at;
        execution.parameters = job.configuration.clone();
        let execution = self.store.create_execution(execution).await?;

        if let Err(e) = self.queue.try_push(execution.id, job.id, job.priority, execution.queued_at)
        {
            // Queue full: take the execution back out of the way and let the
            // job fire again on a later tick.
            warn!(job = %job.name, "execution queue full; deferring: {}", e);
            let mut cancelled = execution.clone();
            cancelled.mark_terminal(crate::domain::entities::ExecutionStatus::Cancelled, now);
            let _ = self.store.update_execution(cancelled, execution.version).await;
            return Ok(());
        }

        let mut updated = job.clone();
        updated.last_fired_at = Some(now);
        updated.recompute_next_execution(now)?;
        match self.store.update_job(updated, job.version).await {
            Ok(_) => Ok(()),
            // Someone edited the job mid-tick; their write owns the firing
            // time and the next tick reconciles.
            Err(CoreError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Activates a job: validates the schedule and moves it to `scheduled`
    pub async fn activate_job(&self, job_id: uuid::Uuid, now: DateTime<Utc>) -> CoreResult<Job> {
        let mut job = self.store.get_job(job_id).await?;
        if !job.status.can_transition_to(JobStatus::Scheduled) {
            return Err(CoreError::validation(format!(
                "job '{}' cannot be scheduled from {:?}",
                job.name, job.status
            )));
        }
        job.schedule.validate()?;
        job.active = true;
        job.status = JobStatus::Scheduled;
        job.recompute_next_execution(now)?;
        let version = job.version;
        let job = self.store.update_job(job, version).await?;
        self.wake();
        Ok(job)
    }

    /// Pauses a scheduled or running job
    pub async fn pause_job(&self, job_id: uuid::Uuid) -> CoreResult<Job> {
        let mut job = self.store.get_job(job_id).await?;
        if !job.status.can_transition_to(JobStatus::Paused) {
            return Err(CoreError::validation(format!(
                "job '{}' cannot be paused from {:?}",
                job.name, job.status
            )));
        }
        job.status = JobStatus::Paused;
        let version = job.version;
        self.store.update_job(job, version).await
    }

    /// Resumes a paused job
    pub async fn resume_job(&self, job_id: uuid::Uuid, now: DateTime<Utc>) -> CoreResult<Job> {
        let mut job = self.store.get_job(job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(CoreError::validation(format!(
                "job '{}' is not paused",
                job.name
            )));
        }
        job.status = JobStatus::Scheduled;
        job.recompute_next_execution(now)?;
        let version = job.version;
        let job = self.store.update_job(job, version).await?;
        self.wake();
        Ok(job)
    }

    /// Enqueues a manual run immediately, bypassing the schedule
    pub async fn trigger_manual(
        &self,
        job_id: uuid::Uuid,
        triggered_by: Option<uuid::Uuid>,
        now: DateTime<Utc>,
    ) -> CoreResult<JobExecution> {
        let job = self.store.get_job(job_id).await?;
        if !job.active && job.status != JobStatus::Inactive {
            return Err(CoreError::validation(format!(
                "job '{}' is not active",
                job.name
            )));
        }
        let mut execution = JobExecution::queued(job.id, job.priority, Trigger::Manual, now);
        execution.triggered_by = triggered_by;
        execution.parameters = job.configuration.clone();
        let execution = self.store.create_execution(execution).await?;
        self.queue
            .try_push(execution.id, job.id, job.priority, execution.queued_at)?;
        Ok(execution)
    }
}
