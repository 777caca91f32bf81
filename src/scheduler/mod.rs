//! Scheduler: one live trigger per active job, one execution per job at a time.
//!
//! Timer tasks only decide *when* to run. Each firing reloads the job, hands
//! the execution to its own task and goes back to waiting, so a slow poll
//! never delays another job's timer. A firing that finds the job still in
//! flight is skipped, not queued.

pub mod trigger;
pub mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use chrono_tz::Tz;
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::*;
use crate::store::JobStore;
use crate::telemetry::metrics;

pub use trigger::Trigger;
pub use worker::JobRunner;

/// What happened to a request to execute a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// An execution was handed off and will log under this id.
    Started(ExecutionId),
    /// The job was already running.
    Skipped,
}

struct TriggerHandle {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    runner: JobRunner,
    default_tz: Tz,
    triggers: Mutex<HashMap<JobId, TriggerHandle>>,
    in_flight: Mutex<HashSet<JobId>>,
    idle: Notify,
    generation: AtomicU64,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

/// Process-scoped scheduler service. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Marks a job in flight until dropped.
struct InFlightGuard {
    inner: Arc<Inner>,
    job_id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.job_id);
        self.inner.idle.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Scheduler {
    pub fn new(runner: JobRunner, default_tz: Tz) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                default_tz,
                triggers: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                idle: Notify::new(),
                generation: AtomicU64::new(0),
                running: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    fn jobs(&self) -> &Arc<dyn JobStore> {
        self.inner.runner.jobs()
    }

    pub fn runner(&self) -> &JobRunner {
        &self.inner.runner
    }

    pub fn default_timezone(&self) -> Tz {
        self.inner.default_tz
    }

    /// Re-register every persisted active job. Inactive jobs stay inactive.
    pub async fn start(&self) -> Result<usize> {
        {
            let mut shutdown = lock(&self.inner.shutdown);
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
        }
        self.inner.running.store(true, Ordering::SeqCst);

        let jobs = self.jobs().list_active_jobs().await?;
        let mut scheduled = 0;
        for job in &jobs {
            match self.schedule_job(job) {
                Ok(()) => scheduled += 1,
                Err(e) => error!(job_id = %job.id, name = %job.name, error = %e, "could not schedule job"),
            }
        }
        info!(scheduled, "scheduler started");
        Ok(scheduled)
    }

    /// Cancel every trigger and wait for in-flight executions to finish.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        lock(&self.inner.shutdown).cancel();
        lock(&self.inner.triggers).clear();
        self.wait_idle().await;
        info!("scheduler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Install a trigger for `job`, replacing any existing one.
    /// An inactive job is unscheduled instead.
    pub fn schedule_job(&self, job: &ScheduledJob) -> Result<()> {
        if !job.is_active {
            self.unschedule_job(job.id);
            return Ok(());
        }
        let trigger = Trigger::from_schedule(&job.schedule, self.inner.default_tz)?;

        let token = lock(&self.inner.shutdown).child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let previous = lock(&self.inner.triggers).insert(
            job.id,
            TriggerHandle {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        info!(job_id = %job.id, name = %job.name, schedule = job.schedule.kind(), "job scheduled");
        tokio::spawn(self.clone().run_trigger(
            job.id,
            job.org_id.clone(),
            trigger,
            token,
            generation,
        ));
        Ok(())
    }

    /// Cancel a job's trigger. Returns whether one existed.
    pub fn unschedule_job(&self, job_id: JobId) -> bool {
        match lock(&self.inner.triggers).remove(&job_id) {
            Some(handle) => {
                handle.token.cancel();
                info!(job_id = %job_id, "job unscheduled");
                true
            }
            None => false,
        }
    }

    /// Remove the trigger only if it is still the one installed at `generation`.
    fn retire_trigger(&self, job_id: JobId, generation: u64) {
        let mut triggers = lock(&self.inner.triggers);
        if triggers
            .get(&job_id)
            .is_some_and(|h| h.generation == generation)
        {
            if let Some(handle) = triggers.remove(&job_id) {
                handle.token.cancel();
            }
        }
    }

    pub fn is_scheduled(&self, job_id: JobId) -> bool {
        lock(&self.inner.triggers).contains_key(&job_id)
    }

    pub fn scheduled_count(&self) -> usize {
        lock(&self.inner.triggers).len()
    }

    /// Is an execution of this job in flight?
    pub fn is_running(&self, job_id: JobId) -> bool {
        lock(&self.inner.in_flight).contains(&job_id)
    }

    /// Start one execution in the background, or skip if one is in flight.
    /// Returns as soon as the execution is handed off.
    pub fn execute_job(&self, job: ScheduledJob, trigger: TriggerKind) -> Dispatch {
        let guard = {
            let mut in_flight = lock(&self.inner.in_flight);
            if !in_flight.insert(job.id) {
                None
            } else {
                Some(InFlightGuard {
                    inner: self.inner.clone(),
                    job_id: job.id,
                })
            }
        };
        let Some(guard) = guard else {
            warn!(job_id = %job.id, name = %job.name, trigger = trigger.as_str(), "previous execution still running, firing skipped");
            metrics::job_firings_skipped().add(1, &[KeyValue::new("trigger", trigger.as_str())]);
            return Dispatch::Skipped;
        };

        let execution_id = ExecutionId::new();
        let runner = self.inner.runner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            runner.run(job, execution_id, trigger).await;
        });
        Dispatch::Started(execution_id)
    }

    /// Wait until no execution is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if lock(&self.inner.in_flight).is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn run_trigger(
        self,
        job_id: JobId,
        org_id: String,
        trigger: Trigger,
        token: CancellationToken,
        generation: u64,
    ) {
        match &trigger {
            Trigger::Interval(period) => {
                let mut ticker = tokio::time::interval_at(Instant::now() + *period, *period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if !self.fire(job_id, &org_id, generation).await {
                                break;
                            }
                        }
                    }
                }
            }
            Trigger::Cron { .. } => {
                let mut last_fired = None;
                loop {
                    let Some(next) = trigger.next_firing(Utc::now(), last_fired) else {
                        warn!(job_id = %job_id, "cron schedule has no future occurrence");
                        self.retire_trigger(job_id, generation);
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {
                            last_fired = Some(next);
                            if !self.fire(job_id, &org_id, generation).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Reload the job and dispatch it. Returns false when the trigger should stop.
    async fn fire(&self, job_id: JobId, org_id: &str, generation: u64) -> bool {
        let job = match self.jobs().get_job(org_id, job_id).await {
            Ok(Some(job)) if job.is_active => job,
            Ok(_) => {
                info!(job_id = %job_id, "job deleted or deactivated, unscheduling");
                self.retire_trigger(job_id, generation);
                return false;
            }
            Err(e) => {
                // Transient store failure: keep the trigger, try next time.
                error!(job_id = %job_id, error = %e, "could not load job for firing");
                return true;
            }
        };
        self.execute_job(job, TriggerKind::Scheduled);
        true
    }
}
