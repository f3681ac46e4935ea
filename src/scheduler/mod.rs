//! Cron scheduler for feedmail.
//!
//! The [`Scheduler`] owns a list of cron jobs and, once started, a single
//! timing task that sleeps until the earliest trigger, spawns every due job
//! on a [`TaskTracker`] and re-arms. [`Scheduler::stop`] cancels the timing
//! task and waits for every spawned run before returning.

mod clock;
mod cron;

pub use clock::{Clock, SystemClock, TokioClock};
pub use cron::CronSchedule;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{FeedmailError, Result};

/// Sleep used when no job has a future trigger.
pub const IDLE_SLEEP: Duration = Duration::from_secs(100_000 * 60 * 60);

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Execute once. `cancel` fires when the scheduler stops.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// A job with its schedule and trigger times.
pub struct CronJob {
    job: Arc<dyn Job>,
    schedule: CronSchedule,
    next: Option<DateTime<Utc>>,
    prev: Option<DateTime<Utc>>,
}

impl CronJob {
    /// Wrap `job`; both trigger times start unset.
    pub fn new(job: Arc<dyn Job>, schedule: CronSchedule) -> Self {
        Self {
            job,
            schedule,
            next: None,
            prev: None,
        }
    }

    /// Name of the wrapped job.
    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// The job's schedule.
    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Next trigger, if any.
    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// Last trigger that fired, if any.
    pub fn prev(&self) -> Option<DateTime<Utc>> {
        self.prev
    }
}

impl fmt::Debug for CronJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronJob")
            .field("name", &self.name())
            .field("schedule", &self.schedule.spec())
            .field("next", &self.next)
            .field("prev", &self.prev)
            .finish()
    }
}

/// Ordered list of cron jobs.
#[derive(Debug, Default)]
pub struct JobList {
    jobs: Vec<CronJob>,
}

impl JobList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job.
    pub fn push(&mut self, job: CronJob) {
        self.jobs.push(job);
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in current order.
    pub fn iter(&self) -> impl Iterator<Item = &CronJob> {
        self.jobs.iter()
    }

    /// Compute every job's next trigger from `now`.
    pub fn plan(&mut self, now: DateTime<Utc>) {
        for job in &mut self.jobs {
            job.next = job.schedule.next_after(now);
        }
    }

    /// Sort ascending by next trigger; jobs without one go last.
    pub fn sort(&mut self) {
        self.jobs.sort_by(|a, b| match (a.next, b.next) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    /// Next trigger of the first job; call after [`JobList::sort`].
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.jobs.first().and_then(|job| job.next)
    }

    /// Sort, then advance every job due at `now` and return them in firing
    /// order.
    ///
    /// A fired job gets `prev = next` and `next = schedule.next_after(now)`.
    /// The walk stops at the first job that is not due.
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> Vec<Arc<dyn Job>> {
        self.sort();
        let mut due = Vec::new();
        for job in &mut self.jobs {
            match job.next {
                Some(next) if next <= now => {
                    job.prev = Some(next);
                    job.next = job.schedule.next_after(now);
                    due.push(Arc::clone(&job.job));
                }
                _ => break,
            }
        }
        due
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not running; jobs can be added.
    Idle,
    /// The timing task is running.
    Running,
    /// `stop` is waiting for the timing task and in-flight runs.
    Stopping,
}

enum State {
    Idle(JobList),
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<JobList>,
    },
    /// Flips to `true` once the stopping caller is done.
    Stopping(watch::Receiver<bool>),
}

/// Cron scheduler.
pub struct Scheduler {
    state: Mutex<State>,
    tracker: TaskTracker,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    len: usize,
}

impl Scheduler {
    /// Create a scheduler evaluating cron expressions in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self::with_clock(timezone, Arc::new(SystemClock))
    }

    /// Create a scheduler reading time from `clock`.
    pub fn with_clock(timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::Idle(JobList::new())),
            tracker: TaskTracker::new(),
            clock,
            timezone,
            len: 0,
        }
    }

    /// Register `job` to run on `spec`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `spec` does not parse; the job list is unchanged
    /// - `Internal` if the scheduler is not idle
    pub fn schedule(&mut self, spec: &str, job: Arc<dyn Job>) -> Result<()> {
        let schedule = CronSchedule::parse(spec, self.timezone)?;
        match self.state.get_mut() {
            State::Idle(jobs) => {
                debug!(job = job.name(), spec, "Job scheduled");
                jobs.push(CronJob::new(job, schedule));
                self.len += 1;
                Ok(())
            }
            _ => Err(FeedmailError::internal(
                "cannot add jobs while the scheduler is running",
            )),
        }
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no job is registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        match &*self.state.lock() {
            State::Idle(_) => SchedulerState::Idle,
            State::Running { .. } => SchedulerState::Running,
            State::Stopping(_) => SchedulerState::Stopping,
        }
    }

    /// Start the timing task. Does nothing unless idle.
    ///
    /// The task stops when `cancel` fires or [`Scheduler::stop`] is called.
    pub fn start(&self, cancel: CancellationToken) {
        let mut state = self.state.lock();
        let jobs = match std::mem::replace(&mut *state, State::Idle(JobList::new())) {
            State::Idle(jobs) => jobs,
            other => {
                *state = other;
                debug!("Scheduler already started");
                return;
            }
        };

        let cancel = cancel.child_token();
        info!("Scheduler started with {} job(s)", jobs.len());
        let handle = tokio::spawn(run_loop(
            jobs,
            Arc::clone(&self.clock),
            self.tracker.clone(),
            cancel.clone(),
        ));
        *state = State::Running { cancel, handle };
    }

    /// Stop the timing task and wait for every run it spawned.
    ///
    /// Returns immediately when idle. A call made while another `stop` is in
    /// progress waits for that one to finish. Afterwards the scheduler is
    /// idle and can be started again.
    pub async fn stop(&self) {
        let (done_tx, done_rx) = watch::channel(false);
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Stopping(done_rx)) {
                State::Running { cancel, handle } => Ok((cancel, handle)),
                State::Stopping(other) => {
                    *state = State::Stopping(other.clone());
                    Err(Some(other))
                }
                idle => {
                    *state = idle;
                    Err(None)
                }
            }
        };
        let (cancel, handle) = match running {
            Ok(running) => running,
            Err(Some(mut other)) => {
                // Err means the stopping caller went away; nothing to wait on.
                let _ = other.wait_for(|done| *done).await;
                return;
            }
            Err(None) => return,
        };

        cancel.cancel();
        let jobs = match handle.await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Scheduler task failed: {}", e);
                JobList::new()
            }
        };

        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        *self.state.lock() = State::Idle(jobs);
        let _ = done_tx.send(true);
        info!("Scheduler stopped");
    }
}

async fn run_loop(
    mut jobs: JobList,
    clock: Arc<dyn Clock>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) -> JobList {
    let now = clock.now();
    jobs.plan(now);
    for job in jobs.iter() {
        info!(job = job.name(), now = %now, next = ?job.next(), "schedule");
    }

    loop {
        jobs.sort();
        let delay = match jobs.earliest() {
            Some(next) => (next - clock.now()).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_SLEEP,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Scheduler loop canceled");
                return jobs;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let now = clock.now();
        debug!(now = %now, "wake");
        let due = jobs.fire_due(now);
        if due.is_empty() {
            continue;
        }
        for job in due {
            spawn_run(&tracker, job, cancel.clone());
        }
        for job in jobs.iter().filter(|job| job.prev().is_some()) {
            debug!(job = job.name(), next = ?job.next(), "next trigger");
        }
    }
}

fn spawn_run(tracker: &TaskTracker, job: Arc<dyn Job>, cancel: CancellationToken) {
    tracker.spawn(async move {
        let name = job.name().to_string();
        debug!(job = %name, "Job started");
        match job.run(cancel).await {
            Ok(()) => debug!(job = %name, "Job finished"),
            Err(FeedmailError::Canceled) => warn!(job = %name, "Job canceled"),
            Err(e) => error!(job = %name, code = %e.code(), "Job failed: {}", e),
        }
    });
}
