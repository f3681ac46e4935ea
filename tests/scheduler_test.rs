//! Scheduler tests for feedmail.
//!
//! Every test runs on paused tokio time with a [`TokioClock`], so cron
//! triggers fire as the test sleeps without waiting in real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use feedmail::datetime::truncate_to_seconds;
use feedmail::scheduler::{Clock, Job, Scheduler, SchedulerState, TokioClock};
use feedmail::{ErrorCode, FeedmailError, Result};

fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, h, m, s).unwrap()
}

/// Job recording the clock time of every run.
struct RecordingJob {
    name: &'static str,
    clock: TokioClock,
    fired: Mutex<Vec<DateTime<Utc>>>,
}

impl RecordingJob {
    fn new(name: &'static str, clock: TokioClock) -> Arc<Self> {
        Arc::new(Self {
            name,
            clock,
            fired: Mutex::new(Vec::new()),
        })
    }

    fn fired(&self) -> Vec<DateTime<Utc>> {
        self.fired.lock().clone()
    }
}

#[async_trait]
impl Job for RecordingJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.fired.lock().push(truncate_to_seconds(self.clock.now()));
        Ok(())
    }
}

fn setup_scheduler(start: DateTime<Utc>) -> (Scheduler, TokioClock) {
    let clock = TokioClock::starting_at(start);
    (
        Scheduler::with_clock(chrono_tz::UTC, Arc::new(clock)),
        clock,
    )
}

#[tokio::test(start_paused = true)]
async fn test_jobs_fire_on_their_schedules() {
    let (mut scheduler, clock) = setup_scheduler(utc(10, 0, 30));
    let minute = RecordingJob::new("minute", clock);
    let five = RecordingJob::new("five", clock);
    scheduler.schedule("* * * * *", minute.clone()).unwrap();
    scheduler.schedule("*/5 * * * *", five.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    tokio::time::sleep(Duration::from_secs(4 * 60 + 40)).await;
    scheduler.stop().await;

    assert_eq!(
        minute.fired(),
        vec![
            utc(10, 1, 0),
            utc(10, 2, 0),
            utc(10, 3, 0),
            utc(10, 4, 0),
            utc(10, 5, 0)
        ]
    );
    assert_eq!(five.fired(), vec![utc(10, 5, 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_every_interval() {
    let (mut scheduler, clock) = setup_scheduler(utc(10, 0, 0));
    let job = RecordingJob::new("every", clock);
    scheduler.schedule("@every 90s", job.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    tokio::time::sleep(Duration::from_secs(200)).await;
    scheduler.stop().await;

    assert_eq!(job.fired(), vec![utc(10, 1, 30), utc(10, 3, 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_bad_spec_leaves_jobs_unchanged() {
    let (mut scheduler, clock) = setup_scheduler(utc(10, 0, 0));
    scheduler
        .schedule("@hourly", RecordingJob::new("hourly", clock))
        .unwrap();

    for spec in ["* * *", "61 * * * *", "@every 0s", "@yearly extra"] {
        let err = scheduler
            .schedule(spec, RecordingJob::new("bad", clock))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument, "{spec:?}");
    }
    assert_eq!(scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let (mut scheduler, clock) = setup_scheduler(utc(10, 0, 30));
    let job = RecordingJob::new("minute", clock);
    scheduler.schedule("* * * * *", job.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    scheduler.start(CancellationToken::new());
    assert_eq!(scheduler.state(), SchedulerState::Running);

    tokio::time::sleep(Duration::from_secs(60)).await;
    scheduler.stop().await;

    // A second timing task would have doubled the runs
    assert_eq!(job.fired(), vec![utc(10, 1, 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancel_stops_firing() {
    let (mut scheduler, clock) = setup_scheduler(utc(10, 0, 30));
    let job = RecordingJob::new("minute", clock);
    scheduler.schedule("* * * * *", job.clone()).unwrap();

    let cancel = CancellationToken::new();
    scheduler.start(cancel.clone());
    tokio::time::sleep(Duration::from_secs(60)).await;
    cancel.cancel();
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;

    assert_eq!(job.fired().len(), 1);
    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

/// Job that ignores cancellation and takes a while to finish.
struct SlowJob {
    finished: AtomicBool,
}

#[async_trait]
impl Job for SlowJob {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_running_job() {
    let (mut scheduler, _clock) = setup_scheduler(utc(10, 0, 59));
    let job = Arc::new(SlowJob {
        finished: AtomicBool::new(false),
    });
    scheduler.schedule("* * * * *", job.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!job.finished.load(Ordering::SeqCst));

    scheduler.stop().await;
    assert!(job.finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stop_waits_for_running_job() {
    let (mut scheduler, _clock) = setup_scheduler(utc(10, 0, 59));
    let job = Arc::new(SlowJob {
        finished: AtomicBool::new(false),
    });
    scheduler.schedule("* * * * *", job.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    tokio::time::sleep(Duration::from_secs(2)).await;

    let (_, finished_when_second_returned) = tokio::join!(scheduler.stop(), async {
        // Let the first stop take over before the second one arrives
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopping);
        scheduler.stop().await;
        job.finished.load(Ordering::SeqCst)
    });
    assert!(finished_when_second_returned);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

/// Job that blocks until canceled.
struct WaitingJob {
    canceled: AtomicBool,
}

#[async_trait]
impl Job for WaitingJob {
    fn name(&self) -> &str {
        "waiting"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        cancel.cancelled().await;
        self.canceled.store(true, Ordering::SeqCst);
        Err(FeedmailError::Canceled)
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_running_job() {
    let (mut scheduler, _clock) = setup_scheduler(utc(10, 0, 59));
    let job = Arc::new(WaitingJob {
        canceled: AtomicBool::new(false),
    });
    scheduler.schedule("* * * * *", job.clone()).unwrap();

    scheduler.start(CancellationToken::new());
    tokio::time::sleep(Duration::from_secs(2)).await;

    scheduler.stop().await;
    assert!(job.canceled.load(Ordering::SeqCst));
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}
