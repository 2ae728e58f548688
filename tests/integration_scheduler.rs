//! Scheduler integration tests
//!
//! Drives the public API end to end with recording channel doubles: poll
//! loop dedup semantics, scheduler lifecycle bounds, and the guaranteed
//! console fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use tasky::domain::{Task, TaskId};
use tasky::error::Result;
use tasky::notify::console::CaptureBuffer;
use tasky::notify::mock::{MockModal, MockSounder, MockToaster, MockWindow, ToastBehavior};
use tasky::notify::{
    ChannelResult, ChannelSet, ConsoleNotifier, DeliveryChain, DeliveryConfig, HostWindow, NotificationManager,
    RingConfig, Sounder, ToneSpec,
};
use tasky::scheduler::{PollConfig, PollLoop, Scheduler, SchedulerConfig, SchedulerState, StopOutcome};
use tasky::source::{MemoryTaskSource, SqliteTaskSource, TaskSource};

fn due_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 5, 4)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn quiet_ring() -> RingConfig {
    RingConfig::default()
        .with_max_cycles(1)
        .with_cycle_spacing(Duration::from_millis(10))
}

fn manager_with(sounder: Arc<dyn Sounder>, console: &CaptureBuffer) -> Arc<NotificationManager> {
    let channels = ChannelSet::minimal(sounder, Arc::new(ConsoleNotifier::with_writer(Box::new(console.clone()))));
    Arc::new(NotificationManager::new(DeliveryChain::new(
        DeliveryConfig::default(),
        quiet_ring(),
        channels,
    )))
}

fn deliveries(console: &CaptureBuffer, title: &str) -> usize {
    console.contents().matches(&format!("Title: {}", title)).count()
}

fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// A sounder whose system alert hangs, making the poll domain unresponsive.
struct HangingSounder {
    hang: Duration,
    calls: AtomicUsize,
}

impl Sounder for HangingSounder {
    fn system_alert(&self) -> ChannelResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.hang);
        Ok(())
    }

    fn tone(&self, _tone: ToneSpec) -> ChannelResult {
        Ok(())
    }
}

/// Poll 1 delivers, poll 2 does not, an edit resets, poll 3 delivers again.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dedup_reset_scenario() -> Result<()> {
    let console = CaptureBuffer::new();
    let manager = manager_with(Arc::new(MockSounder::new()), &console);
    let source = Arc::new(MemoryTaskSource::with_tasks(vec![Task::new(1, "Task A", due_at())]));
    let poll = PollLoop::new(source.clone(), manager.clone(), PollConfig::default());

    let first = poll.poll_once().await?;
    assert_eq!(first.delivered, 1);
    assert!(manager.is_task_notified(TaskId(1)));
    assert_eq!(deliveries(&console, "Task A"), 1);

    let second = poll.poll_once().await?;
    assert_eq!(second.delivered, 0);
    assert_eq!(deliveries(&console, "Task A"), 1);

    // The user edits the task but leaves it due.
    source.upsert(Task::new(1, "Task A", due_at()).with_description("moved"))?;
    assert!(manager.reset_notification_for_task(TaskId(1)));
    assert!(!manager.is_task_notified(TaskId(1)));

    let third = poll.poll_once().await?;
    assert_eq!(third.delivered, 1);
    assert_eq!(deliveries(&console, "Task A"), 2);
    assert!(console.contents().contains("Description: moved"));

    let fourth = poll.poll_once().await?;
    assert_eq!(fourth.delivered, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clear_redelivers_everything_still_due() -> Result<()> {
    let console = CaptureBuffer::new();
    let manager = manager_with(Arc::new(MockSounder::new()), &console);
    let source = Arc::new(MemoryTaskSource::with_tasks(vec![
        Task::new(1, "Alpha", due_at()),
        Task::new(2, "Beta", due_at()),
    ]));
    let poll = PollLoop::new(source.clone(), manager.clone(), PollConfig::default());

    assert_eq!(poll.poll_once().await?.delivered, 2);

    source.set_completed(TaskId(2), true)?;
    manager.clear_notified_tasks();

    let after_clear = poll.poll_once().await?;
    assert_eq!(after_clear.due, 1);
    assert_eq!(after_clear.delivered, 1);
    assert_eq!(deliveries(&console, "Alpha"), 2);
    assert_eq!(deliveries(&console, "Beta"), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_channel_failing_still_reaches_console() {
    let console = CaptureBuffer::new();
    let channels = ChannelSet::minimal(
        Arc::new(MockSounder::failing()),
        Arc::new(ConsoleNotifier::with_writer(Box::new(console.clone()))),
    )
    .with_toaster(Arc::new(MockToaster::new(ToastBehavior::Fail)))
    .with_modal(Arc::new(MockModal::failing()));
    let manager = NotificationManager::new(DeliveryChain::new(DeliveryConfig::default(), quiet_ring(), channels));

    let window = Arc::new(MockWindow::new());
    let host: Arc<dyn HostWindow> = window.clone();
    manager.set_host_window(&host);
    window.destroy();

    let task = Task::new(7, "Renew passport", due_at());
    assert!(manager.deliver(&task).await);

    let text = console.contents();
    assert!(text.contains("Renew passport"));
    assert!(text.contains("2026-05-04 10:00"));
    assert!(text.contains("*NOTIFICATION SOUND*"));
    assert!(!manager.chain().has_host_window());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_deliveries_share_one_ring() {
    let console = CaptureBuffer::new();
    let sounder = Arc::new(MockSounder::new());
    let ring = RingConfig::default()
        .with_max_cycles(5)
        .with_cycle_spacing(Duration::from_millis(50));
    let channels = ChannelSet::minimal(sounder.clone(), Arc::new(ConsoleNotifier::with_writer(Box::new(console))));
    let manager = Arc::new(NotificationManager::new(DeliveryChain::new(
        DeliveryConfig::default(),
        ring.clone(),
        channels,
    )));
    let task = Task::new(3, "Ring once", due_at());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let task = task.clone();
            tokio::spawn(async move { manager.deliver(&task).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    tokio::time::sleep(ring.ceiling() + Duration::from_millis(300)).await;

    let per_pulse = ring.pattern.len();
    assert!(sounder.tone_count() <= ring.max_cycles as usize * per_pulse);
    assert!(!manager.chain().rings().is_ringing(TaskId(3)));
}

#[test]
fn test_scheduler_delivers_and_stops() {
    let console = CaptureBuffer::new();
    let manager = manager_with(Arc::new(MockSounder::new()), &console);
    let scheduler = Scheduler::new(manager.clone(), SchedulerConfig::default());
    let source = Arc::new(MemoryTaskSource::with_tasks(vec![Task::new(4, "Water plants", due_at())]));

    assert!(scheduler.start(source.clone()).unwrap());
    assert!(!scheduler.start(source).unwrap());
    assert_eq!(scheduler.status().live_domains, 1);

    assert!(wait_until(Duration::from_secs(5), || manager.is_task_notified(TaskId(4))));
    assert_eq!(deliveries(&console, "Water plants"), 1);

    assert_eq!(scheduler.stop(), StopOutcome::Stopped);
    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Idle);
    assert!(!status.is_running);
    assert_eq!(status.live_domains, 0);
    assert_eq!(status.poll.deliveries, 1);
    assert_eq!(status.notified_tasks, 1);
}

#[test]
fn test_stop_is_bounded_when_domain_hangs() {
    let console = CaptureBuffer::new();
    let sounder = Arc::new(HangingSounder {
        hang: Duration::from_millis(1500),
        calls: AtomicUsize::new(0),
    });
    let manager = manager_with(sounder.clone(), &console);
    let config = SchedulerConfig::default().with_stop_timeout(Duration::from_millis(200));
    let scheduler = Scheduler::new(manager, config);
    let source = Arc::new(MemoryTaskSource::with_tasks(vec![Task::new(5, "Slow", due_at())]));

    scheduler.start(source.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sounder.calls.load(Ordering::SeqCst) > 0));

    let started = Instant::now();
    assert_eq!(scheduler.stop(), StopOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(1000));

    let status = scheduler.status();
    assert!(!status.is_running);
    assert_eq!(status.live_domains, 1);

    // A fresh start is not blocked by the orphan.
    assert!(scheduler.start(Arc::new(MemoryTaskSource::new())).unwrap());
    assert_eq!(scheduler.status().generation, 2);
    scheduler.stop();

    // The orphan notices cancellation once its delivery returns.
    assert!(wait_until(Duration::from_secs(5), || scheduler.status().live_domains == 0));
}

#[test]
fn test_restart_keeps_one_domain() {
    let console = CaptureBuffer::new();
    let manager = manager_with(Arc::new(MockSounder::new()), &console);
    let config = SchedulerConfig::default().with_restart_settle(Duration::from_millis(10));
    let scheduler = Scheduler::new(manager, config);
    let source: Arc<dyn TaskSource> = Arc::new(MemoryTaskSource::new());

    scheduler.start(source.clone()).unwrap();
    for _ in 0..3 {
        assert!(scheduler.restart(source.clone()).unwrap());
        let status = scheduler.status();
        assert!(status.is_running);
        assert_eq!(status.live_domains, 1);
    }
    assert_eq!(scheduler.status().generation, 4);
    assert_eq!(scheduler.stop(), StopOutcome::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sqlite_source_feeds_poll_loop() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = SqliteTaskSource::open(&temp_dir.path().join("tasks.db"))?;
    let now = Local::now().naive_local();

    let late = db.insert(&Task::new(0, "Late", now - ChronoDuration::hours(2)))?;
    let early = db.insert(&Task::new(0, "Later still", now - ChronoDuration::minutes(5)))?;
    db.insert(&Task::new(0, "Tomorrow", now + ChronoDuration::days(1)))?;
    let done = db.insert(&Task::new(0, "Done", now - ChronoDuration::hours(1)))?;
    db.set_completed(done, true)?;

    let source = Arc::new(db);
    let due = source.list_due_tasks()?;
    assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![late, early]);

    let console = CaptureBuffer::new();
    let manager = manager_with(Arc::new(MockSounder::new()), &console);
    let poll = PollLoop::new(source, manager.clone(), PollConfig::default());

    let outcome = poll.poll_once().await?;
    assert_eq!(outcome.due, 2);
    assert_eq!(outcome.delivered, 2);
    assert!(manager.is_task_notified(late));
    assert!(!console.contents().contains("Tomorrow"));
    Ok(())
}

/// A task source that counts how often it is queried.
fn counting_source(calls: Arc<AtomicUsize>) -> Arc<dyn TaskSource> {
    Arc::new(move || -> Result<Vec<Task>> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    })
}

/// `stop` on one thread racing `restart` on another leaves exactly the
/// restarted domain running, and a later `stop` reaches it.
#[test]
fn test_stop_racing_restart_leaves_one_owned_domain() {
    let console = CaptureBuffer::new();
    let sounder = Arc::new(HangingSounder {
        hang: Duration::from_millis(800),
        calls: AtomicUsize::new(0),
    });
    let manager = manager_with(sounder.clone(), &console);
    let config = SchedulerConfig::default()
        .with_poll(PollConfig::default().with_interval(Duration::from_millis(20)))
        .with_stop_timeout(Duration::from_secs(2))
        .with_restart_settle(Duration::from_millis(10));
    let scheduler = Scheduler::new(manager, config);
    let hanging = Arc::new(MemoryTaskSource::with_tasks(vec![Task::new(6, "Hangs", due_at())]));

    scheduler.start(hanging).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sounder.calls.load(Ordering::SeqCst) > 0));

    let polls = Arc::new(AtomicUsize::new(0));
    let first_stop = thread::scope(|s| {
        let stopper = s.spawn(|| scheduler.stop());
        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.restart(counting_source(polls.clone())).unwrap());
        stopper.join().unwrap()
    });
    assert_eq!(first_stop, StopOutcome::Stopped);

    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Running);
    assert!(status.is_running);
    assert_eq!(status.generation, 2);
    assert_eq!(status.live_domains, 1);
    assert!(wait_until(Duration::from_secs(5), || polls.load(Ordering::SeqCst) > 2));

    assert_eq!(scheduler.stop(), StopOutcome::Stopped);
    assert_eq!(scheduler.status().live_domains, 0);
    let after_stop = polls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(polls.load(Ordering::SeqCst), after_stop);
}

/// `force_idle` plus `start` during a slow `stop` is not undone when that
/// stop finally returns.
#[test]
fn test_force_idle_and_start_during_slow_stop() {
    let console = CaptureBuffer::new();
    let sounder = Arc::new(HangingSounder {
        hang: Duration::from_millis(600),
        calls: AtomicUsize::new(0),
    });
    let manager = manager_with(sounder.clone(), &console);
    let config = SchedulerConfig::default().with_stop_timeout(Duration::from_secs(2));
    let scheduler = Scheduler::new(manager, config);
    let hanging = Arc::new(MemoryTaskSource::with_tasks(vec![Task::new(7, "Hangs too", due_at())]));

    scheduler.start(hanging).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sounder.calls.load(Ordering::SeqCst) > 0));

    thread::scope(|s| {
        let stopper = s.spawn(|| scheduler.stop());
        thread::sleep(Duration::from_millis(20));
        scheduler.force_idle();
        assert!(scheduler.start(Arc::new(MemoryTaskSource::new())).unwrap());
        assert_eq!(stopper.join().unwrap(), StopOutcome::Stopped);
    });

    let status = scheduler.status();
    assert!(status.is_running);
    assert_eq!(status.generation, 2);
    assert_eq!(status.live_domains, 1);

    assert_eq!(scheduler.stop(), StopOutcome::Stopped);
    assert_eq!(scheduler.status().live_domains, 0);
}
