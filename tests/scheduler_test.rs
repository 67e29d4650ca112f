mod common;

use chrono::Utc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{dispatcher_with, handle, MockTracker, RecordingSink};
use tracker_notifier::poll::{CycleOptions, CycleOutcome, IntervalPolicy, PollCycle, Scheduler};
use tracker_notifier::seen_store::SeenStore;

const INTERVAL: Duration = Duration::from_secs(900);

fn cycle(dir: &TempDir) -> PollCycle {
    PollCycle::new(
        dispatcher_with(vec![RecordingSink::new("recording")]),
        SeenStore::new(dir.path()),
        CycleOptions::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_trackers_poll_independently() {
    let dir = TempDir::new().unwrap();
    let healthy = MockTracker::new("Aither");
    let failing = MockTracker::new("Blutopia");
    failing.fail_fetch(true);
    let slow = MockTracker::with_minimum("OPS", Duration::from_secs(3600));

    let scheduler = Scheduler::new(
        vec![handle(&healthy), handle(&failing), handle(&slow)],
        cycle(&dir),
        IntervalPolicy::new(INTERVAL, 0.0),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    // 启动分散 <= 30s，之后每 900s 一次
    tokio::time::sleep(Duration::from_secs(31 + 900 * 2 + 10)).await;

    assert_eq!(healthy.fetch_count(), 3);
    // 失败不会终止该 tracker 的循环
    assert_eq!(failing.fetch_count(), 3);
    // 站点自身的下限高于全局间隔
    assert_eq!(slow.fetch_count(), 1);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_startup_honours_last_run() {
    let dir = TempDir::new().unwrap();
    let tracker = MockTracker::new("Aither");
    let handle = handle(&tracker);

    let store = SeenStore::new(dir.path());
    store
        .record_run(&handle.id, Utc::now() - chrono::Duration::seconds(600))
        .unwrap();

    let scheduler = Scheduler::new(vec![handle], cycle(&dir), IntervalPolicy::new(INTERVAL, 0.0));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    // 剩余约 300s
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(tracker.fetch_count(), 0);

    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(tracker.fetch_count(), 1);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_waiting_tasks() {
    let dir = TempDir::new().unwrap();
    let tracker = MockTracker::new("Aither");
    let scheduler = Scheduler::new(
        vec![handle(&tracker)],
        cycle(&dir),
        IntervalPolicy::new(INTERVAL, 0.0),
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tracker.fetch_count(), 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scheduler should stop promptly")
        .unwrap();
    assert_eq!(tracker.fetch_count(), 1);
}

#[tokio::test]
async fn test_run_once_polls_every_tracker() {
    let dir = TempDir::new().unwrap();
    let ok = MockTracker::new("Aither");
    ok.set_notifications(&["n1"]);
    let broken = MockTracker::new("Blutopia");
    broken.fail_auth(true);

    let ok_id = handle(&ok).id;
    let scheduler = Scheduler::new(
        vec![handle(&ok), handle(&broken)],
        cycle(&dir),
        IntervalPolicy::new(INTERVAL, 0.0),
    );
    let reports = scheduler.run_once(&CancellationToken::new()).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].tracker, "Aither");
    assert_eq!(reports[0].outcome, CycleOutcome::Completed);
    assert!(matches!(reports[1].outcome, CycleOutcome::AuthFailed(_)));

    // 状态已写入，下次 run_once 从磁盘继续
    let store = SeenStore::new(dir.path());
    assert!(store.load_all(&ok_id).unwrap().notifications.baseline_established);
}

#[test]
fn test_policy_for_tracker_applies_minimum_and_override() {
    let dir = TempDir::new().unwrap();
    let slow = MockTracker::with_minimum("OPS", Duration::from_secs(3600));
    let overridden = handle(&MockTracker::new("Aither"))
        .with_interval_override(Some(Duration::from_secs(7200)));
    let scheduler = Scheduler::new(
        vec![handle(&slow), overridden.clone()],
        cycle(&dir),
        IntervalPolicy::new(INTERVAL, 0.05),
    );

    assert_eq!(
        scheduler.policy_for(&scheduler.trackers()[0]).effective(),
        Duration::from_secs(3600)
    );
    assert_eq!(scheduler.policy_for(&overridden).effective(), Duration::from_secs(7200));
}
