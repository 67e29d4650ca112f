//! Scheduler - one independent polling task per tracker

use futures::future::join_all;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cycle::{CycleReport, PollCycle};
use super::interval::IntervalPolicy;
use crate::seen_store::{SeenStore, TrackerRecords};
use crate::tracker::TrackerHandle;

/// Drives every configured tracker on its own interval
///
/// A slow or failing tracker never delays another one: each tracker gets its
/// own task, its own records and its own timer.
pub struct Scheduler {
    trackers: Vec<TrackerHandle>,
    cycle: PollCycle,
    policy: IntervalPolicy,
}

impl Scheduler {
    pub fn new(trackers: Vec<TrackerHandle>, cycle: PollCycle, policy: IntervalPolicy) -> Self {
        Self {
            trackers,
            cycle,
            policy,
        }
    }

    pub fn trackers(&self) -> &[TrackerHandle] {
        &self.trackers
    }

    /// Policy after applying the tracker's own minimum and override
    pub fn policy_for(&self, tracker: &TrackerHandle) -> IntervalPolicy {
        self.policy
            .for_tracker(tracker.session.minimum_interval(), tracker.interval_override)
    }

    /// Poll until `cancel` fires, then wait for every task to wind down
    pub async fn run(&self, cancel: CancellationToken) {
        if self.trackers.is_empty() {
            warn!("No trackers configured, nothing to poll");
            return;
        }

        let tasks: Vec<(String, JoinHandle<()>)> = self
            .trackers
            .iter()
            .map(|tracker| {
                let policy = self.policy_for(tracker);
                info!(
                    tracker = %tracker.name(),
                    kind = %tracker.session.kind(),
                    interval_secs = policy.effective().as_secs(),
                    "Scheduling tracker"
                );
                let handle = tokio::spawn(tracker_loop(
                    tracker.clone(),
                    self.cycle.clone(),
                    policy,
                    cancel.clone(),
                ));
                (tracker.name().to_string(), handle)
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (name, result) in names.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                // no restart: the remaining trackers keep running until shutdown
                error!(tracker = %name, error = %e, "Tracker task terminated abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    /// One cycle for every tracker, concurrently, without waiting for intervals
    pub async fn run_once(&self, cancel: &CancellationToken) -> Vec<CycleReport> {
        let runs = self.trackers.iter().map(|tracker| async move {
            let mut records = load_records(self.cycle.store(), tracker).await;
            let report = self.cycle.run(tracker, &mut records, cancel).await;
            report.log();
            report
        });
        join_all(runs).await
    }
}

async fn tracker_loop(
    tracker: TrackerHandle,
    cycle: PollCycle,
    policy: IntervalPolicy,
    cancel: CancellationToken,
) {
    let mut records = load_records(cycle.store(), &tracker).await;

    let last_run = cycle.store().last_run(&tracker.id);
    let first = policy.startup_delay(last_run);
    info!(
        tracker = %tracker.name(),
        delay_secs = first.as_secs(),
        "First poll scheduled"
    );
    if !sleep_or_cancel(first, &cancel).await {
        return;
    }

    loop {
        let report = cycle.run(&tracker, &mut records, &cancel).await;
        report.log();
        if cancel.is_cancelled() {
            break;
        }

        let delay = policy.next_delay();
        info!(
            tracker = %tracker.name(),
            delay_secs = delay.as_secs(),
            "Next poll scheduled"
        );
        if !sleep_or_cancel(delay, &cancel).await {
            break;
        }
    }
    info!(tracker = %tracker.name(), "Tracker stopped");
}

/// Returns false when cancelled before the delay elapsed
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Load both records; unreadable state falls back to an empty, un-baselined record
async fn load_records(store: &SeenStore, tracker: &TrackerHandle) -> TrackerRecords {
    let store = store.clone();
    let tracker_id = tracker.id.clone();
    let loaded = tokio::task::spawn_blocking(move || store.load_all(&tracker_id)).await;

    match loaded {
        Ok(Ok(records)) => records,
        Ok(Err(e)) => {
            warn!(tracker = %tracker.name(), error = %e, "Failed to load state, starting fresh");
            TrackerRecords::default()
        }
        Err(e) => {
            warn!(tracker = %tracker.name(), error = %e, "State loader failed, starting fresh");
            TrackerRecords::default()
        }
    }
}
