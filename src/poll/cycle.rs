//! Poll cycle - authenticate, fetch, diff, dispatch, persist for one tracker

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notification::{NotificationDispatcher, SinkMessage};
use crate::seen_store::{SeenStore, TrackerRecords};
use crate::tracker::{Category, Item, Session, TrackerHandle};

/// Steps of a single cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Authenticating,
    Fetching,
    Diffing,
    Dispatching,
    Persisting,
    Errored,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Authenticating => "authenticating",
            CycleState::Fetching => "fetching",
            CycleState::Diffing => "diffing",
            CycleState::Dispatching => "dispatching",
            CycleState::Persisting => "persisting",
            CycleState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    AuthFailed(String),
    FetchFailed(String),
    /// Items were dispatched but the records could not be written
    PersistFailed(String),
    /// Shutdown observed before dispatch started
    Cancelled,
}

/// Summary of one cycle, logged by the scheduler
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub tracker: String,
    pub outcome: CycleOutcome,
    pub last_state: CycleState,
    pub fetched: usize,
    /// Categories whose baseline was established in this cycle
    pub baselined: Vec<Category>,
    pub new_items: usize,
    /// Items accepted by at least one sink
    pub delivered: usize,
    /// Sink-level delivery failures
    pub failed_deliveries: usize,
    pub persisted: bool,
    pub compacted: usize,
    pub marked_read: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl CycleReport {
    fn new(tracker: &str) -> Self {
        Self {
            tracker: tracker.to_string(),
            outcome: CycleOutcome::Completed,
            last_state: CycleState::Idle,
            fetched: 0,
            baselined: Vec::new(),
            new_items: 0,
            delivered: 0,
            failed_deliveries: 0,
            persisted: false,
            compacted: 0,
            marked_read: 0,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }

    /// Write the report to the log at a level matching the outcome
    pub fn log(&self) {
        match &self.outcome {
            CycleOutcome::Completed if !self.baselined.is_empty() => info!(
                tracker = %self.tracker,
                fetched = self.fetched,
                categories = ?self.baselined,
                persisted = self.persisted,
                "Baseline established, existing items will not be sent"
            ),
            CycleOutcome::Completed => info!(
                tracker = %self.tracker,
                fetched = self.fetched,
                new = self.new_items,
                delivered = self.delivered,
                failed = self.failed_deliveries,
                persisted = self.persisted,
                marked_read = self.marked_read,
                elapsed_ms = self.elapsed_ms,
                "Cycle complete"
            ),
            CycleOutcome::AuthFailed(reason) => warn!(
                tracker = %self.tracker,
                error = %reason,
                "Authentication failed, retrying next interval"
            ),
            CycleOutcome::FetchFailed(reason) => warn!(
                tracker = %self.tracker,
                error = %reason,
                "Fetch failed, state unchanged"
            ),
            CycleOutcome::PersistFailed(reason) => error!(
                tracker = %self.tracker,
                new = self.new_items,
                delivered = self.delivered,
                error = %reason,
                "Failed to persist state; items may be sent again after a restart"
            ),
            CycleOutcome::Cancelled => info!(
                tracker = %self.tracker,
                state = %self.last_state,
                "Cycle cancelled"
            ),
        }
    }
}

/// Per-cycle behaviour switches
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    pub mark_as_read: bool,
    /// Keep records in memory only; nothing is written and nothing is marked read
    pub dry_run: bool,
    /// Seen ids older than this and absent from the current fetch are pruned
    pub retention: Option<chrono::Duration>,
}

/// Runs cycles for any tracker; each tracker task owns its own records
#[derive(Clone)]
pub struct PollCycle {
    dispatcher: Arc<NotificationDispatcher>,
    store: SeenStore,
    options: CycleOptions,
}

impl PollCycle {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, store: SeenStore, options: CycleOptions) -> Self {
        Self {
            dispatcher,
            store,
            options,
        }
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Run one cycle
    ///
    /// Cancellation is checked between steps until dispatch starts; a
    /// request already in flight runs to completion or timeout. Once dispatch
    /// has started the cycle always finishes dispatch and persist.
    pub async fn run(
        &self,
        tracker: &TrackerHandle,
        records: &mut TrackerRecords,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(tracker.name());
        self.run_steps(tracker, records, cancel, &mut report).await;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn run_steps(
        &self,
        tracker: &TrackerHandle,
        records: &mut TrackerRecords,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) {
        let name = tracker.name();

        // Authenticating
        if cancelled(cancel, report) {
            return;
        }
        enter(report, CycleState::Authenticating, name);
        let session = match tracker.session.authenticate(&tracker.credentials).await {
            Ok(session) => session,
            Err(e) => {
                report.outcome = CycleOutcome::AuthFailed(e.to_string());
                report.last_state = CycleState::Errored;
                return;
            }
        };

        // Fetching
        if cancelled(cancel, report) {
            return;
        }
        enter(report, CycleState::Fetching, name);
        let fetched = match fetch_all(tracker, &session).await {
            Ok(fetched) => fetched,
            Err(reason) => {
                report.outcome = CycleOutcome::FetchFailed(reason);
                report.last_state = CycleState::Errored;
                return;
            }
        };
        report.fetched = fetched.iter().map(|(_, items)| items.len()).sum();

        // Diffing
        if cancelled(cancel, report) {
            return;
        }
        enter(report, CycleState::Diffing, name);
        let mut new_items: Vec<Item> = Vec::new();
        for (category, items) in &fetched {
            let record = records.get(*category);
            if !record.baseline_established {
                report.baselined.push(*category);
                continue;
            }
            new_items.extend(items.iter().filter(|item| record.is_new(&item.id)).cloned());
        }
        report.new_items = new_items.len();

        // Last point where shutdown is honoured
        if cancelled(cancel, report) {
            return;
        }

        // Dispatching
        enter(report, CycleState::Dispatching, name);
        let fallback_link = tracker.session.base_url().to_string();
        let icon_url = tracker.session.icon_url();
        for item in &new_items {
            let message =
                SinkMessage::from_item(name, item, &fallback_link).with_icon_url(icon_url.clone());
            info!(
                tracker = %name,
                category = %item.category,
                id = %item.id,
                title = %item.title,
                "New item"
            );
            let results = self.dispatcher.dispatch(&message).await;
            if results.iter().any(|(_, outcome)| outcome.is_delivered()) {
                report.delivered += 1;
            }
            report.failed_deliveries += results.iter().filter(|(_, o)| o.is_failed()).count();
        }

        // Persisting
        enter(report, CycleState::Persisting, name);
        let now = Utc::now();
        for (category, items) in &fetched {
            let record = records.get_mut(*category);
            let current: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
            for id in &current {
                record.mark_seen(id, now);
            }
            record.establish_baseline();
            record.updated_at = Some(now);
            report.compacted += record.compact(now, self.options.retention, &current);
        }
        if self.options.dry_run {
            debug!(tracker = %name, "Dry run, state not written");
        } else if let Err(reason) = self.persist(tracker, records, now).await {
            report.outcome = CycleOutcome::PersistFailed(reason);
            report.last_state = CycleState::Errored;
            return;
        } else {
            report.persisted = true;
        }

        if self.options.mark_as_read && report.persisted {
            report.marked_read = self.mark_read(tracker, &session, &new_items).await;
        }
        report.last_state = CycleState::Idle;
    }

    async fn persist(
        &self,
        tracker: &TrackerHandle,
        records: &TrackerRecords,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let store = self.store.clone();
        let tracker_id = tracker.id.clone();
        let snapshot = records.clone();
        let result =
            tokio::task::spawn_blocking(move || store.persist_all(&tracker_id, &snapshot, now))
                .await;

        match result {
            Ok(Ok(())) => {
                debug!(tracker = %tracker.name(), "State persisted");
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("persist task failed: {e}")),
        }
    }

    async fn mark_read(&self, tracker: &TrackerHandle, session: &Session, items: &[Item]) -> usize {
        let mut marked = 0;
        for item in items {
            match tracker.session.mark_read(session, item).await {
                Ok(()) => marked += 1,
                Err(e) => warn!(
                    tracker = %tracker.name(),
                    id = %item.id,
                    error = %e,
                    "Failed to mark item as read"
                ),
            }
        }
        marked
    }
}

/// Fetch both categories; either failing aborts the cycle.
/// Ids repeated within one fetch are collapsed to their first occurrence.
async fn fetch_all(
    tracker: &TrackerHandle,
    session: &Session,
) -> Result<Vec<(Category, Vec<Item>)>, String> {
    let notifications = tracker
        .session
        .fetch_notifications(session)
        .await
        .map_err(|e| format!("notifications: {e}"))?;
    let messages = tracker
        .session
        .fetch_messages(session)
        .await
        .map_err(|e| format!("messages: {e}"))?;

    Ok(vec![
        (Category::Notification, unique_by_id(notifications)),
        (Category::Message, unique_by_id(messages)),
    ])
}

fn unique_by_id(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

fn enter(report: &mut CycleReport, state: CycleState, tracker: &str) {
    debug!(tracker = %tracker, from = %report.last_state, to = %state, "Cycle step");
    report.last_state = state;
}

fn cancelled(cancel: &CancellationToken, report: &mut CycleReport) -> bool {
    if cancel.is_cancelled() {
        report.outcome = CycleOutcome::Cancelled;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_by_id_keeps_first() {
        let items = vec![
            Item::notification("n1", "first"),
            Item::notification("n2", "second"),
            Item::notification("n1", "duplicate"),
        ];
        let unique = unique_by_id(items);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].title, "first");
    }

    #[test]
    fn test_report_defaults() {
        let report = CycleReport::new("Aither");
        assert!(report.is_success());
        assert_eq!(report.last_state, CycleState::Idle);

        let mut failed = CycleReport::new("Aither");
        failed.outcome = CycleOutcome::PersistFailed("disk full".into());
        assert!(!failed.is_success());
        assert_eq!(CycleState::Dispatching.to_string(), "dispatching");
    }
}
