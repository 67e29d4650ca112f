//! run / once 命令 - 守护轮询与单次轮询

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::app::App;
use super::output::format_json;
use crate::poll::{CycleOutcome, CycleReport};

/// once 命令参数
#[derive(Args)]
pub struct OnceArgs {
    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

/// 单个 tracker 的轮询结果
#[derive(Debug, Serialize)]
pub struct OnceSummary {
    pub tracker: String,
    pub status: String,
    pub fetched: usize,
    pub new: usize,
    pub delivered: usize,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CycleReport> for OnceSummary {
    fn from(report: &CycleReport) -> Self {
        let (status, error) = match &report.outcome {
            CycleOutcome::Completed if !report.baselined.is_empty() => ("baseline", None),
            CycleOutcome::Completed => ("ok", None),
            CycleOutcome::AuthFailed(e) => ("auth_failed", Some(e.clone())),
            CycleOutcome::FetchFailed(e) => ("fetch_failed", Some(e.clone())),
            CycleOutcome::PersistFailed(e) => ("persist_failed", Some(e.clone())),
            CycleOutcome::Cancelled => ("cancelled", None),
        };
        Self {
            tracker: report.tracker.clone(),
            status: status.to_string(),
            fetched: report.fetched,
            new: report.new_items,
            delivered: report.delivered,
            persisted: report.persisted,
            error,
        }
    }
}

/// 处理 run 命令：轮询直到收到取消信号
pub async fn handle_run(app: &App, cancel: CancellationToken) -> Result<()> {
    if app.trackers.is_empty() {
        bail!(
            "no trackers found: add cookie files under {} or entries to `trackers`",
            app.config.cookies_dir.display()
        );
    }
    info!(trackers = app.trackers.len(), "Starting scheduler");
    app.scheduler().run(cancel).await;
    Ok(())
}

/// 处理 once 命令：所有 tracker 并发执行一次
pub async fn handle_once(app: &App, args: OnceArgs, cancel: CancellationToken) -> Result<()> {
    let reports = app.scheduler().run_once(&cancel).await;
    let summaries: Vec<OnceSummary> = reports.iter().map(OnceSummary::from).collect();

    if args.json {
        println!("{}", format_json(&summaries));
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No trackers configured.");
        return Ok(());
    }
    println!(
        "{:<20} {:<13} {:>7} {:>5} {:>9}",
        "TRACKER", "STATUS", "FETCHED", "NEW", "DELIVERED"
    );
    for s in &summaries {
        println!(
            "{:<20} {:<13} {:>7} {:>5} {:>9}",
            s.tracker, s.status, s.fetched, s.new, s.delivered
        );
        if let Some(error) = &s.error {
            println!("  └─ {error}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Category;

    fn report(outcome: CycleOutcome) -> CycleReport {
        CycleReport {
            tracker: "Aither".into(),
            outcome,
            last_state: crate::poll::CycleState::Idle,
            fetched: 3,
            baselined: Vec::new(),
            new_items: 1,
            delivered: 1,
            failed_deliveries: 0,
            persisted: true,
            compacted: 0,
            marked_read: 0,
            started_at: chrono::Utc::now(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_summary_status() {
        let ok = OnceSummary::from(&report(CycleOutcome::Completed));
        assert_eq!(ok.status, "ok");
        assert!(ok.error.is_none());

        let mut baseline = report(CycleOutcome::Completed);
        baseline.baselined = vec![Category::Notification];
        assert_eq!(OnceSummary::from(&baseline).status, "baseline");

        let failed = OnceSummary::from(&report(CycleOutcome::FetchFailed("timeout".into())));
        assert_eq!(failed.status, "fetch_failed");
        assert_eq!(failed.error.as_deref(), Some("timeout"));

        let mut unsaved = report(CycleOutcome::PersistFailed("read-only file system".into()));
        unsaved.persisted = false;
        let unsaved = OnceSummary::from(&unsaved);
        assert_eq!(unsaved.status, "persist_failed");
        assert_eq!(unsaved.error.as_deref(), Some("read-only file system"));
    }
}
