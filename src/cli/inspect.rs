//! trackers / state / test-sinks 命令

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use super::app::App;
use super::output::{format_interval, format_json};
use crate::notification::SinkMessage;
use crate::seen_store::SeenRecord;
use crate::tracker::Category;

/// 最近条目的显示数量
const RECENT_LIMIT: usize = 10;

/// trackers 命令参数
#[derive(Args)]
pub struct TrackersArgs {
    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

/// state 命令参数
#[derive(Args)]
pub struct StateArgs {
    /// Tracker 名称或 ID
    pub tracker: String,
    /// 输出 JSON 格式
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct TrackerInfo {
    pub name: String,
    pub id: String,
    pub kind: String,
    pub base_url: String,
    pub interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StateView {
    pub tracker: String,
    pub id: String,
    pub last_run: Option<DateTime<Utc>>,
    pub notifications: SeenRecord,
    pub messages: SeenRecord,
}

/// 处理 trackers 命令
pub fn handle_trackers(app: &App, args: TrackersArgs) -> Result<()> {
    let scheduler = app.scheduler();
    let infos: Vec<TrackerInfo> = app
        .trackers
        .iter()
        .map(|tracker| TrackerInfo {
            name: tracker.name().to_string(),
            id: tracker.id.clone(),
            kind: tracker.session.kind().to_string(),
            base_url: tracker.session.base_url().to_string(),
            interval_secs: scheduler.policy_for(tracker).effective().as_secs(),
            cookie_file: tracker
                .credentials
                .cookie_file
                .as_ref()
                .map(|p| p.display().to_string()),
            last_run: app.store.last_run(&tracker.id),
        })
        .collect();

    if args.json {
        println!("{}", format_json(&infos));
        return Ok(());
    }

    if infos.is_empty() {
        println!("No trackers found in {}", app.config.cookies_dir.display());
        return Ok(());
    }
    println!("{:<20} {:<13} {:<9} {:<20} URL", "NAME", "KIND", "INTERVAL", "LAST RUN");
    for info in &infos {
        let last_run = info
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<13} {:<9} {:<20} {}",
            info.name,
            info.kind,
            format_interval(std::time::Duration::from_secs(info.interval_secs)),
            last_run,
            info.base_url
        );
    }
    Ok(())
}

/// 处理 state 命令
pub fn handle_state(app: &App, args: StateArgs) -> Result<()> {
    let tracker = app
        .find_tracker(&args.tracker)
        .ok_or_else(|| anyhow!("unknown tracker: {}", args.tracker))?;
    let records = app.store.load_all(&tracker.id)?;

    let view = StateView {
        tracker: tracker.name().to_string(),
        id: tracker.id.clone(),
        last_run: app.store.last_run(&tracker.id),
        notifications: records.notifications,
        messages: records.messages,
    };

    if args.json {
        println!("{}", format_json(&view));
        return Ok(());
    }

    println!("Tracker:  {} ({})", view.tracker, view.id);
    println!(
        "Last run: {}",
        view.last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    print_record(Category::Notification, &view.notifications);
    print_record(Category::Message, &view.messages);
    Ok(())
}

fn print_record(category: Category, record: &SeenRecord) {
    println!();
    println!(
        "{}: {} seen, baseline {}",
        category.label(),
        record.len(),
        if record.baseline_established { "established" } else { "pending" }
    );

    let mut recent: Vec<(&String, &DateTime<Utc>)> = record.seen.iter().collect();
    recent.sort_by(|a, b| b.1.cmp(a.1));
    for (id, first_seen) in recent.into_iter().take(RECENT_LIMIT) {
        println!("  {:<24} {}", id, first_seen.format("%Y-%m-%d %H:%M"));
    }
}

/// 处理 test-sinks 命令：向每个 sink 发送一条测试消息
pub async fn handle_test_sinks(app: &App) -> Result<()> {
    if app.dispatcher.channel_count() == 0 {
        bail!("no usable sink configured");
    }

    let message = SinkMessage::test("tracker-notifier");
    let results = app.dispatcher.dispatch(&message).await;

    let mut failed = 0;
    for (channel, outcome) in &results {
        println!("{channel:<10} {outcome:?}");
        if outcome.is_failed() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} sinks failed", results.len());
    }
    Ok(())
}
