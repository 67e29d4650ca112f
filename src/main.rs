//! Tracker Notifier CLI
//!
//! 轮询私有 tracker 的通知与私信，并转发到 Telegram / Discord / webhook

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use tracker_notifier::cli::{
    handle_once, handle_run, handle_state, handle_test_sinks, handle_trackers, App, OnceArgs,
    StateArgs, TrackersArgs,
};
use tracker_notifier::config::AppConfig;

#[derive(Parser)]
#[command(name = "ptn")]
#[command(about = "Tracker Notifier - 私有 tracker 通知转发")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/tracker-notifier/config.json）
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// 只记录日志，不调用 sink，不写状态
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 持续轮询，直到 Ctrl-C
    Run,
    /// 所有 tracker 各轮询一次
    Once(OnceArgs),
    /// 列出解析到的 tracker 及有效间隔
    Trackers(TrackersArgs),
    /// 查看 tracker 的已见记录
    State(StateArgs),
    /// 向所有 sink 发送测试消息
    TestSinks,
}

/// Ctrl-C 触发取消
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight cycles"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        trigger.cancel();
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tracker_notifier=info,ptn=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    // 只查看本地状态的命令不要求配置 sink
    if matches!(cli.command, Commands::Run | Commands::Once(_) | Commands::TestSinks) {
        config.validate().context("configuration is not usable")?;
    }
    let app = App::from_config(config, cli.dry_run)?;

    match cli.command {
        Commands::Run => handle_run(&app, shutdown_token()).await,
        Commands::Once(args) => handle_once(&app, args, shutdown_token()).await,
        Commands::Trackers(args) => handle_trackers(&app, args),
        Commands::State(args) => handle_state(&app, args),
        Commands::TestSinks => handle_test_sinks(&app).await,
    }
}
