//! 应用装配 - 从配置解析 tracker、构建 dispatcher 与状态存储

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, TrackerConfig};
use crate::notification::{NotificationBuilder, NotificationDispatcher};
use crate::poll::{CycleOptions, IntervalPolicy, PollCycle, Scheduler};
use crate::seen_store::SeenStore;
use crate::tracker::discovery::merge_trackers;
use crate::tracker::{
    discover_trackers, Credentials, HttpSettings, TrackerContext, TrackerHandle, TrackerRegistry,
};

/// 运行所需的全部组件
pub struct App {
    pub config: AppConfig,
    pub trackers: Vec<TrackerHandle>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub store: SeenStore,
    pub dry_run: bool,
}

impl App {
    /// 按配置装配；`dry_run` 时 sink 不会被调用，状态不落盘
    pub fn from_config(config: AppConfig, dry_run: bool) -> Result<Self> {
        let registry = TrackerRegistry::with_builtins();
        let trackers = resolve_trackers(&config, &registry);
        let dispatcher = NotificationBuilder::from_config(&config)
            .dry_run(dry_run)
            .build()?;
        let store = SeenStore::new(config.state_dir());

        info!(
            trackers = trackers.len(),
            sinks = dispatcher.channel_count(),
            state_dir = %store.root().display(),
            dry_run,
            "Application assembled"
        );

        Ok(Self {
            config,
            trackers,
            dispatcher: Arc::new(dispatcher),
            store,
            dry_run,
        })
    }

    /// 全局间隔策略（未应用单个 tracker 的下限）
    pub fn interval_policy(&self) -> IntervalPolicy {
        IntervalPolicy::new(self.config.global_interval(), self.config.jitter_ratio())
    }

    pub fn poll_cycle(&self) -> PollCycle {
        PollCycle::new(
            Arc::clone(&self.dispatcher),
            self.store.clone(),
            CycleOptions {
                mark_as_read: self.config.mark_as_read,
                dry_run: self.dry_run,
                retention: self.config.retention(),
            },
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.trackers.clone(), self.poll_cycle(), self.interval_policy())
    }

    /// 按名称或 ID 查找 tracker（大小写不敏感）
    pub fn find_tracker(&self, name: &str) -> Option<&TrackerHandle> {
        self.trackers
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name) || t.id.eq_ignore_ascii_case(name))
    }
}

/// 合并显式配置与 cookie 目录发现结果并实例化
///
/// 无法构建的条目只记录警告；名称冲突时保留先出现的条目，
/// 保证每个 tracker 拥有独立的状态目录。
pub fn resolve_trackers(config: &AppConfig, registry: &TrackerRegistry) -> Vec<TrackerHandle> {
    let discovered = discover_trackers(&config.cookies_dir, registry);
    let http = config.http_settings();

    let mut seen_ids = HashSet::new();
    let mut handles = Vec::new();
    for entry in merge_trackers(&config.trackers, discovered) {
        if !entry.enabled {
            info!(kind = %entry.kind, name = ?entry.name, "Tracker disabled, skipping");
            continue;
        }
        let Some(handle) = build_tracker(config, registry, &http, entry) else {
            continue;
        };
        if !seen_ids.insert(handle.id.clone()) {
            warn!(
                tracker = %handle.name(),
                id = %handle.id,
                "Duplicate tracker name, skipping"
            );
            continue;
        }
        handles.push(handle);
    }
    handles
}

fn build_tracker(
    config: &AppConfig,
    registry: &TrackerRegistry,
    http: &HttpSettings,
    mut entry: TrackerConfig,
) -> Option<TrackerHandle> {
    if entry.api_token.is_none() {
        entry.api_token = config.api_token_for(&entry.kind);
    }

    let session = match registry.build(&TrackerContext {
        config: &entry,
        http,
    }) {
        Ok(session) => session,
        Err(e) => {
            warn!(kind = %entry.kind, name = ?entry.name, error = %e, "Cannot build tracker");
            return None;
        }
    };

    let credentials = Credentials {
        cookie_file: entry.cookie_file.clone(),
        api_token: entry.api_token.clone(),
    };
    Some(TrackerHandle::new(session, credentials).with_interval_override(entry.interval_override()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .aither.cc\tTRUE\t/\tTRUE\t1999999999\tlaravel_session\tabc\n";

    fn config_with_cookies(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.cookies_dir = dir.path().to_path_buf();
        config.state_dir = Some(dir.path().join("state"));
        config
    }

    #[test]
    fn test_resolve_discovered_and_explicit() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("UNIT3D")).unwrap();
        fs::write(dir.path().join("UNIT3D/aither.txt"), COOKIES).unwrap();

        let mut config = config_with_cookies(&dir);
        config
            .trackers
            .push(TrackerConfig::new("orpheus").with_name("OPS"));
        config.api_tokens.insert("Orpheus".into(), "tok".into());

        let trackers = resolve_trackers(&config, &TrackerRegistry::with_builtins());
        let names: Vec<&str> = trackers.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["OPS", "Aither"]);
        assert_eq!(trackers[0].credentials.api_token.as_deref(), Some("tok"));
        assert!(trackers[1].credentials.cookie_file.is_some());
    }

    #[test]
    fn test_unknown_and_disabled_trackers_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_cookies(&dir);
        config.trackers.push(TrackerConfig::new("NoSuchEngine"));
        let mut disabled = TrackerConfig::new("TorrentLeech");
        disabled.enabled = false;
        config.trackers.push(disabled);

        let trackers = resolve_trackers(&config, &TrackerRegistry::with_builtins());
        assert!(trackers.is_empty());
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_cookies(&dir);
        let mut first = TrackerConfig::new("TorrentLeech");
        first.interval_secs = Some(3600);
        config.trackers.push(first);
        config.trackers.push(TrackerConfig::new("torrentleech"));

        let trackers = resolve_trackers(&config, &TrackerRegistry::with_builtins());
        assert_eq!(trackers.len(), 1);
        assert_eq!(
            trackers[0].interval_override,
            Some(std::time::Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_find_tracker_by_name_or_id() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_cookies(&dir);
        config.trackers.push(TrackerConfig::new("TorrentLeech"));

        let app = App::from_config(config, true).unwrap();
        assert!(app.find_tracker("torrentleech").is_some());
        assert!(app.find_tracker("missing").is_none());
        assert!(app.dispatcher.is_dry_run());
    }
}
