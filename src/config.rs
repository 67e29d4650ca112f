//! 配置 - 从 JSON 文件加载运行参数、sink 与 tracker 列表
//!
//! 默认路径 `~/.config/tracker-notifier/config.json`，
//! 所有字段都有默认值，只需填写 sink 凭据即可运行。

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::notification::dispatcher::RetryConfig;
use crate::poll::interval::{HARD_FLOOR, MAX_INTERVAL};
use crate::tracker::http::{HttpSettings, DEFAULT_USER_AGENT};
use crate::tracker::types::Category;

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 1800;
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_REQUEST_DELAY_SECS: f64 = 5.0;
const DEFAULT_JITTER_RATIO: f64 = 0.05;
const MAX_JITTER_RATIO: f64 = 0.25;
const DEFAULT_RETENTION_DAYS: u64 = 180;

/// 配置目录
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tracker-notifier")
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 全局轮询间隔（秒），低于 900 会被提升
    pub check_interval_secs: u64,
    /// 投递后在站点上标记已读
    pub mark_as_read: bool,
    /// 单个 HTTP 请求超时（秒）
    pub timeout_secs: f64,
    /// 同一 tracker 相邻请求的最小间隔（秒）
    pub request_delay_secs: f64,
    /// 调度抖动比例
    pub jitter_ratio: f64,
    /// 已见 ID 保留天数，`null` 表示永久保留
    pub retention_days: Option<u64>,
    /// cookie 目录（按 tracker 分子目录）
    pub cookies_dir: PathBuf,
    /// 状态目录，缺省为配置目录下的 `state`
    pub state_dir: Option<PathBuf>,
    /// tracker 类型 -> API token
    pub api_tokens: HashMap<String, String>,
    pub dispatch: DispatchSettings,
    pub sinks: SinksConfig,
    /// 显式配置的 tracker（与 cookie 目录发现的合并）
    pub trackers: Vec<TrackerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            mark_as_read: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            request_delay_secs: DEFAULT_REQUEST_DELAY_SECS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            retention_days: Some(DEFAULT_RETENTION_DAYS),
            cookies_dir: PathBuf::from("./cookies"),
            state_dir: None,
            api_tokens: HashMap::new(),
            dispatch: DispatchSettings::default(),
            sinks: SinksConfig::default(),
            trackers: Vec::new(),
        }
    }
}

/// 投递重试与节奏
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 相邻两条通知之间的间隔（毫秒），避免触发聊天 API 限流
    pub item_spacing_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            item_spacing_ms: 3000,
        }
    }
}

/// 所有 sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub telegram: Option<TelegramSinkConfig>,
    pub discord: Option<DiscordSinkConfig>,
    pub webhook: Option<WebhookSinkConfig>,
}

impl SinksConfig {
    /// 已启用的 sink 数量
    pub fn enabled_count(&self) -> usize {
        let telegram = self.telegram.as_ref().is_some_and(|t| t.is_usable());
        let discord = self.discord.as_ref().is_some_and(|d| d.is_usable());
        let webhook = self.webhook.as_ref().is_some_and(|w| w.is_usable());
        [telegram, discord, webhook].iter().filter(|&&on| on).count()
    }
}

fn default_true() -> bool {
    true
}

/// Telegram Bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    /// 论坛话题 ID
    #[serde(default)]
    pub topic_id: Option<String>,
    /// 只投递这些类别（为空表示全部）
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl TelegramSinkConfig {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// Discord Webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl DiscordSinkConfig {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.webhook_url.is_empty()
    }
}

/// 通用 JSON Webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSinkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    /// Bearer token（可选）
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl WebhookSinkConfig {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }
}

/// 单个 tracker 实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 实例名称；缺省时由实现推导（如 UNIT3D 取 cookie 域名）
    #[serde(default)]
    pub name: Option<String>,
    /// 注册表中的实现名称
    pub kind: String,
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// 覆盖轮询间隔（秒），只能提高不能降低
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TrackerConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: kind.into(),
            cookie_file: None,
            api_token: None,
            base_url: None,
            interval_secs: None,
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_file = Some(path.into());
        self
    }

    /// 超过上限的值会被截断
    pub fn interval_override(&self) -> Option<Duration> {
        self.interval_secs.map(|secs| cap_interval("interval_secs", secs))
    }
}

impl AppConfig {
    /// 从指定路径（或默认路径）加载
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        if !path.exists() {
            bail!(
                "config file not found: {} (create it with at least one sink configured)",
                path.display()
            );
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(content)?;
        Ok(config)
    }

    /// 启动前校验：至少需要一个可用的 sink
    pub fn validate(&self) -> Result<()> {
        if self.sinks.enabled_count() == 0 {
            bail!(
                "no notification sink configured: set sinks.telegram (bot_token + chat_id), \
                 sinks.discord (webhook_url) or sinks.webhook (url)"
            );
        }
        for tracker in &self.trackers {
            if tracker.kind.trim().is_empty() {
                bail!("tracker entry without kind: {:?}", tracker.name);
            }
        }
        Ok(())
    }

    /// 全局轮询间隔（已应用硬下限）
    pub fn global_interval(&self) -> Duration {
        let configured = cap_interval("check_interval_secs", self.check_interval_secs);
        if configured < HARD_FLOOR {
            warn!(
                configured_secs = self.check_interval_secs,
                floor_secs = HARD_FLOOR.as_secs(),
                "check_interval_secs below minimum, raising"
            );
            return HARD_FLOOR;
        }
        configured
    }

    pub fn jitter_ratio(&self) -> f64 {
        if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, MAX_JITTER_RATIO)
        } else {
            DEFAULT_JITTER_RATIO
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: seconds_or_default("timeout_secs", self.timeout_secs, DEFAULT_TIMEOUT_SECS),
            request_delay: seconds_or_default(
                "request_delay_secs",
                self.request_delay_secs,
                DEFAULT_REQUEST_DELAY_SECS,
            ),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_days
            .map(|days| chrono::Duration::days(days.min(36_500) as i64))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.dispatch.max_retries,
            initial_backoff_ms: self.dispatch.initial_backoff_ms,
            max_backoff_ms: self.dispatch.max_backoff_ms.max(self.dispatch.initial_backoff_ms),
            backoff_multiplier: 2.0,
        }
    }

    pub fn item_spacing(&self) -> Duration {
        Duration::from_millis(self.dispatch.item_spacing_ms)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| config_dir().join("state"))
    }

    /// 指定 tracker 类型的 API token（大小写不敏感）
    pub fn api_token_for(&self, kind: &str) -> Option<String> {
        self.api_tokens
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(kind) && !v.is_empty())
            .map(|(_, v)| v.clone())
    }
}

fn cap_interval(field: &str, secs: u64) -> Duration {
    let configured = Duration::from_secs(secs);
    if configured > MAX_INTERVAL {
        warn!(
            field,
            configured_secs = secs,
            max_secs = MAX_INTERVAL.as_secs(),
            "Interval above maximum, capping"
        );
        return MAX_INTERVAL;
    }
    configured
}

fn seconds_or_default(field: &str, value: f64, default: f64) -> Duration {
    if value.is_finite() && value >= 0.0 {
        Duration::from_secs_f64(value)
    } else {
        warn!(field, value, default, "Invalid config value, using default");
        Duration::from_secs_f64(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.check_interval_secs, 1800);
        assert!(!config.mark_as_read);
        assert_eq!(config.retention_days, Some(180));
        assert_eq!(config.dispatch.max_retries, 3);
        assert_eq!(config.http_settings().request_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_requires_sink() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());

        let config = AppConfig::from_json(
            r#"{"sinks": {"discord": {"webhook_url": "https://discord.com/api/webhooks/1/x"}}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_sink_does_not_count() {
        let config = AppConfig::from_json(
            r#"{"sinks": {"telegram": {"enabled": false, "bot_token": "t", "chat_id": "1"}}}"#,
        )
        .unwrap();
        assert_eq!(config.sinks.enabled_count(), 0);
    }

    #[test]
    fn test_global_interval_has_floor() {
        let config = AppConfig {
            check_interval_secs: 60,
            ..Default::default()
        };
        assert_eq!(config.global_interval(), HARD_FLOOR);

        let config = AppConfig {
            check_interval_secs: 3600,
            ..Default::default()
        };
        assert_eq!(config.global_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_huge_intervals_are_capped() {
        let config = AppConfig {
            check_interval_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.global_interval(), MAX_INTERVAL);

        let tracker = TrackerConfig {
            interval_secs: Some(u64::MAX),
            ..TrackerConfig::new("UNIT3D")
        };
        assert_eq!(tracker.interval_override(), Some(MAX_INTERVAL));
    }

    #[test]
    fn test_negative_delay_falls_back() {
        let config = AppConfig {
            request_delay_secs: -1.0,
            timeout_secs: f64::NAN,
            ..Default::default()
        };
        let http = config.http_settings();
        assert_eq!(http.request_delay, Duration::from_secs(5));
        assert_eq!(http.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_ratio_is_clamped() {
        let config = AppConfig {
            jitter_ratio: 3.0,
            ..Default::default()
        };
        assert_eq!(config.jitter_ratio(), 0.25);
    }

    #[test]
    fn test_tracker_entries() {
        let config = AppConfig::from_json(
            r#"{
                "api_tokens": {"orpheus": "secret"},
                "trackers": [
                    {"kind": "UNIT3D", "cookie_file": "cookies/UNIT3D/aither.txt", "interval_secs": 3600},
                    {"kind": "Orpheus", "name": "OPS", "enabled": false}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.trackers.len(), 2);
        assert_eq!(
            config.trackers[0].interval_override(),
            Some(Duration::from_secs(3600))
        );
        assert!(config.trackers[0].enabled);
        assert!(!config.trackers[1].enabled);
        assert_eq!(config.api_token_for("Orpheus"), Some("secret".to_string()));
    }
}
