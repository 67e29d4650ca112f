//! 通知系统构建器 - 按配置注册 sink

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::channels::{DiscordChannel, TelegramChannel, WebhookChannel};
use super::dispatcher::{NotificationDispatcher, RetryConfig};
use crate::config::{AppConfig, SinksConfig};

const SINK_TIMEOUT: Duration = Duration::from_secs(20);

/// 通知系统构建器
pub struct NotificationBuilder {
    sinks: SinksConfig,
    retry: RetryConfig,
    item_spacing: Duration,
    dry_run: bool,
    telegram_api_base: Option<String>,
}

impl NotificationBuilder {
    pub fn new(sinks: SinksConfig) -> Self {
        Self {
            sinks,
            retry: RetryConfig::default(),
            item_spacing: Duration::ZERO,
            dry_run: false,
            telegram_api_base: None,
        }
    }

    /// 从应用配置读取 sink、重试和间隔设置
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.sinks.clone())
            .retry(config.retry_config())
            .item_spacing(config.item_spacing())
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn item_spacing(mut self, spacing: Duration) -> Self {
        self.item_spacing = spacing;
        self
    }

    /// 设置 dry-run 模式
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn telegram_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.telegram_api_base = Some(api_base.into());
        self
    }

    /// 构建 NotificationDispatcher
    pub fn build(self) -> Result<NotificationDispatcher> {
        let client = Client::builder()
            .timeout(SINK_TIMEOUT)
            .build()
            .context("failed to create HTTP client for sinks")?;

        let mut dispatcher = NotificationDispatcher::new()
            .with_dry_run(self.dry_run)
            .with_retry_config(self.retry)
            .with_item_spacing(self.item_spacing);

        if let Some(config) = self.sinks.telegram {
            if config.is_usable() {
                info!(channel = "telegram", chat_id = %config.chat_id, "Configured Telegram sink");
                let mut channel = TelegramChannel::new(config, client.clone());
                if let Some(api_base) = self.telegram_api_base {
                    channel = channel.with_api_base(api_base);
                }
                dispatcher.register_channel(Arc::new(channel));
            } else if config.enabled {
                warn!(channel = "telegram", "Telegram sink enabled but bot_token or chat_id missing");
            }
        }

        if let Some(config) = self.sinks.discord {
            if config.is_usable() {
                info!(channel = "discord", "Configured Discord sink");
                dispatcher.register_channel(Arc::new(DiscordChannel::new(config, client.clone())));
            } else if config.enabled {
                warn!(channel = "discord", "Discord sink enabled but webhook_url missing");
            }
        }

        if let Some(config) = self.sinks.webhook {
            if config.is_usable() {
                info!(channel = "webhook", url = %config.url, "Configured webhook sink");
                dispatcher.register_channel(Arc::new(WebhookChannel::new(config, client)));
            } else if config.enabled {
                warn!(channel = "webhook", "Webhook sink enabled but url missing");
            }
        }

        Ok(dispatcher)
    }
}
