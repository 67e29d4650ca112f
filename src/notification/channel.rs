//! 通知渠道 trait 定义

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::tracker::{Category, Item};

/// 发往 sink 的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkMessage {
    /// tracker 名称
    pub tracker: String,
    pub category: Category,
    pub title: String,
    pub body: String,
    /// 条目链接（缺省为站点首页）
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    /// 站点给出的时间（仅展示）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

impl SinkMessage {
    /// 从条目构建，`fallback_link` 用于没有链接的条目
    pub fn from_item(tracker: impl Into<String>, item: &Item, fallback_link: &str) -> Self {
        Self {
            tracker: tracker.into(),
            category: item.category,
            title: item.title.clone(),
            body: item.body.clone(),
            link: item
                .url
                .clone()
                .unwrap_or_else(|| fallback_link.to_string()),
            sender: item.sender.clone(),
            is_staff: item.is_staff,
            timestamp: item.timestamp.clone(),
            icon_url: None,
        }
    }

    pub fn with_icon_url(mut self, icon_url: impl Into<String>) -> Self {
        let icon_url = icon_url.into();
        self.icon_url = if icon_url.is_empty() { None } else { Some(icon_url) };
        self
    }

    /// `test-sinks` 使用的测试消息
    pub fn test(tracker: impl Into<String>) -> Self {
        Self {
            tracker: tracker.into(),
            category: Category::Notification,
            title: "Test notification".to_string(),
            body: "If you can read this, the sink is configured correctly.".to_string(),
            link: "https://github.com/wastaken7/PTNotifier".to_string(),
            sender: None,
            is_staff: false,
            timestamp: Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            icon_url: None,
        }
    }
}

/// 单个 sink 的投递结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 投递成功
    Delivered,
    /// 跳过（类别过滤、dry-run）
    Skipped(String),
    /// 重试耗尽或永久性失败
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// 通知渠道 trait
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// 渠道名称（用于日志和配置）
    fn name(&self) -> &str;

    /// 是否应该发送此消息（类别过滤）
    fn should_send(&self, message: &SinkMessage) -> bool;

    /// 发送一次，不重试
    async fn send(&self, message: &SinkMessage) -> Result<(), DispatchError>;
}

/// 类别过滤：空列表表示全部
pub fn category_allowed(filter: &[Category], category: Category) -> bool {
    filter.is_empty() || filter.contains(&category)
}
