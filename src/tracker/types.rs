//! 站点条目类型 - 归一化后的通知 / 私信记录

use serde::{Deserialize, Serialize};
use std::fmt;

/// 条目类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// 站点通知
    Notification,
    /// 私信
    Message,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Notification, Category::Message];

    /// 用于文件名和日志的小写形式
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Notification => "notification",
            Category::Message => "message",
        }
    }

    /// 展示用标签
    pub fn label(&self) -> &'static str {
        match self {
            Category::Notification => "Notification",
            Category::Message => "Message",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条通知或私信
///
/// `id` 是去重键：同一个远端条目在多次抓取（包括进程重启后）
/// 必须得到相同的 `id`。`timestamp` 只用于展示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub category: Category,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// 条目链接
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// 发件人（私信）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// 是否为管理员消息
    #[serde(default)]
    pub is_staff: bool,
}

impl Item {
    pub fn new(id: impl Into<String>, category: Category, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            title: title.into(),
            body: String::new(),
            url: None,
            timestamp: None,
            sender: None,
            is_staff: false,
        }
    }

    pub fn notification(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, Category::Notification, title)
    }

    pub fn message(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, Category::Message, title)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = if url.is_empty() { None } else { Some(url) };
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        let timestamp = timestamp.into();
        self.timestamp = if timestamp.is_empty() {
            None
        } else {
            Some(timestamp)
        };
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        let sender = sender.into();
        self.sender = if sender.is_empty() { None } else { Some(sender) };
        self
    }

    pub fn with_staff(mut self, is_staff: bool) -> Self {
        self.is_staff = is_staff;
        self
    }
}
