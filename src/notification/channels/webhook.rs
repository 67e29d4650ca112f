//! 通用 JSON Webhook 渠道
//!
//! 请求体即 `SinkMessage` 的 JSON 序列化，可选 Bearer token 认证。

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::read_response;
use crate::config::WebhookSinkConfig;
use crate::error::DispatchError;
use crate::notification::channel::{category_allowed, NotificationChannel, SinkMessage};

/// Webhook 请求载荷
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    /// 来源名称
    pub source: &'static str,
    #[serde(flatten)]
    pub message: &'a SinkMessage,
}

/// Webhook 渠道
pub struct WebhookChannel {
    config: WebhookSinkConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookSinkConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn should_send(&self, message: &SinkMessage) -> bool {
        category_allowed(&self.config.categories, message.category)
    }

    async fn send(&self, message: &SinkMessage) -> Result<(), DispatchError> {
        if !self.config.is_usable() {
            return Err(DispatchError::Config("webhook needs url".to_string()));
        }

        let mut request = self.client.post(&self.config.url).json(&WebhookPayload {
            source: "tracker-notifier",
            message,
        });
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        read_response(request.send().await?).await?;
        Ok(())
    }
}
