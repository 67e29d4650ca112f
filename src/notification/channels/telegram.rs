//! Telegram Bot API 渠道

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::read_response;
use crate::config::TelegramSinkConfig;
use crate::error::DispatchError;
use crate::notification::channel::{category_allowed, NotificationChannel, SinkMessage};
use crate::notification::formatter::telegram_payload;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram 渠道
pub struct TelegramChannel {
    config: TelegramSinkConfig,
    api_base: String,
    client: Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramSinkConfig, client: Client) -> Self {
        Self {
            config,
            api_base: DEFAULT_API_BASE.to_string(),
            client,
        }
    }

    /// 自建 Bot API 服务器或测试时替换地址
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.config.bot_token)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn should_send(&self, message: &SinkMessage) -> bool {
        category_allowed(&self.config.categories, message.category)
    }

    async fn send(&self, message: &SinkMessage) -> Result<(), DispatchError> {
        if !self.config.is_usable() {
            return Err(DispatchError::Config(
                "telegram needs bot_token and chat_id".to_string(),
            ));
        }

        let payload = telegram_payload(
            message,
            &self.config.chat_id,
            self.config.topic_id.as_deref(),
        );
        let response = self
            .client
            .post(self.send_message_url())
            .json(&payload)
            .send()
            .await?;
        let body = read_response(response).await?;

        // HTTP 200 但 ok=false 时视为被拒绝
        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(api) if !api.ok => Err(DispatchError::Rejected(
                api.description.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => {
                debug!(chat_id = %self.config.chat_id, "Telegram message sent");
                Ok(())
            }
        }
    }
}
