//! Discord Webhook 渠道

use async_trait::async_trait;
use reqwest::Client;

use super::read_response;
use crate::config::DiscordSinkConfig;
use crate::error::DispatchError;
use crate::notification::channel::{category_allowed, NotificationChannel, SinkMessage};
use crate::notification::formatter::discord_payload;

/// Discord 渠道
pub struct DiscordChannel {
    config: DiscordSinkConfig,
    client: Client,
}

impl DiscordChannel {
    pub fn new(config: DiscordSinkConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    fn should_send(&self, message: &SinkMessage) -> bool {
        category_allowed(&self.config.categories, message.category)
    }

    async fn send(&self, message: &SinkMessage) -> Result<(), DispatchError> {
        if !self.config.is_usable() {
            return Err(DispatchError::Config("discord needs webhook_url".to_string()));
        }

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&discord_payload(message))
            .send()
            .await?;
        // 成功时返回 204 No Content
        read_response(response).await?;
        Ok(())
    }
}
