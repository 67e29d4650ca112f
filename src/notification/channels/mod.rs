//! 具体渠道实现

pub mod discord;
pub mod telegram;
pub mod webhook;

pub use discord::DiscordChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

use crate::error::DispatchError;

/// 错误响应体只保留前若干字符写入日志
const ERROR_BODY_LIMIT: usize = 300;

/// 非 2xx 响应转为 `DispatchError::Http`，成功时返回响应体
pub(crate) async fn read_response(response: reqwest::Response) -> Result<String, DispatchError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(DispatchError::Http {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        })
    }
}
