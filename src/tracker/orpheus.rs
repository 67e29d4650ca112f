//! Orpheus（Gazelle AJAX API）
//!
//! 使用 API token 认证，只提供私信。

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::html::{absolute_url, strip_tags};
use super::http::{HttpSession, HttpSettings};
use super::registry::TrackerContext;
use super::session::{auth_error_from_fetch, Credentials, Session, TrackerSession};
use super::types::Item;
use super::{cookies, DEFAULT_SITE_INTERVAL};
use crate::error::{AuthError, FetchError};

pub const KIND: &str = "Orpheus";

const DEFAULT_BASE_URL: &str = "https://orpheus.network/";

/// Gazelle API 响应外层
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub response: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, label: &str) -> Result<T, FetchError> {
        if self.status != "success" {
            return Err(FetchError::Parse(format!(
                "{label}: API status {:?} ({})",
                self.status,
                self.error.unwrap_or_default()
            )));
        }
        self.response
            .ok_or_else(|| FetchError::Parse(format!("{label}: missing response")))
    }
}

#[derive(Debug, Deserialize)]
pub struct Inbox {
    #[serde(default)]
    pub messages: Vec<InboxMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub conv_id: serde_json::Value,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationMessage {
    #[serde(default)]
    pub body: String,
}

pub struct Orpheus {
    name: String,
    base_url: String,
    api_token: Option<String>,
    http: HttpSettings,
}

impl Orpheus {
    pub fn factory(ctx: &TrackerContext<'_>) -> Result<Arc<dyn TrackerSession>> {
        let base_url = ctx
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Arc::new(Self {
            name: ctx.config.name.clone().unwrap_or_else(|| KIND.to_string()),
            base_url,
            api_token: ctx.config.api_token.clone().filter(|t| !t.is_empty()),
            http: ctx.http.clone(),
        }))
    }

    fn api_url(&self, query: &str) -> String {
        absolute_url(&self.base_url, &format!("ajax.php?{query}"))
    }

    async fn fetch_conversation_body(&self, session: &Session, conv_id: &str) -> String {
        let url = self.api_url(&format!("action=inbox&type=viewconv&id={conv_id}"));
        let result = session
            .http()
            .get_json::<ApiResponse<Conversation>>(&url, "conversation")
            .await
            .and_then(|r| r.into_result("conversation"));
        match result {
            Ok(conversation) => conversation_body(&conversation),
            Err(e) => {
                warn!(tracker = %self.name, conv_id, error = %e, "Failed to fetch conversation body");
                String::new()
            }
        }
    }
}

#[async_trait]
impl TrackerSession for Orpheus {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn minimum_interval(&self) -> Duration {
        DEFAULT_SITE_INTERVAL
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let token = credentials
            .api_token
            .as_deref()
            .or(self.api_token.as_deref())
            .ok_or_else(|| {
                AuthError::MissingCredentials(format!("{}: API token not configured", self.name))
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|_| AuthError::MissingCredentials("API token is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, auth);

        // cookie 可选，token 已足够
        let jar = match &credentials.cookie_file {
            Some(path) => Some(cookies::to_jar(&cookies::load_cookie_file(path)?)),
            None => None,
        };
        let http = HttpSession::build(&self.name, &self.http, jar, headers)
            .map_err(|e| AuthError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        let index = http
            .get_json::<ApiResponse<serde_json::Value>>(&self.api_url("action=index"), "index")
            .await
            .map_err(auth_error_from_fetch)?;
        if index.status != "success" {
            return Err(AuthError::Rejected(format!(
                "{}: API token rejected ({})",
                self.name,
                index.error.unwrap_or_default()
            )));
        }
        debug!(tracker = %self.name, "API token accepted");
        Ok(Session::new(http))
    }

    async fn fetch_notifications(&self, _session: &Session) -> Result<Vec<Item>, FetchError> {
        Ok(Vec::new())
    }

    async fn fetch_messages(&self, session: &Session) -> Result<Vec<Item>, FetchError> {
        let inbox = session
            .http()
            .get_json::<ApiResponse<Inbox>>(&self.api_url("action=inbox"), "messages")
            .await?
            .into_result("messages")?;

        let mut items = inbox_items(&inbox, &self.base_url);
        for item in &mut items {
            item.body = self.fetch_conversation_body(session, &item.id).await;
        }
        Ok(items)
    }
}

/// 收件箱 -> 条目（正文待抓取）
pub fn inbox_items(inbox: &Inbox, base_url: &str) -> Vec<Item> {
    inbox
        .messages
        .iter()
        .filter_map(|msg| {
            let conv_id = match &msg.conv_id {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if conv_id.is_empty() {
                return None;
            }
            let link = absolute_url(base_url, &format!("inbox.php?action=viewconv&id={conv_id}"));
            let subject = msg.subject.clone().unwrap_or_else(|| "No Subject".to_string());
            let mut item = Item::message(conv_id, subject)
                .with_sender(msg.username.clone().unwrap_or_else(|| "System".to_string()))
                .with_url(link);
            if let Some(date) = &msg.date {
                item = item.with_timestamp(date.clone());
            }
            Some(item)
        })
        .collect()
}

/// 会话中最后一条消息的纯文本
pub fn conversation_body(conversation: &Conversation) -> String {
    conversation
        .messages
        .last()
        .map(|m| strip_tags(&m.body))
        .unwrap_or_default()
}
