//! IPTorrents - 收件箱私信
//!
//! 列表页只有发件人与时间，正文通过站内 XHR 接口 `API.php` 获取，
//! 接口返回一组 DOM 更新指令，正文在其中的 `.msgBody` 片段里。

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, ORIGIN, REFERER};
use scraper::Html;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::html::{absolute_url, element_text, join_text, selector};
use super::http::HttpSettings;
use super::registry::TrackerContext;
use super::session::{auth_error_from_fetch, Credentials, Session, TrackerSession};
use super::types::Item;
use super::{open_cookie_session, DEFAULT_SITE_INTERVAL};
use crate::error::{AuthError, FetchError};

pub const KIND: &str = "IPTorrents";

const DEFAULT_BASE_URL: &str = "https://iptorrents.com/";
const LOGGED_IN_MARKER: &str = "settings.php";

pub struct IpTorrents {
    name: String,
    base_url: String,
    http: HttpSettings,
}

impl IpTorrents {
    pub fn factory(ctx: &TrackerContext<'_>) -> Result<Arc<dyn TrackerSession>> {
        Ok(Arc::new(Self {
            name: ctx.config.name.clone().unwrap_or_else(|| KIND.to_string()),
            base_url: ctx
                .config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: ctx.http.clone(),
        }))
    }

    fn inbox_url(&self) -> String {
        absolute_url(&self.base_url, "inbox")
    }

    fn api_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        if let Ok(origin) = HeaderValue::from_str(self.base_url.trim_end_matches('/')) {
            headers.insert(ORIGIN, origin);
        }
        if let Ok(referer) = HeaderValue::from_str(&self.inbox_url()) {
            headers.insert(REFERER, referer);
        }
        headers
    }

    async fn fetch_body(&self, session: &Session, id: &str) -> String {
        let url = absolute_url(&self.base_url, "API.php");
        let result = session
            .http()
            .post_form(
                &url,
                "message body",
                &[("jxt", "2"), ("jxw", "c"), ("i", id)],
                self.api_headers(),
            )
            .await;
        match result {
            Ok(text) => parse_body_response(&text).unwrap_or_default(),
            Err(e) => {
                warn!(tracker = %self.name, id, error = %e, "Failed to fetch message body");
                String::new()
            }
        }
    }
}

#[async_trait]
impl TrackerSession for IpTorrents {
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
        let http = open_cookie_session(&self.name, &self.http, credentials, HeaderMap::new())?;
        http.get_checked(&self.base_url, "home page", LOGGED_IN_MARKER)
            .await
            .map_err(auth_error_from_fetch)?;
        debug!(tracker = %self.name, "Session established");
        Ok(Session::new(http))
    }

    async fn fetch_notifications(&self, _session: &Session) -> Result<Vec<Item>, FetchError> {
        Ok(Vec::new())
    }

    async fn fetch_messages(&self, session: &Session) -> Result<Vec<Item>, FetchError> {
        let inbox_url = self.inbox_url();
        let page = session
            .http()
            .get_checked(&inbox_url, "messages", LOGGED_IN_MARKER)
            .await?;

        let mut items = parse_inbox(&page, &inbox_url)?;
        for item in &mut items {
            item.body = self.fetch_body(session, &item.id).await;
        }
        Ok(items)
    }
}

/// 解析收件箱列表 `ol.list li.cRow`
pub fn parse_inbox(html: &str, inbox_url: &str) -> Result<Vec<Item>, FetchError> {
    let doc = Html::parse_document(html);
    let rows = selector("ol.list li.cRow")?;
    let author = selector("span.t")?;
    let staff_icon = selector("i.fa-warning")?;
    let elapsed = selector("span.elapsedDate")?;

    let mut items = Vec::new();
    for row in doc.select(&rows) {
        let raw_id = row.value().attr("id").unwrap_or_default();
        let id = raw_id.strip_prefix('c').unwrap_or(raw_id);
        if id.is_empty() {
            continue;
        }

        let author_span = row.select(&author).next();
        let sender = author_span
            .map(|span| element_text(&span).replace("Staff Message", "").trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "System".to_string());
        let is_staff = author_span.is_some_and(|span| span.select(&staff_icon).next().is_some());
        let date = row
            .select(&elapsed)
            .next()
            .and_then(|el| el.value().attr("title"))
            .unwrap_or("Unknown");

        items.push(
            Item::message(id, sender.clone())
                .with_sender(sender)
                .with_timestamp(date)
                .with_url(inbox_url)
                .with_staff(is_staff),
        );
    }
    Ok(items)
}

/// 从 `API.php` 的 DOM 指令中取出 `blockquote.body` 文本
pub fn parse_body_response(text: &str) -> Option<String> {
    let data: Value = serde_json::from_str(text).ok()?;
    let instructions = data.get("Fs")?.as_array()?;

    for instruction in instructions {
        let Some(parts) = instruction.as_array() else {
            continue;
        };
        if parts.first().and_then(Value::as_str) != Some("DOM") {
            continue;
        }
        let Some(commands) = parts.get(1) else {
            continue;
        };
        if !commands.to_string().contains(".msgBody") {
            continue;
        }
        let Some(commands) = commands.as_array() else {
            continue;
        };
        for command in commands {
            let Some(cmd) = command.as_array() else {
                continue;
            };
            if cmd.first().and_then(Value::as_str) != Some("html") {
                continue;
            }
            if let Some(fragment) = cmd.get(1).and_then(Value::as_str) {
                if let Some(body) = blockquote_text(fragment) {
                    return Some(body);
                }
            }
        }
    }
    None
}

fn blockquote_text(fragment: &str) -> Option<String> {
    let doc = Html::parse_fragment(fragment);
    let body = selector("blockquote.body").ok()?;
    doc.select(&body).next().map(|el| join_text(&el, "\n\n"))
}
