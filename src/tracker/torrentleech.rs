//! TorrentLeech - 个人资料页下的系统通知

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::html::{absolute_url, element_text, selector};
use super::http::HttpSettings;
use super::registry::TrackerContext;
use super::session::{auth_error_from_fetch, Credentials, Session, TrackerSession};
use super::types::Item;
use super::{open_cookie_session, DEFAULT_SITE_INTERVAL};
use crate::error::{AuthError, FetchError};

pub const KIND: &str = "TorrentLeech";

const DEFAULT_BASE_URL: &str = "https://www.torrentleech.org/";
const ATTR_NOTIFICATIONS: &str = "notifications_url";

pub struct TorrentLeech {
    name: String,
    base_url: String,
    http: HttpSettings,
}

impl TorrentLeech {
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
}

#[async_trait]
impl TrackerSession for TorrentLeech {
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
        let home = http
            .get_text(&self.base_url, "user ID")
            .await
            .map_err(auth_error_from_fetch)?;

        let username = parse_username(&home)
            .map_err(auth_error_from_fetch)?
            .ok_or_else(|| {
                AuthError::Rejected(format!(
                    "{}: profile link not found; cookies expired?",
                    self.name
                ))
            })?;
        debug!(tracker = %self.name, username = %username, "Session established");

        let url = absolute_url(&self.base_url, &format!("profile/{username}/notifications"));
        Ok(Session::new(http).with_attribute(ATTR_NOTIFICATIONS, url))
    }

    async fn fetch_notifications(&self, session: &Session) -> Result<Vec<Item>, FetchError> {
        let url = session
            .attribute(ATTR_NOTIFICATIONS)
            .ok_or_else(|| FetchError::SessionRejected("notifications url unknown".into()))?;
        let page = session.http().get_text(url, "notifications").await?;
        parse_notifications(&page, &self.base_url, url)
    }

    async fn fetch_messages(&self, _session: &Session) -> Result<Vec<Item>, FetchError> {
        Ok(Vec::new())
    }
}

/// 首页导航中的用户名
pub fn parse_username(html: &str) -> Result<Option<String>, FetchError> {
    let doc = Html::parse_document(html);
    let links = selector("span.link")?;
    let re = Regex::new(r"/profile/([^/]+)/")
        .map_err(|e| FetchError::Parse(format!("invalid pattern: {e}")))?;

    Ok(doc
        .select(&links)
        .filter_map(|span| span.value().attr("onclick"))
        .filter(|onclick| onclick.contains("/profile/"))
        .find_map(|onclick| re.captures(onclick))
        .map(|caps| caps[1].to_string()))
}

/// 解析 `#notificationsTable`
pub fn parse_notifications(
    html: &str,
    base_url: &str,
    page_url: &str,
) -> Result<Vec<Item>, FetchError> {
    let doc = Html::parse_document(html);
    let rows = selector("table#notificationsTable tbody tr")?;
    let cell = selector("td")?;
    let link = selector("a")?;

    let mut items = Vec::new();
    for row in doc.select(&rows) {
        let cols: Vec<_> = row.select(&cell).collect();
        if cols.len() < 4 {
            continue;
        }
        let Some(id) = cols[1].value().attr("data-sort").filter(|s| !s.is_empty()) else {
            continue;
        };

        let url = cols[3]
            .select(&link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| absolute_url(base_url, href))
            .unwrap_or_else(|| page_url.to_string());

        items.push(
            Item::notification(id, "System")
                .with_body(element_text(&cols[3]))
                .with_timestamp(element_text(&cols[1]))
                .with_url(url),
        );
    }
    Ok(items)
}
