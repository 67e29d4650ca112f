//! UNIT3D 引擎站点（Aither、Blutopia 等）
//!
//! 一个实现对应多个站点，站点由 cookie 文件中的域名决定。
//! 登录后首页提供 CSRF token 以及通知、私信页面链接。

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, REFERER};
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cookies::domain_from_cookie_file;
use super::html::{absolute_url, ancestor, element_text, join_text, last_path_segment, selector};
use super::http::HttpSettings;
use super::registry::TrackerContext;
use super::session::{auth_error_from_fetch, Credentials, Session, TrackerSession};
use super::types::{Category, Item};
use super::{open_cookie_session, DEFAULT_SITE_INTERVAL};
use crate::error::{AuthError, FetchError};

pub const KIND: &str = "UNIT3D";

/// 只有登录后才会出现在页面上的文本
const LOGGED_IN_MARKER: &str = "general-settings";

const ATTR_CSRF: &str = "csrf_token";
const ATTR_NOTIFICATIONS: &str = "notifications_url";
const ATTR_MESSAGES: &str = "messages_url";

pub struct Unit3d {
    name: String,
    base_url: String,
    http: HttpSettings,
}

impl Unit3d {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http: HttpSettings) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn factory(ctx: &TrackerContext<'_>) -> Result<Arc<dyn TrackerSession>> {
        let base_url = match &ctx.config.base_url {
            Some(url) => url.clone(),
            None => {
                let path = ctx
                    .config
                    .cookie_file
                    .as_ref()
                    .ok_or_else(|| anyhow!("UNIT3D tracker needs base_url or cookie_file"))?;
                let domain = domain_from_cookie_file(path)
                    .with_context(|| format!("no domain found in {}", path.display()))?;
                format!("https://{domain}")
            }
        };
        let name = ctx
            .config
            .name
            .clone()
            .unwrap_or_else(|| site_name(&base_url));
        Ok(Arc::new(Self::new(name, base_url, ctx.http.clone())))
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers
    }

    async fn fetch_body(&self, session: &Session, url: &str) -> String {
        match session.http().get_text(url, "item body").await {
            Ok(page) => parse_body(&page).unwrap_or_default(),
            Err(e) => {
                warn!(tracker = %self.name, url = %url, error = %e, "Failed to fetch item body");
                String::new()
            }
        }
    }
}

#[async_trait]
impl TrackerSession for Unit3d {
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
        let http = open_cookie_session(&self.name, &self.http, credentials, Self::headers())?;
        let home = http
            .get_checked(&self.base_url, "home page", LOGGED_IN_MARKER)
            .await
            .map_err(auth_error_from_fetch)?;

        let links = parse_home(&home, &self.base_url).map_err(auth_error_from_fetch)?;
        if links.notifications_url.is_none() && links.messages_url.is_none() {
            return Err(AuthError::Rejected(format!(
                "{}: no notification or conversation links on home page",
                self.name
            )));
        }
        debug!(
            tracker = %self.name,
            has_csrf = links.csrf_token.is_some(),
            "Session established"
        );

        let mut session = Session::new(http);
        if let Some(token) = links.csrf_token {
            session.set_attribute(ATTR_CSRF, token);
        }
        if let Some(url) = links.notifications_url {
            session.set_attribute(ATTR_NOTIFICATIONS, url);
        }
        if let Some(url) = links.messages_url {
            session.set_attribute(ATTR_MESSAGES, url);
        }
        Ok(session)
    }

    async fn fetch_notifications(&self, session: &Session) -> Result<Vec<Item>, FetchError> {
        let Some(url) = session.attribute(ATTR_NOTIFICATIONS) else {
            return Ok(Vec::new());
        };
        let page = session
            .http()
            .get_checked(url, "notifications", LOGGED_IN_MARKER)
            .await?;
        parse_notifications(&page, &self.base_url)
    }

    async fn fetch_messages(&self, session: &Session) -> Result<Vec<Item>, FetchError> {
        let Some(url) = session.attribute(ATTR_MESSAGES) else {
            return Ok(Vec::new());
        };
        let page = session
            .http()
            .get_checked(url, "messages", LOGGED_IN_MARKER)
            .await?;

        let mut items = parse_messages(&page, &self.base_url)?;
        for item in &mut items {
            if let Some(url) = item.url.clone() {
                item.body = self.fetch_body(session, &url).await;
            }
        }
        Ok(items)
    }

    async fn mark_read(&self, session: &Session, item: &Item) -> Result<()> {
        // 私信打开即已读，只处理站点通知
        if item.category != Category::Notification {
            return Ok(());
        }
        let Some(token) = session.attribute(ATTR_CSRF) else {
            debug!(tracker = %self.name, "No CSRF token, skipping mark-read");
            return Ok(());
        };
        let url = item
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("notification {} has no action url", item.id))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        if let Some(referer) = session.attribute(ATTR_NOTIFICATIONS) {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert(REFERER, value);
            }
        }

        session
            .http()
            .post_form(
                url,
                "mark read",
                &[("_token", token), ("_method", "PATCH")],
                headers,
            )
            .await?;
        Ok(())
    }
}

/// 首页中发现的会话信息
#[derive(Debug, Default, PartialEq)]
pub struct HomeLinks {
    pub csrf_token: Option<String>,
    pub notifications_url: Option<String>,
    pub messages_url: Option<String>,
}

pub fn parse_home(html: &str, base_url: &str) -> Result<HomeLinks, FetchError> {
    let doc = Html::parse_document(html);
    let meta = selector(r#"meta[name="csrf-token"]"#)?;
    let notifications = selector(r#"a[href*="notifications"]"#)?;
    let conversations = selector(r#"a[href*="conversations"]"#)?;

    let href = |sel: &scraper::Selector| {
        doc.select(sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| absolute_url(base_url, href))
    };

    Ok(HomeLinks {
        csrf_token: doc
            .select(&meta)
            .next()
            .and_then(|m| m.value().attr("content"))
            .filter(|c| !c.is_empty())
            .map(String::from),
        notifications_url: href(&notifications),
        messages_url: href(&conversations),
    })
}

/// 解析通知页中的未读通知
pub fn parse_notifications(html: &str, base_url: &str) -> Result<Vec<Item>, FetchError> {
    let doc = Html::parse_document(html);
    let unread = selector("td.notification--unread")?;
    let cell = selector("td")?;
    let form = selector("form")?;

    let mut items = Vec::new();
    for unread_cell in doc.select(&unread) {
        let Some(row) = ancestor(&unread_cell, "tr") else {
            continue;
        };
        let cols: Vec<_> = row.select(&cell).collect();
        if cols.len() < 4 {
            continue;
        }
        let Some(action) = cols[3]
            .select(&form)
            .next()
            .and_then(|f| f.value().attr("action"))
        else {
            continue;
        };

        let url = absolute_url(base_url, action);
        let id = format!("notif_{}", last_path_segment(&url));
        items.push(
            Item::notification(id, element_text(&cols[0]))
                .with_body(element_text(&cols[1]))
                .with_timestamp(element_text(&cols[2]))
                .with_url(url),
        );
    }
    Ok(items)
}

/// 解析收件箱中的未读私信（正文需要单独抓取）
pub fn parse_messages(html: &str, base_url: &str) -> Result<Vec<Item>, FetchError> {
    let doc = Html::parse_document(html);
    let row_sel = selector("tr")?;
    let unread_icon = selector("i.text-red")?;
    let cell = selector("td")?;
    let link = selector("a")?;

    let mut items = Vec::new();
    for row in doc.select(&row_sel) {
        if row.select(&unread_icon).next().is_none() {
            continue;
        }
        let cols: Vec<_> = row.select(&cell).collect();
        if cols.len() < 6 {
            continue;
        }
        let Some(anchor) = cols[1].select(&link).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        let url = absolute_url(base_url, href);
        let id = format!("msg_{}", last_path_segment(&url));
        items.push(
            Item::message(id, element_text(&anchor))
                .with_sender(element_text(&cols[0]))
                .with_timestamp(element_text(&cols[2]))
                .with_url(url),
        );
    }
    Ok(items)
}

/// 会话页最后一条回复的正文
pub fn parse_body(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let body = selector("div.panel__body.bbcode-rendered").ok()?;
    doc.select(&body)
        .last()
        .map(|el| join_text(&el, "\n\n"))
}

/// 域名第一段首字母大写（`aither.cc` -> `Aither`）
pub fn site_name(base_url: &str) -> String {
    let host = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");
    let label = host.split(['.', '/']).next().unwrap_or(host);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => KIND.to_string(),
    }
}
