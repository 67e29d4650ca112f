//! Tracker 能力接口 - 每个站点实现一次 `TrackerSession`

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::http::HttpSession;
use super::types::Item;
use crate::error::{AuthError, FetchError};

/// 站点凭据位置
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Netscape 格式 cookie 文件
    pub cookie_file: Option<PathBuf>,
    /// 站点 API token（部分站点需要）
    pub api_token: Option<String>,
}

impl Credentials {
    pub fn from_cookie_file(path: impl Into<PathBuf>) -> Self {
        Self {
            cookie_file: Some(path.into()),
            api_token: None,
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api_token = if token.is_empty() { None } else { Some(token) };
        self
    }
}

/// 认证后的会话
///
/// 除 HTTP 客户端外还保存认证阶段发现的站点信息
/// （CSRF token、通知页地址等）。
#[derive(Debug, Clone)]
pub struct Session {
    http: HttpSession,
    attributes: HashMap<String, String>,
}

impl Session {
    pub fn new(http: HttpSession) -> Self {
        Self {
            http,
            attributes: HashMap::new(),
        }
    }

    pub fn http(&self) -> &HttpSession {
        &self.http
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(key.into(), value);
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// 站点能力接口
#[async_trait]
pub trait TrackerSession: Send + Sync {
    /// 站点实例名称（日志、状态目录、通知标题）
    fn name(&self) -> &str;

    /// 注册表中的实现名称（如 `UNIT3D`）
    fn kind(&self) -> &str;

    fn base_url(&self) -> &str;

    /// 站点要求的最小轮询间隔
    fn minimum_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// 通知中展示的站点图标
    fn icon_url(&self) -> String {
        format!("{}/favicon.ico", self.base_url().trim_end_matches('/'))
    }

    /// 使用凭据登录
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    /// 当前未读站点通知
    async fn fetch_notifications(&self, session: &Session) -> Result<Vec<Item>, FetchError>;

    /// 当前未读私信
    async fn fetch_messages(&self, session: &Session) -> Result<Vec<Item>, FetchError>;

    /// 在站点上标记已读（尽力而为）
    async fn mark_read(&self, _session: &Session, _item: &Item) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 认证阶段的抓取错误映射为认证错误
pub fn auth_error_from_fetch(err: FetchError) -> AuthError {
    match err {
        FetchError::Http { status, url } if status == 401 || status == 403 => {
            AuthError::Rejected(format!("HTTP {status} from {url}"))
        }
        FetchError::SessionRejected(reason) => AuthError::Rejected(reason),
        other => AuthError::Unreachable(other.to_string()),
    }
}
