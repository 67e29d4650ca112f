//! Tracker 抽象层 - 每个站点一个 `TrackerSession` 实现
//!
//! # 设计目标
//! 1. 统一接口：所有站点实现 `TrackerSession` trait
//! 2. 静态注册：`TrackerRegistry` 按名称映射到实现，启动时解析
//! 3. 站点解析逻辑与 HTTP 调用分离，解析函数可直接用 HTML 测试

pub mod cookies;
pub mod discovery;
pub mod html;
pub mod http;
pub mod iptorrents;
pub mod orpheus;
pub mod registry;
pub mod session;
pub mod torrentleech;
pub mod types;
pub mod unit3d;

use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AuthError;

pub use discovery::discover_trackers;
pub use http::{HttpSession, HttpSettings, RequestPacer};
pub use registry::{TrackerContext, TrackerRegistry};
pub use session::{Credentials, Session, TrackerSession};
pub use types::{Category, Item};

/// 内置站点默认的最小轮询间隔
pub const DEFAULT_SITE_INTERVAL: Duration = Duration::from_secs(1800);

/// 已解析的 tracker 实例：实现 + 凭据 + 调度覆盖
#[derive(Clone)]
pub struct TrackerHandle {
    /// 状态目录名（由名称规范化得到）
    pub id: String,
    pub session: Arc<dyn TrackerSession>,
    pub credentials: Credentials,
    pub interval_override: Option<Duration>,
}

impl TrackerHandle {
    pub fn new(session: Arc<dyn TrackerSession>, credentials: Credentials) -> Self {
        Self {
            id: tracker_id(session.name()),
            session,
            credentials,
            interval_override: None,
        }
    }

    pub fn with_interval_override(mut self, interval: Option<Duration>) -> Self {
        self.interval_override = interval;
        self
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }
}

impl std::fmt::Debug for TrackerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandle")
            .field("id", &self.id)
            .field("kind", &self.session.kind())
            .field("credentials", &self.credentials.cookie_file)
            .field("interval_override", &self.interval_override)
            .finish()
    }
}

/// 将 tracker 名称规范化为可用作目录名的 ID
pub fn tracker_id(name: &str) -> String {
    let id: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let id = id.trim_matches('.').to_string();
    if id.is_empty() {
        "tracker".to_string()
    } else {
        id
    }
}

/// 使用 cookie 文件创建 HTTP 会话
pub(crate) fn open_cookie_session(
    tracker: &str,
    settings: &HttpSettings,
    credentials: &Credentials,
    headers: HeaderMap,
) -> Result<HttpSession, AuthError> {
    let path = credentials
        .cookie_file
        .as_ref()
        .ok_or_else(|| AuthError::MissingCredentials(format!("{tracker}: no cookie file")))?;
    let entries = cookies::load_cookie_file(path)?;
    let jar = cookies::to_jar(&entries);
    HttpSession::build(tracker, settings, Some(jar), headers)
        .map_err(|e| AuthError::Unreachable(format!("failed to build HTTP client: {e}")))
}
