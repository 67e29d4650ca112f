//! 错误分类 - 认证、抓取、投递、持久化四类错误
//!
//! 这些错误都不会让进程退出：调度器按 tracker 隔离失败，
//! 只在日志中体现。

use thiserror::Error;

/// 认证失败（本轮放弃，等下一个调度间隔再试）
#[derive(Debug, Error)]
pub enum AuthError {
    /// 没有可用的凭据（cookie 文件或 API token）
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// 凭据无效或已过期
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// 认证请求未能到达站点
    #[error("tracker unreachable during login: {0}")]
    Unreachable(String),
}

/// 抓取失败（暂时性错误，不推进 SeenRecord）
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    /// 页面结构不符合预期
    #[error("parse error: {0}")]
    Parse(String),

    /// 页面缺少登录标记，会话可能已失效
    #[error("session rejected: {0}")]
    SessionRejected(String),
}

impl FetchError {
    /// 将 reqwest 错误映射为抓取错误
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(url.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// 投递失败（仅影响单个 sink）
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("sink returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("sink request failed: {0}")]
    Network(String),

    /// sink 接受了请求但返回失败
    #[error("sink rejected message: {0}")]
    Rejected(String),

    #[error("sink misconfigured: {0}")]
    Config(String),
}

impl DispatchError {
    /// 是否为永久性错误（不值得重试）
    pub fn is_permanent(&self) -> bool {
        match self {
            DispatchError::Http { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            DispatchError::Config(_) => true,
            DispatchError::Network(_) | DispatchError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => DispatchError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => DispatchError::Network(err.to_string()),
        }
    }
}

/// 持久化失败（耐久性风险，内存状态仍然推进）
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid tracker id: {0:?}")]
    InvalidTrackerId(String),
}
