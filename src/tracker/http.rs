//! 站点 HTTP 会话 - 带请求间隔限制的 reqwest 客户端
//!
//! 同一个 tracker 在一次抓取中可能发出多个请求（列表页、正文页），
//! `RequestPacer` 保证相邻请求之间至少间隔 `request_delay`，
//! 与每轮轮询的调度间隔相互独立。

use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_USER_AGENT: &str = concat!("tracker-notifier/", env!("CARGO_PKG_VERSION"));

/// HTTP 相关设置（来自配置）
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// 单个请求超时
    pub timeout: Duration,
    /// 同一 tracker 相邻请求的最小间隔
    pub request_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            request_delay: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// 请求节流器 - 相邻两次请求的起始时间至少相隔 `delay`
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 等待到允许发出下一个请求
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.delay;
            let now = Instant::now();
            if ready_at > now {
                debug!(
                    sleep_ms = (ready_at - now).as_millis() as u64,
                    "Rate limiting request"
                );
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// 单个 tracker 的 HTTP 会话
#[derive(Debug, Clone)]
pub struct HttpSession {
    tracker: String,
    client: Client,
    pacer: Arc<RequestPacer>,
}

impl HttpSession {
    pub fn new(tracker: impl Into<String>, client: Client, pacer: Arc<RequestPacer>) -> Self {
        Self {
            tracker: tracker.into(),
            client,
            pacer,
        }
    }

    /// 构建带 cookie jar 和默认请求头的会话
    pub fn build(
        tracker: impl Into<String>,
        settings: &HttpSettings,
        jar: Option<Arc<Jar>>,
        headers: HeaderMap,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder.build()?;
        Ok(Self::new(
            tracker,
            client,
            Arc::new(RequestPacer::new(settings.request_delay)),
        ))
    }

    pub fn tracker(&self) -> &str {
        &self.tracker
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET 页面文本
    pub async fn get_text(&self, url: &str, label: &str) -> Result<String, FetchError> {
        self.pacer.wait().await;
        debug!(tracker = %self.tracker, request = label, url = %url, "Fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
            .error_for_status()
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        debug!(tracker = %self.tracker, request = label, bytes = text.len(), "Fetched");
        Ok(text)
    }

    /// GET 页面文本，并确认页面包含登录后才会出现的标记
    pub async fn get_checked(
        &self,
        url: &str,
        label: &str,
        marker: &str,
    ) -> Result<String, FetchError> {
        let text = self.get_text(url, label).await?;
        if !marker.is_empty() && !text.contains(marker) {
            return Err(FetchError::SessionRejected(format!(
                "{label}: keyword {marker:?} not found; cookies expired or page layout changed"
            )));
        }
        Ok(text)
    }

    /// GET 并解析 JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        label: &str,
    ) -> Result<T, FetchError> {
        let text = self.get_text(url, label).await?;
        serde_json::from_str(&text)
            .map_err(|e| FetchError::Parse(format!("{label}: invalid JSON: {e}")))
    }

    /// POST 表单，返回响应文本
    pub async fn post_form(
        &self,
        url: &str,
        label: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<String, FetchError> {
        self.pacer.wait().await;
        debug!(tracker = %self.tracker, request = label, url = %url, "Posting form");

        let response = self
            .client
            .post(url)
            .headers(headers)
            .form(form)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
            .error_for_status()
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacer_first_request_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_secs(5));
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_consecutive_requests() {
        let pacer = RequestPacer::new(Duration::from_secs(5));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_zero_delay() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_build_session_without_cookies() {
        let session = HttpSession::build(
            "Example",
            &HttpSettings::default(),
            None,
            HeaderMap::new(),
        );
        assert!(session.is_ok());
        assert_eq!(session.unwrap().tracker(), "Example");
    }
}
