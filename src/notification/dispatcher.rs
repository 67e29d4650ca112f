//! 通知分发器 - 管理多个渠道并路由消息
//!
//! 每个 sink 独立投递、独立重试：一个 sink 失败不影响其他 sink。
//! 相邻两条消息之间保持 `item_spacing` 间隔，避免触发聊天 API 限流。

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::channel::{DeliveryOutcome, NotificationChannel, SinkMessage};
use crate::tracker::RequestPacer;

/// 投递重试配置（指数退避）
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大重试次数（不含首次尝试）
    pub max_retries: u32,
    /// 首次退避时间（毫秒）
    pub initial_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 第 `retry` 次重试前的等待时间（从 0 开始）
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let ms = self.initial_backoff_ms as f64 * multiplier.powi(retry.min(32) as i32);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

/// 通知分发器 - 管理多个渠道并路由消息
pub struct NotificationDispatcher {
    /// 所有注册的渠道
    channels: Vec<Arc<dyn NotificationChannel>>,
    /// 是否为 dry-run 模式
    dry_run: bool,
    retry: RetryConfig,
    /// 相邻消息之间的间隔
    spacing: RequestPacer,
}

impl NotificationDispatcher {
    /// 创建新的分发器
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            dry_run: false,
            retry: RetryConfig::default(),
            spacing: RequestPacer::new(Duration::ZERO),
        }
    }

    /// 设置 dry-run 模式
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_item_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = RequestPacer::new(spacing);
        self
    }

    /// 注册渠道
    pub fn register_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        info!(channel = channel.name(), "Registering notification channel");
        self.channels.push(channel);
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 发送到所有渠道（并发），返回每个渠道的结果
    pub async fn dispatch(&self, message: &SinkMessage) -> Vec<(String, DeliveryOutcome)> {
        if self.dry_run {
            info!(
                tracker = %message.tracker,
                category = %message.category,
                title = %message.title,
                channels = ?self.channel_names(),
                "[DRY-RUN] Would dispatch"
            );
            return self
                .channels
                .iter()
                .map(|c| (c.name().to_string(), DeliveryOutcome::Skipped("dry-run".into())))
                .collect();
        }

        self.spacing.wait().await;

        let deliveries = self.channels.iter().map(|channel| async move {
            let outcome = self.deliver(message, channel.as_ref()).await;
            (channel.name().to_string(), outcome)
        });
        join_all(deliveries).await
    }

    /// 投递到单个渠道（带重试）
    pub async fn deliver(
        &self,
        message: &SinkMessage,
        channel: &dyn NotificationChannel,
    ) -> DeliveryOutcome {
        if !channel.should_send(message) {
            debug!(
                channel = channel.name(),
                category = %message.category,
                "Category filtered out"
            );
            return DeliveryOutcome::Skipped(format!("{} filtered", message.category));
        }

        let mut retry = 0;
        loop {
            match channel.send(message).await {
                Ok(()) => {
                    debug!(channel = channel.name(), tracker = %message.tracker, "Delivered");
                    return DeliveryOutcome::Delivered;
                }
                Err(e) if e.is_permanent() => {
                    warn!(
                        channel = channel.name(),
                        tracker = %message.tracker,
                        error = %e,
                        "Permanent delivery failure, not retrying"
                    );
                    return DeliveryOutcome::Failed(e.to_string());
                }
                Err(e) if retry >= self.retry.max_retries => {
                    warn!(
                        channel = channel.name(),
                        tracker = %message.tracker,
                        attempts = retry + 1,
                        error = %e,
                        "Delivery failed, giving up"
                    );
                    return DeliveryOutcome::Failed(e.to_string());
                }
                Err(e) => {
                    let backoff = self.retry.backoff_for(retry);
                    debug!(
                        channel = channel.name(),
                        attempt = retry + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    retry += 1;
                }
            }
        }
    }

    /// 获取已注册的渠道数量
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 获取已注册的渠道名称
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::notification::channel::category_allowed;
    use crate::tracker::{Category, Item};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// 测试用的 mock 渠道
    struct MockChannel {
        name: String,
        categories: Vec<Category>,
        send_count: AtomicUsize,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                categories: Vec::new(),
                send_count: AtomicUsize::new(0),
            }
        }

        fn only(mut self, category: Category) -> Self {
            self.categories = vec![category];
            self
        }

        fn get_send_count(&self) -> usize {
            self.send_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn should_send(&self, message: &SinkMessage) -> bool {
            category_allowed(&self.categories, message.category)
        }

        async fn send(&self, _message: &SinkMessage) -> Result<(), DispatchError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 先失败 N 次再成功的 mock 渠道
    struct FailingMockChannel {
        name: String,
        failures_remaining: AtomicU32,
        send_attempts: AtomicU32,
        status: u16,
    }

    impl FailingMockChannel {
        fn new(name: &str, fail_count: u32, status: u16) -> Self {
            Self {
                name: name.to_string(),
                failures_remaining: AtomicU32::new(fail_count),
                send_attempts: AtomicU32::new(0),
                status,
            }
        }

        fn get_attempt_count(&self) -> u32 {
            self.send_attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationChannel for FailingMockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn should_send(&self, _message: &SinkMessage) -> bool {
            true
        }

        async fn send(&self, _message: &SinkMessage) -> Result<(), DispatchError> {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                Err(DispatchError::Http {
                    status: self.status,
                    body: "error".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn message(category: Category) -> SinkMessage {
        SinkMessage::from_item("Aither", &Item::new("n1", category, "hello"), "https://aither.cc")
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_dispatcher_register_channel() {
        let mut dispatcher = NotificationDispatcher::new();
        assert_eq!(dispatcher.channel_count(), 0);

        dispatcher.register_channel(Arc::new(MockChannel::new("test")));
        assert_eq!(dispatcher.channel_count(), 1);
        assert_eq!(dispatcher.channel_names(), vec!["test"]);
    }

    #[test]
    fn test_backoff_respects_max() {
        let retry = fast_retry();
        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_dispatch_to_all_channels() {
        let mut dispatcher = NotificationDispatcher::new();
        let a = Arc::new(MockChannel::new("a"));
        let b = Arc::new(MockChannel::new("b"));
        dispatcher.register_channel(a.clone());
        dispatcher.register_channel(b.clone());

        let results = dispatcher.dispatch(&message(Category::Message)).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, o)| o.is_delivered()));
        assert_eq!(a.get_send_count(), 1);
        assert_eq!(b.get_send_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_dry_run() {
        let mut dispatcher = NotificationDispatcher::new().with_dry_run(true);
        let channel = Arc::new(MockChannel::new("test"));
        dispatcher.register_channel(channel.clone());

        let results = dispatcher.dispatch(&message(Category::Notification)).await;

        assert_eq!(results[0].1, DeliveryOutcome::Skipped("dry-run".to_string()));
        assert_eq!(channel.get_send_count(), 0); // 不应该实际发送
    }

    #[tokio::test]
    async fn test_category_filter_skips() {
        let mut dispatcher = NotificationDispatcher::new();
        let channel = Arc::new(MockChannel::new("messages-only").only(Category::Message));
        dispatcher.register_channel(channel.clone());

        let results = dispatcher.dispatch(&message(Category::Notification)).await;
        assert!(matches!(results[0].1, DeliveryOutcome::Skipped(_)));
        assert_eq!(channel.get_send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let channel = Arc::new(FailingMockChannel::new("flaky", 2, 502));
        let mut dispatcher = NotificationDispatcher::new().with_retry_config(fast_retry());
        dispatcher.register_channel(channel.clone());

        let start = Instant::now();
        let results = dispatcher.dispatch(&message(Category::Message)).await;

        assert_eq!(results[0].1, DeliveryOutcome::Delivered);
        assert_eq!(channel.get_attempt_count(), 3);
        // 100ms + 200ms 退避
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let channel = Arc::new(FailingMockChannel::new("down", 100, 503));
        let mut dispatcher = NotificationDispatcher::new().with_retry_config(fast_retry());
        dispatcher.register_channel(channel.clone());

        let results = dispatcher.dispatch(&message(Category::Message)).await;

        assert!(results[0].1.is_failed());
        assert_eq!(channel.get_attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let channel = Arc::new(FailingMockChannel::new("bad-token", 100, 401));
        let mut dispatcher = NotificationDispatcher::new().with_retry_config(fast_retry());
        dispatcher.register_channel(channel.clone());

        let results = dispatcher.dispatch(&message(Category::Message)).await;

        assert!(results[0].1.is_failed());
        assert_eq!(channel.get_attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let channel = Arc::new(FailingMockChannel::new("limited", 1, 429));
        let mut dispatcher = NotificationDispatcher::new().with_retry_config(fast_retry());
        dispatcher.register_channel(channel.clone());

        let results = dispatcher.dispatch(&message(Category::Message)).await;
        assert!(results[0].1.is_delivered());
        assert_eq!(channel.get_attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_does_not_block_other_sink() {
        let broken = Arc::new(FailingMockChannel::new("broken", 100, 404));
        let healthy = Arc::new(MockChannel::new("healthy"));
        let mut dispatcher = NotificationDispatcher::new().with_retry_config(fast_retry());
        dispatcher.register_channel(broken.clone());
        dispatcher.register_channel(healthy.clone());

        let results = dispatcher.dispatch(&message(Category::Message)).await;

        assert!(results[0].1.is_failed());
        assert!(results[1].1.is_delivered());
        assert_eq!(healthy.get_send_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_spacing() {
        let mut dispatcher =
            NotificationDispatcher::new().with_item_spacing(Duration::from_secs(3));
        dispatcher.register_channel(Arc::new(MockChannel::new("a")));

        let start = Instant::now();
        for _ in 0..3 {
            dispatcher.dispatch(&message(Category::Message)).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(6));
    }
}
