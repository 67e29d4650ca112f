//! 通知抽象层 - 统一管理所有通知渠道
//!
//! # 设计目标
//! 1. 统一接口：所有渠道实现 `NotificationChannel` trait
//! 2. 渠道解耦：每个渠道独立投递、独立重试，互不影响
//! 3. 统一路由：`NotificationDispatcher` 把每条消息发给所有已启用的渠道
//!
//! # 使用示例
//! ```ignore
//! use tracker_notifier::notification::{NotificationBuilder, SinkMessage};
//!
//! let dispatcher = NotificationBuilder::from_config(&config).build()?;
//! let results = dispatcher.dispatch(&SinkMessage::test("Aither")).await;
//! ```

pub mod builder;
pub mod channel;
pub mod channels;
pub mod dispatcher;
pub mod formatter;

pub use builder::NotificationBuilder;
pub use channel::{category_allowed, DeliveryOutcome, NotificationChannel, SinkMessage};
pub use dispatcher::{NotificationDispatcher, RetryConfig};
