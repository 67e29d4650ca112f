//! Tracker Notifier - 轮询私有 tracker 的通知与私信并转发到聊天渠道

pub mod cli;
pub mod config;
pub mod error;
pub mod notification;
pub mod poll;
pub mod seen_store;
pub mod tracker;

pub use config::AppConfig;
pub use error::{AuthError, DispatchError, FetchError, PersistError};
pub use notification::{NotificationBuilder, NotificationDispatcher, SinkMessage};
pub use poll::{CycleOutcome, CycleReport, IntervalPolicy, PollCycle, Scheduler};
pub use seen_store::{SeenRecord, SeenStore, TrackerRecords};
pub use tracker::{Category, Credentials, Item, Session, TrackerHandle, TrackerSession};
