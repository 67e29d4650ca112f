//! 集成测试共用的 mock tracker 与 sink
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracker_notifier::error::{AuthError, DispatchError, FetchError};
use tracker_notifier::notification::{
    category_allowed, NotificationChannel, NotificationDispatcher, SinkMessage,
};
use tracker_notifier::tracker::{
    Category, Credentials, HttpSession, Item, RequestPacer, Session, TrackerHandle, TrackerSession,
};

/// 返回可由测试修改的固定条目
pub struct MockTracker {
    name: String,
    minimum: Duration,
    notifications: Mutex<Vec<Item>>,
    messages: Mutex<Vec<Item>>,
    fail_fetch: AtomicBool,
    fail_auth: AtomicBool,
    pub fetches: AtomicUsize,
    pub marked: Mutex<Vec<String>>,
}

impl MockTracker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            minimum: Duration::ZERO,
            notifications: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            fail_auth: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            marked: Mutex::new(Vec::new()),
        })
    }

    pub fn with_minimum(name: &str, minimum: Duration) -> Arc<Self> {
        let mut tracker = Self::new(name);
        if let Some(t) = Arc::get_mut(&mut tracker) {
            t.minimum = minimum;
        }
        tracker
    }

    pub fn set_notifications(&self, ids: &[&str]) {
        *self.notifications.lock().unwrap() = ids
            .iter()
            .map(|id| Item::notification(*id, format!("Notification {id}")))
            .collect();
    }

    pub fn set_messages(&self, ids: &[&str]) {
        *self.messages.lock().unwrap() = ids
            .iter()
            .map(|id| {
                Item::message(*id, format!("Message {id}"))
                    .with_sender("SysOp")
                    .with_url(format!("https://mock.test/mail/{id}"))
            })
            .collect();
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackerSession for MockTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "Mock"
    }

    fn base_url(&self) -> &str {
        "https://mock.test/"
    }

    fn minimum_interval(&self) -> Duration {
        self.minimum
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<Session, AuthError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected("cookies expired".into()));
        }
        let http = HttpSession::new(
            self.name.clone(),
            reqwest::Client::new(),
            Arc::new(RequestPacer::new(Duration::ZERO)),
        );
        Ok(Session::new(http))
    }

    async fn fetch_notifications(&self, _session: &Session) -> Result<Vec<Item>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FetchError::Timeout("https://mock.test/notifications".into()));
        }
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn fetch_messages(&self, _session: &Session) -> Result<Vec<Item>, FetchError> {
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn mark_read(&self, _session: &Session, item: &Item) -> anyhow::Result<()> {
        self.marked.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

pub fn handle(tracker: &Arc<MockTracker>) -> TrackerHandle {
    TrackerHandle::new(tracker.clone(), Credentials::default())
}

/// 记录收到的消息
pub struct RecordingSink {
    name: String,
    categories: Vec<Category>,
    pub received: Mutex<Vec<SinkMessage>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            categories: Vec::new(),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn only(name: &str, category: Category) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            categories: vec![category],
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn titles(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.title.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_send(&self, message: &SinkMessage) -> bool {
        category_allowed(&self.categories, message.category)
    }

    async fn send(&self, message: &SinkMessage) -> Result<(), DispatchError> {
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// 总是返回 HTTP 400 的 sink
pub struct BrokenSink {
    pub attempts: AtomicUsize,
}

impl BrokenSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl NotificationChannel for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    fn should_send(&self, _message: &SinkMessage) -> bool {
        true
    }

    async fn send(&self, _message: &SinkMessage) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DispatchError::Http {
            status: 400,
            body: "chat not found".into(),
        })
    }
}

pub fn dispatcher_with(sinks: Vec<Arc<dyn NotificationChannel>>) -> Arc<NotificationDispatcher> {
    let mut dispatcher = NotificationDispatcher::new();
    for sink in sinks {
        dispatcher.register_channel(sink);
    }
    Arc::new(dispatcher)
}
