//! 已见 ID 存储 - 每个 tracker、每个类别一个 JSON 文件
//!
//! 目录结构：
//! ```text
//! <state_dir>/<tracker_id>/notification.json
//! <state_dir>/<tracker_id>/message.json
//! <state_dir>/<tracker_id>/last_run.json
//! <state_dir>/<tracker_id>/.lock
//! ```
//!
//! 写入使用临时文件 + fsync + rename，中途崩溃只会留下旧文件。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::tracker::Category;

/// 状态文件格式版本
pub const STATE_VERSION: u32 = 1;

const LOCK_FILE: &str = ".lock";
const LAST_RUN_FILE: &str = "last_run.json";

fn current_version() -> u32 {
    STATE_VERSION
}

/// 单个类别的已见记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenRecord {
    #[serde(default = "current_version")]
    pub version: u32,
    /// 首次成功抓取后置位；之前抓到的条目只记录不投递
    #[serde(default)]
    pub baseline_established: bool,
    /// ID -> 首次见到的时间
    #[serde(default)]
    pub seen: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SeenRecord {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            baseline_established: false,
            seen: BTreeMap::new(),
            updated_at: None,
        }
    }
}

impl SeenRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self, id: &str) -> bool {
        !self.seen.contains_key(id)
    }

    /// 记录 ID；已存在时保留原来的首次时间，返回是否新增
    pub fn mark_seen(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), now);
        true
    }

    pub fn establish_baseline(&mut self) {
        self.baseline_established = true;
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// 删除超过保留期且不在最近一次抓取结果中的 ID，返回删除数量
    ///
    /// `retention` 为 `None` 时永久保留。
    pub fn compact(
        &mut self,
        now: DateTime<Utc>,
        retention: Option<ChronoDuration>,
        current: &HashSet<String>,
    ) -> usize {
        let Some(retention) = retention else {
            return 0;
        };
        let horizon = now - retention;
        let before = self.seen.len();
        self.seen
            .retain(|id, first_seen| *first_seen >= horizon || current.contains(id));
        before - self.seen.len()
    }
}

/// 一个 tracker 的两类记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerRecords {
    pub notifications: SeenRecord,
    pub messages: SeenRecord,
}

impl TrackerRecords {
    pub fn get(&self, category: Category) -> &SeenRecord {
        match category {
            Category::Notification => &self.notifications,
            Category::Message => &self.messages,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut SeenRecord {
        match category {
            Category::Notification => &mut self.notifications,
            Category::Message => &mut self.messages,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LastRun {
    #[serde(default = "current_version")]
    version: u32,
    last_run: DateTime<Utc>,
}

/// 文件存储
#[derive(Debug, Clone)]
pub struct SeenStore {
    root: PathBuf,
}

impl SeenStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// tracker 状态目录（拒绝可能逃出根目录的 ID）
    pub fn tracker_dir(&self, tracker_id: &str) -> Result<PathBuf, PersistError> {
        let valid = !tracker_id.is_empty()
            && tracker_id != "."
            && tracker_id != ".."
            && !tracker_id.contains(['/', '\\']);
        if !valid {
            return Err(PersistError::InvalidTrackerId(tracker_id.to_string()));
        }
        Ok(self.root.join(tracker_id))
    }

    pub fn record_path(&self, tracker_id: &str, category: Category) -> Result<PathBuf, PersistError> {
        Ok(self
            .tracker_dir(tracker_id)?
            .join(format!("{}.json", category.as_str())))
    }

    /// 读取记录；文件不存在时返回空记录，损坏时移到一边并返回空记录
    pub fn load(&self, tracker_id: &str, category: Category) -> Result<SeenRecord, PersistError> {
        let path = self.record_path(tracker_id, category)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(tracker = tracker_id, category = %category, "No state yet, starting fresh");
                return Ok(SeenRecord::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<SeenRecord>(&content) {
            Ok(record) => Ok(record),
            Err(e) => {
                let quarantine = quarantine_path(&path);
                warn!(
                    tracker = tracker_id,
                    category = %category,
                    error = %e,
                    moved_to = %quarantine.display(),
                    "State file is corrupt, re-establishing baseline"
                );
                fs::rename(&path, &quarantine)?;
                Ok(SeenRecord::new())
            }
        }
    }

    pub fn load_all(&self, tracker_id: &str) -> Result<TrackerRecords, PersistError> {
        Ok(TrackerRecords {
            notifications: self.load(tracker_id, Category::Notification)?,
            messages: self.load(tracker_id, Category::Message)?,
        })
    }

    /// 原子写入单个类别
    pub fn persist(
        &self,
        tracker_id: &str,
        category: Category,
        record: &SeenRecord,
    ) -> Result<(), PersistError> {
        let path = self.record_path(tracker_id, category)?;
        self.with_lock(tracker_id, || write_json_atomic(&path, record))
    }

    /// 一次加锁写入两个类别和运行时间
    pub fn persist_all(
        &self,
        tracker_id: &str,
        records: &TrackerRecords,
        ran_at: DateTime<Utc>,
    ) -> Result<(), PersistError> {
        let dir = self.tracker_dir(tracker_id)?;
        self.with_lock(tracker_id, || {
            for category in Category::ALL {
                let path = dir.join(format!("{}.json", category.as_str()));
                write_json_atomic(&path, records.get(category))?;
            }
            write_json_atomic(
                &dir.join(LAST_RUN_FILE),
                &LastRun {
                    version: STATE_VERSION,
                    last_run: ran_at,
                },
            )
        })
    }

    /// 上次成功轮询时间（无记录或无法解析时为 None）
    pub fn last_run(&self, tracker_id: &str) -> Option<DateTime<Utc>> {
        let path = self.tracker_dir(tracker_id).ok()?.join(LAST_RUN_FILE);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str::<LastRun>(&content)
            .map(|r| r.last_run)
            .ok()
    }

    pub fn record_run(&self, tracker_id: &str, at: DateTime<Utc>) -> Result<(), PersistError> {
        let path = self.tracker_dir(tracker_id)?.join(LAST_RUN_FILE);
        self.with_lock(tracker_id, || {
            write_json_atomic(
                &path,
                &LastRun {
                    version: STATE_VERSION,
                    last_run: at,
                },
            )
        })
    }

    /// 在 tracker 目录锁内执行写操作（跨进程互斥）
    fn with_lock<T>(
        &self,
        tracker_id: &str,
        operation: impl FnOnce() -> Result<T, PersistError>,
    ) -> Result<T, PersistError> {
        let dir = self.tracker_dir(tracker_id)?;
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        lock_file.lock_exclusive()?;

        let result = operation();

        let _ = lock_file.unlock();
        result
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.json");
    path.with_file_name(format!("{name}.corrupt-{stamp}"))
}

/// 临时文件 + fsync + rename
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // 目录项也落盘；部分平台不支持打开目录，忽略失败
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
