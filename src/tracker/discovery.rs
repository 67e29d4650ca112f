//! 从 cookie 目录发现 tracker
//!
//! 目录约定：
//! - `<cookies_dir>/<KIND>/*.txt`：每个文件一个实例（KIND 大小写不敏感）
//! - `<cookies_dir>/OTHER/<kind>.txt`：文件名即 tracker 类型

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::registry::TrackerRegistry;
use crate::config::TrackerConfig;

const OTHER_DIR: &str = "OTHER";

/// 扫描 cookie 目录，返回发现的 tracker 配置（按路径排序）
pub fn discover_trackers(cookies_dir: &Path, registry: &TrackerRegistry) -> Vec<TrackerConfig> {
    let mut found = Vec::new();

    let entries = match fs::read_dir(cookies_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %cookies_dir.display(), error = %e, "Cannot read cookies directory");
            return found;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if dir_name.eq_ignore_ascii_case(OTHER_DIR) {
            for file in cookie_files(&dir) {
                let stem = file_stem(&file);
                match registry.resolve(&stem) {
                    Some(kind) => found.push(TrackerConfig::new(kind).with_cookie_file(file)),
                    None => warn!(file = %file.display(), "No tracker kind matches cookie file"),
                }
            }
            continue;
        }

        let Some(kind) = registry.resolve(dir_name) else {
            debug!(dir = %dir.display(), "Ignoring directory without tracker kind");
            continue;
        };

        let files = cookie_files(&dir);
        let several = files.len() > 1;
        for file in files {
            let mut config = TrackerConfig::new(kind).with_cookie_file(&file);
            // 同一类型多个账号时用文件名区分状态目录；UNIT3D 按域名命名
            if several && !kind.eq_ignore_ascii_case(super::unit3d::KIND) {
                config = config.with_name(format!("{kind}-{}", file_stem(&file)));
            }
            found.push(config);
        }
    }

    found
}

/// 合并显式配置与发现结果；同一 cookie 文件以显式配置为准
pub fn merge_trackers(explicit: &[TrackerConfig], discovered: Vec<TrackerConfig>) -> Vec<TrackerConfig> {
    let mut merged: Vec<TrackerConfig> = explicit.to_vec();
    for config in discovered {
        let duplicate = config.cookie_file.is_some()
            && explicit
                .iter()
                .any(|e| e.cookie_file.is_some() && e.cookie_file == config.cookie_file);
        if !duplicate {
            merged.push(config);
        }
    }
    merged
}

fn cookie_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "txt"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
        .unwrap_or_default()
}
