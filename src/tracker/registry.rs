//! Tracker 注册表 - tracker 类型名 -> 实现工厂

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::http::HttpSettings;
use super::session::TrackerSession;
use super::{iptorrents, orpheus, torrentleech, unit3d};
use crate::config::TrackerConfig;

/// 构建 tracker 所需的上下文
pub struct TrackerContext<'a> {
    pub config: &'a TrackerConfig,
    pub http: &'a HttpSettings,
}

/// 工厂函数
pub type TrackerFactory = fn(&TrackerContext<'_>) -> Result<Arc<dyn TrackerSession>>;

/// 注册表（名称大小写不敏感）
pub struct TrackerRegistry {
    factories: BTreeMap<String, (&'static str, TrackerFactory)>,
}

impl TrackerRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// 包含所有内置站点的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(unit3d::KIND, unit3d::Unit3d::factory);
        registry.register(orpheus::KIND, orpheus::Orpheus::factory);
        registry.register(torrentleech::KIND, torrentleech::TorrentLeech::factory);
        registry.register(iptorrents::KIND, iptorrents::IpTorrents::factory);
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: TrackerFactory) {
        self.factories
            .insert(kind.to_ascii_lowercase(), (kind, factory));
    }

    /// 解析为规范名称
    pub fn resolve(&self, kind: &str) -> Option<&'static str> {
        self.factories
            .get(&kind.to_ascii_lowercase())
            .map(|(canonical, _)| *canonical)
    }

    /// 所有已注册的规范名称
    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.values().map(|(canonical, _)| *canonical).collect()
    }

    /// 构建 tracker 实例
    pub fn build(&self, ctx: &TrackerContext<'_>) -> Result<Arc<dyn TrackerSession>> {
        let (_, factory) = self
            .factories
            .get(&ctx.config.kind.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("unknown tracker kind: {}", ctx.config.kind))?;
        factory(ctx)
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
