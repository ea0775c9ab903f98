// 配置管理模块

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 转存配置
    #[serde(default)]
    pub transfer: TransferConfig,
    /// 网盘键值配置（凭证、转存目录、广告关键词等）
    #[serde(default)]
    pub netdisk: BTreeMap<String, String>,
}

/// 转存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 最大并发转存数
    pub max_concurrent: usize,
    /// 单次转存超时（秒）
    pub timeout_secs: u64,
    /// 默认成功转存目标数
    pub max_success: usize,
    /// 异步任务轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            timeout_secs: 15,
            max_success: 2,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TransferConfig {
    /// 单次转存超时
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.context("创建配置目录失败")?;
            }
        }

        fs::write(path, content).await.context("写入配置文件失败")?;

        info!("配置已保存到: {}", path.display());
        Ok(())
    }

    /// 加载配置，文件不存在时使用默认配置并写回
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                info!("从 {} 加载配置", path.display());
                config
            }
            Err(e) => {
                warn!("加载配置失败，使用默认配置: {:#}", e);
                let config = Self::default();
                if let Err(e) = config.save_to_file(path).await {
                    warn!("保存默认配置失败: {:#}", e);
                }
                config
            }
        }
    }

    /// 用 `[netdisk]` 表构建键值存储
    pub fn netdisk_store(&self) -> MemoryConfigStore {
        MemoryConfigStore::from_pairs(self.netdisk.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

/// 键值配置读取接口
///
/// 网盘实现只通过这个接口读取凭证和目录，每次读取都应返回最新值
pub trait ConfigReader: Send + Sync {
    /// 读取原始值
    fn get(&self, key: &str) -> Option<String>;

    /// 读取去除首尾空白后的非空值
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// 内存键值存储
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: DashMap<String, String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let values = DashMap::new();
        for (k, v) in pairs {
            values.insert(k.into(), v.into());
        }
        Self { values }
    }

    /// 写入或覆盖一个键
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigReader for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }
}
