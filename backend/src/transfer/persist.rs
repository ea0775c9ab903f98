// 转存结果持久化

use crate::netdisk::ExpirationClass;
use crate::transfer::types::{TransferBatchResult, TransferOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 资源库记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// 资源标题
    pub title: String,
    /// 新分享链接
    pub url: String,
    /// 原始分享链接
    pub content: String,
    /// 网盘类型编码
    pub is_type: i32,
    /// 网盘内文件ID
    pub fid: String,
    /// 临时资源为 1
    pub is_time: i32,
    /// 状态，1 为正常
    pub status: i32,
    /// 创建时间（Unix 秒）
    pub create_time: i64,
    /// 更新时间（Unix 秒）
    pub update_time: i64,
}

impl SourceRecord {
    pub fn from_outcome(outcome: &TransferOutcome, class: ExpirationClass, now: i64) -> Self {
        Self {
            title: outcome.title.clone(),
            url: outcome.url.clone(),
            content: outcome.original_url.clone(),
            is_type: outcome.pan_type.code(),
            fid: outcome.fid.clone(),
            is_time: i32::from(class.is_temporary()),
            status: 1,
            create_time: now,
            update_time: now,
        }
    }
}

/// 为批次中成功转存的结果生成记录
pub fn records_for(result: &TransferBatchResult, class: ExpirationClass) -> Vec<SourceRecord> {
    let now = chrono::Utc::now().timestamp();
    result
        .transferred()
        .map(|outcome| SourceRecord::from_outcome(outcome, class, now))
        .collect()
}

/// 结果持久化接口
#[async_trait]
pub trait ResultPersister: Send + Sync {
    async fn save_batch(&self, records: &[SourceRecord]) -> Result<()>;
}

/// 以 JSON Lines 格式追加写入文件
#[derive(Debug, Clone)]
pub struct JsonlPersister {
    path: PathBuf,
}

impl JsonlPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录
    pub async fn load_all(&self) -> Result<Vec<SourceRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("读取记录文件失败: {}", self.path.display()))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("解析记录失败"))
            .collect()
    }
}

#[async_trait]
impl ResultPersister for JsonlPersister {
    async fn save_batch(&self, records: &[SourceRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.context("创建记录目录失败")?;
            }
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).context("序列化记录失败")?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("打开记录文件失败: {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .await
            .context("写入记录失败")?;
        file.flush().await.context("刷新记录文件失败")?;

        debug!("追加 {} 条记录到 {}", records.len(), self.path.display());
        Ok(())
    }
}
