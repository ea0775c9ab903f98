// 临时资源目录清理
//
// 临时分享只保留约两天，定期删除并重建各网盘的临时转存目录

use crate::config::ConfigReader;
use crate::netdisk::{ExpirationClass, NetdiskError, NetdiskFactory, PanType};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 清理开关配置键
pub const DELETE_NETDISK_FILES_KEY: &str = "delete_netdisk_files";

/// 清理结果汇总
#[derive(Debug, Default)]
pub struct CleanupSummary {
    /// 清理成功的网盘
    pub succeeded: Vec<PanType>,
    /// 清理失败的网盘及原因
    pub failed: Vec<(PanType, String)>,
    /// 未配置临时目录或凭证而跳过的网盘
    pub skipped: Vec<PanType>,
}

impl CleanupSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// 临时目录清理器
pub struct TempDirCleaner {
    factory: Arc<dyn NetdiskFactory>,
    config: Arc<dyn ConfigReader>,
}

impl TempDirCleaner {
    pub fn new(factory: Arc<dyn NetdiskFactory>, config: Arc<dyn ConfigReader>) -> Self {
        Self { factory, config }
    }

    /// 清理开关是否打开
    pub fn is_enabled(&self) -> bool {
        matches!(
            self.config
                .get_non_empty(DELETE_NETDISK_FILES_KEY)
                .as_deref(),
            Some("1") | Some("true")
        )
    }

    /// 临时目录，未配置或为根目录时返回 None
    fn temp_dir(&self, pan_type: PanType) -> Option<String> {
        self.config
            .get_non_empty(&pan_type.folder_key(ExpirationClass::Temporary))
            .filter(|dir| dir != "0" && !dir.trim_matches('/').is_empty())
    }

    /// 清理所有网盘的临时目录
    pub async fn clean_all(&self, cancel: &CancellationToken) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        for pan_type in PanType::ALL {
            if cancel.is_cancelled() {
                warn!("临时目录清理已取消");
                break;
            }

            let Some(dir) = self.temp_dir(pan_type) else {
                summary.skipped.push(pan_type);
                continue;
            };

            match self.clean_one(pan_type, &dir, cancel).await {
                Ok(()) => {
                    info!("{}临时目录已重建: {}", pan_type.display_name(), dir);
                    summary.succeeded.push(pan_type);
                }
                Err(NetdiskError::NotConfigured(_)) => {
                    summary.skipped.push(pan_type);
                }
                Err(e) => {
                    error!("{}临时目录清理失败: {}", pan_type.display_name(), e);
                    summary.failed.push((pan_type, e.to_string()));
                }
            }
        }

        info!(
            "临时目录清理完成: 成功={}, 失败={}, 跳过={}",
            summary.succeeded.len(),
            summary.failed.len(),
            summary.skipped.len()
        );
        summary
    }

    /// 开关打开时执行清理，有失败时返回错误
    pub async fn clean_netdisk_files(&self, cancel: &CancellationToken) -> Result<Option<CleanupSummary>> {
        if !self.is_enabled() {
            info!("临时目录清理未开启");
            return Ok(None);
        }

        let summary = self.clean_all(cancel).await;
        if summary.has_failures() {
            let detail: Vec<String> = summary
                .failed
                .iter()
                .map(|(pan, e)| format!("{}: {}", pan.display_name(), e))
                .collect();
            bail!("部分网盘临时目录清理失败: {}", detail.join("; "));
        }
        Ok(Some(summary))
    }

    async fn clean_one(
        &self,
        pan_type: PanType,
        dir: &str,
        cancel: &CancellationToken,
    ) -> Result<(), NetdiskError> {
        let mut backend = self.factory.create(pan_type, cancel.child_token())?;
        backend.delete_directory(dir).await?;
        backend.create_directory(dir).await
    }
}
