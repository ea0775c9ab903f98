// 转存批次数据类型定义

use crate::netdisk::{ExpirationClass, PanType, TransferReceipt};
use serde::{Deserialize, Serialize};

/// 未转存条目的提示
pub const PASS_THROUGH_MESSAGE: &str = "原始链接(未转存)";

/// 候选分享链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    /// 资源标题
    pub title: String,
    /// 分享链接
    pub url: String,
    /// 提取码
    #[serde(default)]
    pub password: String,
    /// 网盘类型
    #[serde(default = "default_pan_type")]
    pub pan_type: PanType,
    /// 资源大小（仅展示）
    #[serde(default)]
    pub size: String,
    /// 资源时间（仅展示）
    #[serde(default)]
    pub time: String,
}

fn default_pan_type() -> PanType {
    PanType::Quark
}

impl CandidateLink {
    pub fn new(title: impl Into<String>, url: impl Into<String>, pan_type: PanType) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            password: String::new(),
            pan_type,
            size: String::new(),
            time: String::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

/// 转存策略
///
/// 数量为 0 时使用默认值：转存数取配置的默认成功数，展示数取转存数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// 最多转存成功的条数
    #[serde(default)]
    pub max_transfer_count: usize,
    /// 最多返回的条数
    #[serde(default)]
    pub max_display_count: usize,
    /// 新分享的有效期
    #[serde(default)]
    pub expiration: ExpirationClass,
    /// 目标网盘
    pub pan_type: PanType,
}

impl TransferPolicy {
    pub fn new(pan_type: PanType) -> Self {
        Self {
            max_transfer_count: 0,
            max_display_count: 0,
            expiration: ExpirationClass::Permanent,
            pan_type,
        }
    }

    /// 实际转存目标数
    pub fn effective_transfer_count(&self, default_success: usize) -> usize {
        if self.max_transfer_count == 0 {
            default_success
        } else {
            self.max_transfer_count
        }
    }

    /// 实际展示数
    pub fn effective_display_count(&self, default_success: usize) -> usize {
        if self.max_display_count == 0 {
            self.effective_transfer_count(default_success)
        } else {
            self.max_display_count
        }
    }
}

/// 单条转存结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// 是否可展示（成功转存或原始链接）
    pub success: bool,
    /// 是否由本次批次转存
    pub transferred: bool,
    /// 资源标题
    pub title: String,
    /// 原始链接
    pub original_url: String,
    /// 展示链接，未转存时等于原始链接
    pub url: String,
    /// 展示提取码
    pub password: String,
    /// 网盘内文件ID
    pub fid: String,
    /// 结果说明
    pub message: String,
    /// 网盘返回的有效期编码
    pub expired_type: i32,
    /// 网盘类型
    pub pan_type: PanType,
}

impl TransferOutcome {
    /// 成功转存
    pub fn transferred(item: &CandidateLink, pan_type: PanType, receipt: TransferReceipt) -> Self {
        Self {
            success: true,
            transferred: true,
            title: item.title.clone(),
            original_url: item.url.clone(),
            url: receipt.share_url,
            password: receipt.password,
            fid: receipt.fid,
            message: "转存成功".to_string(),
            expired_type: receipt.expired_type,
            pan_type,
        }
    }

    /// 转存失败
    pub fn failed(item: &CandidateLink, pan_type: PanType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            transferred: false,
            title: item.title.clone(),
            original_url: item.url.clone(),
            url: item.url.clone(),
            password: item.password.clone(),
            fid: String::new(),
            message: message.into(),
            expired_type: 0,
            pan_type,
        }
    }

    /// 原样返回
    pub fn pass_through(item: &CandidateLink, pan_type: PanType) -> Self {
        Self {
            success: true,
            message: PASS_THROUGH_MESSAGE.to_string(),
            ..Self::failed(item, pan_type, String::new())
        }
    }
}

/// 批次结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatchResult {
    /// 返回条数，等于 `results` 的长度
    pub total: usize,
    /// 成功转存条数
    pub success: usize,
    /// 第一阶段中未成功的条数
    pub failed: usize,
    /// 成功转存在前，原始链接在后
    pub results: Vec<TransferOutcome>,
}

impl TransferBatchResult {
    /// 成功转存的结果
    pub fn transferred(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.results.iter().filter(|r| r.transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_counts() {
        let mut policy = TransferPolicy::new(PanType::Quark);
        assert_eq!(policy.effective_transfer_count(2), 2);
        assert_eq!(policy.effective_display_count(2), 2);

        policy.max_transfer_count = 3;
        assert_eq!(policy.effective_display_count(2), 3);

        policy.max_display_count = 10;
        assert_eq!(policy.effective_transfer_count(2), 3);
        assert_eq!(policy.effective_display_count(2), 10);
    }

    #[test]
    fn test_pass_through_keeps_original() {
        let item = CandidateLink::new("剧集", "https://pan.quark.cn/s/a", PanType::Quark)
            .with_password("1234");
        let outcome = TransferOutcome::pass_through(&item, PanType::Quark);
        assert!(outcome.success);
        assert!(!outcome.transferred);
        assert_eq!(outcome.url, item.url);
        assert_eq!(outcome.password, "1234");
        assert_eq!(outcome.message, PASS_THROUGH_MESSAGE);
    }

    #[test]
    fn test_candidate_from_json() {
        let item: CandidateLink =
            serde_json::from_str(r#"{"title":"纪录片","url":"https://pan.baidu.com/s/1x","pan_type":"baidu"}"#)
                .unwrap();
        assert_eq!(item.pan_type, PanType::Baidu);
        assert!(item.password.is_empty());

        let policy: TransferPolicy =
            serde_json::from_str(r#"{"pan_type":"quark","expiration":"temporary"}"#).unwrap();
        assert_eq!(policy.max_transfer_count, 0);
        assert!(policy.expiration.is_temporary());
    }
}
