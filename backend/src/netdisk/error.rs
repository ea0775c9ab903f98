//! 网盘错误处理模块
//!
//! 统一五个网盘实现的错误分类和重试策略

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 网盘操作错误
#[derive(Debug, Error)]
pub enum NetdiskError {
    /// 凭证未配置
    #[error("{0}未配置")]
    NotConfigured(String),

    /// 分享链接格式错误
    #[error("分享链接格式错误: {0}")]
    InvalidShareUrl(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 凭证过期或无效
    #[error("凭证已过期或无效: {0}")]
    CredentialExpired(String),

    /// 触发安全验证页面
    #[error("触发安全验证，请稍后重试或更新Cookie")]
    VerificationRequired,

    /// API 错误
    #[error("API 错误: {code} - {message}")]
    Api { code: i64, message: String },

    /// 网盘容量不足
    #[error("网盘容量不足")]
    CapacityLimit,

    /// 响应解析失败
    #[error("解析响应失败: {0}")]
    Parse(String),

    /// 异步任务失败
    #[error("任务失败: {0}")]
    TaskFailed(String),

    /// 异步任务轮询超时
    #[error("任务超时: task_id={task_id}, 已轮询 {attempts} 次")]
    TaskTimeout { task_id: String, attempts: u32 },

    /// 分享内容为空或全部为广告
    #[error("资源内容为空")]
    EmptyShare,

    /// 目录不存在
    #[error("目录不存在: {0}")]
    DirectoryNotFound(String),

    /// 操作取消
    #[error("操作已取消")]
    Cancelled,
}

impl NetdiskError {
    /// 构造 API 错误
    pub fn api(code: impl Into<i64>, message: impl Into<String>) -> Self {
        NetdiskError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 获取错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetdiskError::NotConfigured(_) => ErrorCategory::Configuration,
            NetdiskError::Network(_) => ErrorCategory::Transient,
            NetdiskError::CredentialExpired(_) | NetdiskError::VerificationRequired => {
                ErrorCategory::Permission
            }
            NetdiskError::InvalidShareUrl(_) | NetdiskError::Parse(_) => ErrorCategory::Protocol,
            NetdiskError::TaskTimeout { .. } => ErrorCategory::Timeout,
            NetdiskError::Cancelled => ErrorCategory::UserCancelled,
            NetdiskError::Api { .. }
            | NetdiskError::CapacityLimit
            | NetdiskError::TaskFailed(_)
            | NetdiskError::EmptyShare
            | NetdiskError::DirectoryNotFound(_) => ErrorCategory::Remote,
        }
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

impl From<reqwest::Error> for NetdiskError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NetdiskError::Parse(e.to_string())
        } else {
            NetdiskError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for NetdiskError {
    fn from(e: serde_json::Error) -> Self {
        NetdiskError::Parse(e.to_string())
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 临时错误（可重试）
    Transient,
    /// 配置错误（凭证缺失）
    Configuration,
    /// 权限错误（凭证失效、安全验证）
    Permission,
    /// 网盘返回的业务错误
    Remote,
    /// 协议错误（链接或响应格式不符）
    Protocol,
    /// 轮询超时
    Timeout,
    /// 用户取消
    UserCancelled,
}

/// 重试策略
///
/// 每次重试前等待 `[min_delay_ms, max_delay_ms]` 之间的随机时长
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次）
    pub max_attempts: u32,
    /// 最小延迟（毫秒）
    pub min_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// 计算下一次重试前的延迟
    pub fn next_delay(&self) -> Duration {
        let (lo, hi) = if self.min_delay_ms <= self.max_delay_ms {
            (self.min_delay_ms, self.max_delay_ms)
        } else {
            (self.max_delay_ms, self.min_delay_ms)
        };
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            NetdiskError::Network("reset".into()).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            NetdiskError::NotConfigured("夸克网盘".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            NetdiskError::VerificationRequired.category(),
            ErrorCategory::Permission
        );
        assert_eq!(
            NetdiskError::api(-9, "文件不存在").category(),
            ErrorCategory::Remote
        );
        assert_eq!(
            NetdiskError::TaskTimeout {
                task_id: "t".into(),
                attempts: 3
            }
            .category(),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(NetdiskError::Network("timeout".into()).is_retryable());
        assert!(!NetdiskError::CapacityLimit.is_retryable());
        assert!(!NetdiskError::Cancelled.is_retryable());
        assert!(!NetdiskError::Parse("bad json".into()).is_retryable());
    }

    #[test]
    fn test_error_message() {
        let err = NetdiskError::api(31066, "file does not exist");
        assert_eq!(err.to_string(), "API 错误: 31066 - file does not exist");
        assert_eq!(
            NetdiskError::NotConfigured("UC网盘".into()).to_string(),
            "UC网盘未配置"
        );
    }

    #[test]
    fn test_retry_delay_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }

        let inverted = RetryPolicy {
            max_attempts: 2,
            min_delay_ms: 20,
            max_delay_ms: 10,
        };
        let delay = inverted.next_delay();
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
    }
}
