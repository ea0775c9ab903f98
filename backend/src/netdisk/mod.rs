// 网盘API模块

pub mod aliyun;
pub mod baidu;
pub mod error;
pub mod factory;
pub mod http;
pub mod poller;
pub mod policy;
pub mod quark;
pub mod types;
pub mod uc;
pub mod xunlei;

#[cfg(test)]
pub(crate) mod mock;

pub use aliyun::AliyunClient;
pub use baidu::BaiduClient;
pub use error::{ErrorCategory, NetdiskError, RetryPolicy};
pub use factory::{DefaultNetdiskFactory, NetdiskFactory};
pub use poller::{AsyncTaskPoller, TaskState};
pub use policy::DirectoryPolicy;
pub use quark::QuarkClient;
pub use types::{ExpirationClass, PanType, TransferReceipt};
pub use uc::UcClient;
pub use xunlei::XunleiClient;

use crate::config::ConfigReader;
use async_trait::async_trait;
use std::sync::Arc;

/// 网盘统一接口
///
/// 实例持有会话状态（Cookie、Token），转存过程中会被修改，
/// 因此每次转存尝试都应使用独立的实例
#[async_trait]
pub trait Netdisk: Send {
    /// 网盘类型
    fn pan_type(&self) -> PanType;

    /// 显示名称
    fn name(&self) -> &'static str {
        self.pan_type().display_name()
    }

    /// 凭证是否可用
    ///
    /// 构造时的凭证为空时重新读取一次最新配置
    fn is_configured(&mut self) -> bool;

    /// 转存分享链接并生成新的分享
    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError>;

    /// 测试凭证是否有效
    async fn test_connection(&mut self) -> Result<(), NetdiskError>;

    /// 删除根目录下的指定目录
    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError>;

    /// 在根目录下创建目录
    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError>;
}

/// 网盘实现共享的上下文
#[derive(Clone)]
pub struct BackendContext {
    /// 配置读取
    pub config: Arc<dyn ConfigReader>,
    /// 目录策略
    pub policy: DirectoryPolicy,
    /// 异步任务轮询器
    pub poller: AsyncTaskPoller,
}

impl BackendContext {
    pub fn new(config: Arc<dyn ConfigReader>, poller: AsyncTaskPoller) -> Self {
        Self {
            policy: DirectoryPolicy::new(config.clone()),
            config,
            poller,
        }
    }

    /// 凭证为空时从配置重新读取
    pub(crate) fn refresh_credential(&self, pan_type: PanType, current: &mut String) -> bool {
        if !current.trim().is_empty() {
            return true;
        }
        match self.config.get_non_empty(pan_type.credential_key()) {
            Some(latest) => {
                *current = latest;
                true
            }
            None => false,
        }
    }
}
