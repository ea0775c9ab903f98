// 网盘实例工厂

use crate::config::ConfigReader;
use crate::netdisk::error::NetdiskError;
use crate::netdisk::poller::AsyncTaskPoller;
use crate::netdisk::types::PanType;
use crate::netdisk::{
    AliyunClient, BackendContext, BaiduClient, Netdisk, QuarkClient, UcClient, XunleiClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 网盘实例工厂
///
/// 每次调用都返回全新的实例，实例之间不共享会话状态
pub trait NetdiskFactory: Send + Sync {
    fn create(
        &self,
        pan_type: PanType,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Netdisk>, NetdiskError>;
}

/// 默认工厂，从配置读取凭证
pub struct DefaultNetdiskFactory {
    config: Arc<dyn ConfigReader>,
    poll_interval: Duration,
}

impl DefaultNetdiskFactory {
    pub fn new(config: Arc<dyn ConfigReader>, poll_interval: Duration) -> Self {
        Self {
            config,
            poll_interval,
        }
    }
}

impl NetdiskFactory for DefaultNetdiskFactory {
    fn create(
        &self,
        pan_type: PanType,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Netdisk>, NetdiskError> {
        let credential = self
            .config
            .get_non_empty(pan_type.credential_key())
            .unwrap_or_default();
        let ctx = BackendContext::new(
            self.config.clone(),
            AsyncTaskPoller::new(self.poll_interval, cancel),
        );

        let mut backend: Box<dyn Netdisk> = match pan_type {
            PanType::Quark => Box::new(QuarkClient::new(credential, ctx)?),
            PanType::Baidu => Box::new(BaiduClient::new(credential, ctx)?),
            PanType::Aliyun => Box::new(AliyunClient::new(credential, ctx)?),
            PanType::Uc => Box::new(UcClient::new(credential, ctx)?),
            PanType::Xunlei => Box::new(XunleiClient::new(credential, ctx)?),
        };

        if !backend.is_configured() {
            return Err(NetdiskError::NotConfigured(
                pan_type.display_name().to_string(),
            ));
        }
        debug!("创建网盘实例: {}", pan_type.display_name());
        Ok(backend)
    }
}
