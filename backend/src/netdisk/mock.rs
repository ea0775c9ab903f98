// 测试用网盘实现

use crate::config::MemoryConfigStore;
use crate::netdisk::error::NetdiskError;
use crate::netdisk::factory::NetdiskFactory;
use crate::netdisk::poller::{AsyncTaskPoller, TaskState};
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 模拟转存行为
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// 延迟后成功
    Succeed(Duration),
    /// 延迟后失败
    Fail(Duration),
    /// 链接中包含任一子串时失败，否则成功
    FailMatching(Vec<String>),
    /// 链接中包含任一子串时延迟后成功，否则立即成功
    SlowMatching(Vec<String>, Duration),
    /// 提交异步任务后轮询，第 `ready_after` 次查询完成
    AsyncTask { ready_after: u32, max_attempts: u32 },
}

/// 调用记录
#[derive(Debug, Default)]
pub struct MockCalls {
    pub created: AtomicUsize,
    pub transfers: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<(PanType, String)>>,
    pub created_dirs: Mutex<Vec<(PanType, String)>>,
    /// 异步任务查询次数
    pub polls: AtomicU32,
    /// 正在执行的转存数
    pub in_flight: AtomicUsize,
    /// 同时执行的转存数峰值
    pub peak: AtomicUsize,
}

/// 转存期间计入 in_flight，结束或被丢弃时减去
struct InFlightGuard<'a>(&'a MockCalls);

impl<'a> InFlightGuard<'a> {
    fn enter(calls: &'a MockCalls) -> Self {
        let now = calls.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        calls.peak.fetch_max(now, Ordering::SeqCst);
        Self(calls)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockNetdisk {
    pan_type: PanType,
    behavior: MockBehavior,
    calls: Arc<MockCalls>,
    fail_delete: bool,
    ctx: BackendContext,
}

#[async_trait]
impl Netdisk for MockNetdisk {
    fn pan_type(&self) -> PanType {
        self.pan_type
    }

    fn is_configured(&mut self) -> bool {
        true
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        self.calls
            .transfers
            .lock()
            .unwrap()
            .push(share_url.to_string());

        let _guard = InFlightGuard::enter(&self.calls);

        let mut fid = format!("fid-{}", share_url);
        match &self.behavior {
            MockBehavior::Succeed(delay) => tokio::time::sleep(*delay).await,
            MockBehavior::Fail(delay) => {
                tokio::time::sleep(*delay).await;
                return Err(NetdiskError::api(-1, "模拟转存失败"));
            }
            MockBehavior::FailMatching(patterns) => {
                if patterns.iter().any(|p| share_url.contains(p.as_str())) {
                    return Err(NetdiskError::api(-1, "模拟转存失败"));
                }
            }
            MockBehavior::SlowMatching(patterns, delay) => {
                if patterns.iter().any(|p| share_url.contains(p.as_str())) {
                    tokio::time::sleep(*delay).await;
                }
            }
            MockBehavior::AsyncTask {
                ready_after,
                max_attempts,
            } => {
                let task_id = format!("task-{}", share_url);
                let ready_after = *ready_after;
                let polled = &AtomicU32::new(0);
                let total = &self.calls.polls;
                fid = self
                    .ctx
                    .poller
                    .wait(&task_id, *max_attempts, move |_| async move {
                        total.fetch_add(1, Ordering::SeqCst);
                        let n = polled.fetch_add(1, Ordering::SeqCst) + 1;
                        if n >= ready_after {
                            Ok(TaskState::Succeeded(format!("polled-{}", n)))
                        } else {
                            Ok(TaskState::Pending)
                        }
                    })
                    .await?;
            }
        }

        Ok(TransferReceipt {
            title: format!("转存-{}", share_url),
            share_url: format!("{}-new", share_url),
            password: if password.is_empty() { "6666".into() } else { format!("{}-new", password) },
            fid,
            expired_type: class.code(),
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        Ok(())
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        if self.fail_delete {
            return Err(NetdiskError::DirectoryNotFound(path.to_string()));
        }
        self.calls
            .deleted
            .lock()
            .unwrap()
            .push((self.pan_type, path.to_string()));
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.calls
            .created_dirs
            .lock()
            .unwrap()
            .push((self.pan_type, path.to_string()));
        Ok(())
    }
}

/// 测试用工厂
pub struct MockFactory {
    pub behavior: MockBehavior,
    pub calls: Arc<MockCalls>,
    /// 已配置的网盘
    pub configured: HashSet<PanType>,
    /// 删除目录失败的网盘
    pub fail_delete: HashSet<PanType>,
}

impl MockFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(MockCalls::default()),
            configured: PanType::ALL.into_iter().collect(),
            fail_delete: HashSet::new(),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: HashSet::new(),
            ..Self::new(MockBehavior::Succeed(Duration::ZERO))
        }
    }
}

impl NetdiskFactory for MockFactory {
    fn create(
        &self,
        pan_type: PanType,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Netdisk>, NetdiskError> {
        if !self.configured.contains(&pan_type) {
            return Err(NetdiskError::NotConfigured(
                pan_type.display_name().to_string(),
            ));
        }
        self.calls.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockNetdisk {
            pan_type,
            behavior: self.behavior.clone(),
            calls: self.calls.clone(),
            fail_delete: self.fail_delete.contains(&pan_type),
            ctx: BackendContext::new(
                Arc::new(MemoryConfigStore::new()),
                AsyncTaskPoller::new(Duration::from_millis(1), cancel),
            ),
        }))
    }
}
