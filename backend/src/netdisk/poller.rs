// 异步任务轮询器
//
// 夸克、迅雷的转存和分享接口只返回任务ID，需要轮询直到完成

use crate::netdisk::error::NetdiskError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 单次查询的任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState<T> {
    /// 仍在执行
    Pending,
    /// 执行成功，携带结果
    Succeeded(T),
    /// 网盘明确报告失败
    Failed(String),
}

/// 异步任务轮询器
#[derive(Debug, Clone)]
pub struct AsyncTaskPoller {
    interval: Duration,
    cancel: CancellationToken,
}

impl AsyncTaskPoller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// 轮询任务直到成功、失败或达到最大次数
    ///
    /// `probe` 接收从 0 开始的轮询序号。查询本身出错只记录日志并继续轮询，
    /// 网盘报告的失败立即终止
    pub async fn wait<T, F, Fut>(
        &self,
        task_id: &str,
        max_attempts: u32,
        mut probe: F,
    ) -> Result<T, NetdiskError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<TaskState<T>, NetdiskError>>,
    {
        for attempt in 0..max_attempts {
            if self.cancel.is_cancelled() {
                return Err(NetdiskError::Cancelled);
            }

            match probe(attempt).await {
                Ok(TaskState::Succeeded(value)) => {
                    debug!("任务完成: task_id={}, attempt={}", task_id, attempt + 1);
                    return Ok(value);
                }
                Ok(TaskState::Failed(message)) => {
                    return Err(NetdiskError::TaskFailed(message));
                }
                Ok(TaskState::Pending) => {}
                Err(NetdiskError::Cancelled) => return Err(NetdiskError::Cancelled),
                Err(e) => {
                    warn!("查询任务状态失败: task_id={}, 错误: {}", task_id, e);
                }
            }

            if attempt + 1 < max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(NetdiskError::Cancelled),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        Err(NetdiskError::TaskTimeout {
            task_id: task_id.to_string(),
            attempts: max_attempts,
        })
    }
}
