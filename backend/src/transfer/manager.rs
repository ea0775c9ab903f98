// 转存批次管理器
//
// 第一阶段并发转存前 N 条链接，先完成的 N 个成功结果被采纳；
// 第二阶段用剩余链接原样补足展示数

use crate::config::TransferConfig;
use crate::netdisk::{ExpirationClass, NetdiskFactory, PanType};
use crate::transfer::persist::{records_for, ResultPersister};
use crate::transfer::types::{CandidateLink, TransferBatchResult, TransferOutcome, TransferPolicy};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 批次错误
#[derive(Debug, Error)]
pub enum TransferRunError {
    /// 调用方取消
    #[error("转存已取消")]
    Cancelled,
}

/// 第一阶段共享状态
#[derive(Default)]
struct AcceptState {
    /// 已采纳的成功数
    transferred: usize,
    /// 达到目标后停止启动新的尝试
    stop: bool,
    /// (输入序号, 结果)
    accepted: Vec<(usize, TransferOutcome)>,
}

impl AcceptState {
    /// 采纳成功结果，超过目标数时丢弃并返回 false
    fn accept(&mut self, index: usize, outcome: TransferOutcome, target: usize) -> bool {
        if self.transferred >= target {
            return false;
        }
        self.transferred += 1;
        self.accepted.push((index, outcome));
        if self.transferred >= target {
            self.stop = true;
        }
        true
    }
}

/// 单次尝试的参数
#[derive(Clone, Copy)]
struct AttemptSettings {
    pan_type: PanType,
    class: ExpirationClass,
    timeout: Duration,
    target: usize,
}

/// 转存管理器
pub struct TransferManager {
    /// 网盘工厂
    factory: Arc<dyn NetdiskFactory>,
    /// 转存配置
    config: TransferConfig,
}

impl TransferManager {
    pub fn new(factory: Arc<dyn NetdiskFactory>, config: TransferConfig) -> Self {
        Self { factory, config }
    }

    /// 执行转存批次
    ///
    /// 单条失败只记录日志，只有取消会返回错误
    pub async fn run(
        &self,
        items: &[CandidateLink],
        policy: &TransferPolicy,
        cancel: &CancellationToken,
    ) -> Result<TransferBatchResult, TransferRunError> {
        let batch_id = Uuid::new_v4();
        let max_transfer = policy.effective_transfer_count(self.config.max_success);
        let max_display = policy.effective_display_count(self.config.max_success);
        let phase1_count = max_transfer.min(items.len());

        info!(
            "开始转存批次: batch_id={}, 网盘={}, 链接数={}, 目标成功数={}, 展示数={}",
            batch_id,
            policy.pan_type.display_name(),
            items.len(),
            max_transfer,
            max_display
        );

        if cancel.is_cancelled() {
            return Err(TransferRunError::Cancelled);
        }

        let settings = AttemptSettings {
            pan_type: policy.pan_type,
            class: policy.expiration,
            timeout: self.config.timeout(),
            target: max_transfer,
        };
        let accepted = self
            .run_phase1(&items[..phase1_count], settings, cancel)
            .await;

        if cancel.is_cancelled() {
            warn!("转存批次已取消: batch_id={}", batch_id);
            return Err(TransferRunError::Cancelled);
        }

        let success = accepted.len();
        let mut results = accepted;

        // 第二阶段：原样补足展示数
        let remaining_display = max_display.saturating_sub(success);
        if remaining_display > 0 && phase1_count < items.len() {
            let end = (phase1_count + remaining_display).min(items.len());
            results.extend(
                items[phase1_count..end]
                    .iter()
                    .map(|item| TransferOutcome::pass_through(item, policy.pan_type)),
            );
        }

        let failed = phase1_count.saturating_sub(success);
        info!(
            "转存批次完成: batch_id={}, 成功={}, 失败={}, 返回={}",
            batch_id,
            success,
            failed,
            results.len()
        );

        Ok(TransferBatchResult {
            total: results.len(),
            success,
            failed,
            results,
        })
    }

    /// 执行批次并保存成功转存的记录
    ///
    /// 保存失败只记录日志，不影响返回的批次结果
    pub async fn transfer_and_save(
        &self,
        items: &[CandidateLink],
        policy: &TransferPolicy,
        cancel: &CancellationToken,
        persister: &dyn ResultPersister,
    ) -> Result<TransferBatchResult, TransferRunError> {
        let result = self.run(items, policy, cancel).await?;

        let records = records_for(&result, policy.expiration);
        if !records.is_empty() {
            match persister.save_batch(&records).await {
                Ok(()) => info!("已保存转存记录: count={}", records.len()),
                Err(e) => error!("保存转存记录失败: {:#}", e),
            }
        }

        Ok(result)
    }

    /// 第一阶段：并发转存，返回按输入顺序排列的成功结果
    async fn run_phase1(
        &self,
        items: &[CandidateLink],
        settings: AttemptSettings,
        cancel: &CancellationToken,
    ) -> Vec<TransferOutcome> {
        let state = Arc::new(Mutex::new(AcceptState::default()));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if state.lock().await.stop {
                info!("已达到目标成功数，停止启动新的转存");
                break;
            }

            // 每次尝试使用独立的网盘实例
            let backend = match self.factory.create(settings.pan_type, cancel.child_token()) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!("创建网盘实例失败: url={}, 错误: {}", item.url, e);
                    continue;
                }
            };

            let item = item.clone();
            let state = state.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let mut backend = backend;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if state.lock().await.stop {
                    debug!("已达到目标成功数，跳过: {}", item.url);
                    return;
                }

                let attempt = tokio::time::timeout(
                    settings.timeout,
                    backend.transfer(&item.url, &item.password, settings.class),
                );
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = attempt => result,
                };

                let receipt = match result {
                    Ok(Ok(receipt)) => receipt,
                    Ok(Err(e)) => {
                        warn!("转存失败: url={}, 错误: {}", item.url, e);
                        return;
                    }
                    Err(_) => {
                        warn!(
                            "转存超时: url={}, timeout={}s",
                            item.url,
                            settings.timeout.as_secs()
                        );
                        return;
                    }
                };

                let outcome = TransferOutcome::transferred(&item, settings.pan_type, receipt);
                let mut state = state.lock().await;
                if state.accept(index, outcome, settings.target) {
                    info!("转存成功: url={}, 已成功={}", item.url, state.transferred);
                } else {
                    debug!("已达到目标成功数，丢弃迟到的结果: {}", item.url);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("转存任务异常退出: {}", e);
            }
        }

        let mut accepted = std::mem::take(&mut state.lock().await.accepted);
        accepted.sort_by_key(|(index, _)| *index);
        accepted.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdisk::mock::{MockBehavior, MockFactory};
    use crate::transfer::persist::SourceRecord;
    use crate::transfer::types::PASS_THROUGH_MESSAGE;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::Ordering;

    fn items(n: usize) -> Vec<CandidateLink> {
        (0..n)
            .map(|i| {
                CandidateLink::new(
                    format!("资源{}", i),
                    format!("https://pan.quark.cn/s/item{}", i),
                    PanType::Quark,
                )
                .with_password(format!("p{}", i))
            })
            .collect()
    }

    fn config(max_concurrent: usize, timeout_secs: u64) -> TransferConfig {
        TransferConfig {
            max_concurrent,
            timeout_secs,
            max_success: 2,
            poll_interval_ms: 1,
        }
    }

    fn policy(max_transfer: usize, max_display: usize) -> TransferPolicy {
        TransferPolicy {
            max_transfer_count: max_transfer,
            max_display_count: max_display,
            expiration: ExpirationClass::Permanent,
            pan_type: PanType::Quark,
        }
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(Duration::ZERO)));
        let manager = TransferManager::new(factory.clone(), config(5, 5));
        let items = items(5);

        let result = manager
            .run(&items, &policy(2, 5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.total, 5);
        assert_eq!(result.success, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.results.len(), 5);

        assert!(result.results[0].transferred);
        assert_eq!(result.results[0].original_url, items[0].url);
        assert_eq!(result.results[1].url, format!("{}-new", items[1].url));
        for (outcome, item) in result.results[2..].iter().zip(&items[2..]) {
            assert!(!outcome.transferred);
            assert_eq!(outcome.url, item.url);
            assert_eq!(outcome.password, item.password);
            assert_eq!(outcome.message, PASS_THROUGH_MESSAGE);
        }

        // 第一阶段只尝试前两条
        assert_eq!(factory.calls.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Fail(Duration::ZERO)));
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(5);

        let result = manager
            .run(&items, &policy(2, 5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 2);
        assert_eq!(result.total, 3);
        assert_eq!(result.total, result.results.len());
        let urls: Vec<&str> = result.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec![items[2].url.as_str(), items[3].url.as_str(), items[4].url.as_str()]);
        assert!(result.results.iter().all(|r| !r.transferred));
    }

    #[tokio::test]
    async fn test_partial_success_keeps_input_order() {
        let factory = Arc::new(MockFactory::new(MockBehavior::FailMatching(vec![
            "item1".to_string(),
        ])));
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(6);

        let result = manager
            .run(&items, &policy(3, 4), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 2);
        assert_eq!(result.failed, 1);
        let originals: Vec<&str> = result
            .results
            .iter()
            .map(|r| r.original_url.as_str())
            .collect();
        assert_eq!(
            originals,
            vec![
                items[0].url.as_str(),
                items[2].url.as_str(),
                items[3].url.as_str(),
                items[4].url.as_str()
            ]
        );
        assert!(result.results[0].transferred && result.results[1].transferred);
        assert!(!result.results[2].transferred && !result.results[3].transferred);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_degrades() {
        let factory = Arc::new(MockFactory::unconfigured());
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(4);

        let result = manager
            .run(&items, &policy(2, 3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 2);
        assert_eq!(result.results.len(), 2);
        assert!(result.results.iter().all(|r| r.message == PASS_THROUGH_MESSAGE));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(
            Duration::from_secs(3),
        )));
        let manager = TransferManager::new(factory, config(5, 1));
        let items = items(2);

        let result = manager
            .run(&items, &policy(2, 2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 2);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(
            Duration::from_millis(20),
        )));
        let manager = TransferManager::new(factory.clone(), config(1, 5));
        let items = items(4);

        let result = manager
            .run(&items, &policy(4, 4), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 4);
        assert_eq!(factory.calls.peak.load(Ordering::SeqCst), 1);
        assert_eq!(factory.calls.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_sibling() {
        let factory = Arc::new(MockFactory::new(MockBehavior::SlowMatching(
            vec!["item0".to_string()],
            Duration::from_secs(3),
        )));
        let manager = TransferManager::new(factory, config(5, 1));
        let items = items(3);

        let result = manager
            .run(&items, &policy(2, 3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total, 2);
        assert!(result.results[0].transferred);
        assert_eq!(result.results[0].original_url, items[1].url);
        assert!(!result.results[1].transferred);
        assert_eq!(result.results[1].url, items[2].url);
    }

    #[tokio::test]
    async fn test_async_backend_in_batch() {
        let factory = Arc::new(MockFactory::new(MockBehavior::AsyncTask {
            ready_after: 3,
            max_attempts: 5,
        }));
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(3);

        let result = manager
            .run(&items, &policy(2, 3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.success, 2);
        assert!(result.transferred().all(|r| r.fid == "polled-3"));

        let factory = Arc::new(MockFactory::new(MockBehavior::AsyncTask {
            ready_after: 3,
            max_attempts: 2,
        }));
        let manager = TransferManager::new(factory, config(5, 5));
        let result = manager
            .run(&items, &policy(2, 3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 2);
        assert_eq!(result.results.len(), 1);
    }

    #[tokio::test]
    async fn test_defaults_when_policy_counts_are_zero() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(Duration::ZERO)));
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(5);

        let result = manager
            .run(&items, &policy(0, 0), &CancellationToken::new())
            .await
            .unwrap();

        // 默认成功数为 2，展示数等于转存数
        assert_eq!(result.success, 2);
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(Duration::ZERO)));
        let manager = TransferManager::new(factory, config(5, 5));

        let result = manager
            .run(&[], &policy(2, 5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, TransferBatchResult::default());
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(
            Duration::from_secs(30),
        )));
        let manager = Arc::new(TransferManager::new(factory, config(5, 60)));
        let cancel = CancellationToken::new();

        let handle = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.run(&items(3), &policy(2, 3), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransferRunError::Cancelled)));
    }

    #[test]
    fn test_accept_discards_late_success() {
        let item = items(1).remove(0);
        let mut state = AcceptState::default();
        let outcome = TransferOutcome::pass_through(&item, PanType::Quark);

        assert!(state.accept(0, outcome.clone(), 2));
        assert!(!state.stop);
        assert!(state.accept(1, outcome.clone(), 2));
        assert!(state.stop);
        assert!(!state.accept(2, outcome, 2));
        assert_eq!(state.transferred, 2);
        assert_eq!(state.accepted.len(), 2);
    }

    /// 记录保存内容的持久化实现
    #[derive(Default)]
    struct RecordingPersister {
        saved: std::sync::Mutex<Vec<SourceRecord>>,
    }

    #[async_trait]
    impl ResultPersister for RecordingPersister {
        async fn save_batch(&self, records: &[SourceRecord]) -> anyhow::Result<()> {
            self.saved.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transfer_and_save_persists_transferred_only() {
        let factory = Arc::new(MockFactory::new(MockBehavior::Succeed(Duration::ZERO)));
        let manager = TransferManager::new(factory, config(5, 5));
        let items = items(4);
        let persister = RecordingPersister::default();

        let mut policy = policy(2, 4);
        policy.expiration = ExpirationClass::Temporary;
        let result = manager
            .transfer_and_save(&items, &policy, &CancellationToken::new(), &persister)
            .await
            .unwrap();
        assert_eq!(result.results.len(), 4);

        let saved = persister.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].content, items[0].url);
        assert_eq!(saved[0].url, format!("{}-new", items[0].url));
        assert_eq!(saved[0].is_time, 1);
        assert_eq!(saved[0].is_type, PanType::Quark.code());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_batch_bounds(
            n in 0usize..8,
            max_transfer in 1usize..5,
            max_display in 0usize..8,
            fail_mask in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let patterns: Vec<String> = fail_mask
                .iter()
                .enumerate()
                .filter(|(_, fail)| **fail)
                .map(|(i, _)| format!("item{}", i))
                .collect();
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let result = runtime.block_on(async {
                let factory = Arc::new(MockFactory::new(MockBehavior::FailMatching(patterns)));
                let manager = TransferManager::new(factory, config(3, 5));
                manager
                    .run(&items(n), &policy(max_transfer, max_display), &CancellationToken::new())
                    .await
                    .unwrap()
            });

            let phase1 = max_transfer.min(n);
            let display = if max_display == 0 { max_transfer } else { max_display };
            prop_assert!(result.success <= max_transfer);
            prop_assert_eq!(result.total, result.results.len());
            prop_assert_eq!(result.success + result.failed, phase1);
            prop_assert_eq!(result.transferred().count(), result.success);
            prop_assert!(result.results[..result.success].iter().all(|r| r.transferred));

            let passed = &result.results[result.success..];
            let expected_pass = display.saturating_sub(result.success).min(n - phase1);
            prop_assert_eq!(passed.len(), expected_pass);
            for r in passed {
                prop_assert!(!r.transferred);
                prop_assert_eq!(&r.url, &r.original_url);
            }
        }
    }
}
