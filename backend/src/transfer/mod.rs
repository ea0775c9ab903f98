// 转存模块
//
// 批量转存分享链接并保存成功的结果

pub mod cleanup;
pub mod manager;
pub mod persist;
pub mod types;

pub use cleanup::{CleanupSummary, TempDirCleaner};
pub use manager::{TransferManager, TransferRunError};
pub use persist::{JsonlPersister, ResultPersister, SourceRecord};
pub use types::{CandidateLink, TransferBatchResult, TransferOutcome, TransferPolicy};
