// Netdisk Transfer Library
// 网盘分享链接转存核心库

// 配置管理模块
pub mod config;

// 网盘API模块
pub mod netdisk;

// 转存模块
pub mod transfer;

// 导出常用类型
pub use config::{AppConfig, ConfigReader, MemoryConfigStore, TransferConfig};
pub use netdisk::{
    DefaultNetdiskFactory, ExpirationClass, Netdisk, NetdiskError, NetdiskFactory, PanType,
    TransferReceipt,
};
pub use transfer::{
    CandidateLink, JsonlPersister, TempDirCleaner, TransferBatchResult, TransferManager,
    TransferOutcome, TransferPolicy,
};
