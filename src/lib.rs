//! mscfs-bringup - 大容量存储文件系统上板验证
//!
//! 等待存储设备接入，扫描 MBR 分区表，在每个可识别的分区上挂载文件系统
//! 并执行一组固定顺序的测试:
//! - 分区扫描 (`fs::partition`)
//! - 块缓存与回写控制 (`fs::cache`)
//! - 单分区阶段序列与失败即止的编排 (`harness`)
//! - 条件编译日志系统 (`util::log`)
//!
//! 库本身 `no_std` 且不使用堆；板级入口见 `main.rs` (feature `board`)。

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod util;

pub mod config;
pub mod fs;
pub mod harness;

#[cfg(test)]
mod testing;

// ===== 重导出常用类型 =====
pub use config::{CacheMode, ConfigError, TestRunConfig};
pub use fs::{BlockCache, BlockDevice, CachedDisk, Filesystem, FsError, Mount, PartitionTable, ScanError, Slot};
pub use harness::{Harness, LogReporter, MassStorageHost, Phase, PhaseError, Reporter, RunOutcome};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
