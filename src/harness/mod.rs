//! 分区测试编排
//!
//! - `host`: 等待大容量存储设备就绪
//! - `exercise`: 具体的文件系统测试例程
//! - `phases`: 单分区的固定阶段序列
//! - `orchestrator`: 扫描并逐分区执行，失败即止
//! - `report`: 进度输出与终止闪烁
//! - `sdcard`: SPI SD 卡主机 (`sdcard` feature)

pub mod exercise;
pub mod host;
pub mod orchestrator;
pub mod phases;
pub mod report;
#[cfg(feature = "sdcard")]
pub mod sdcard;

pub use host::{wait_ready, HostError, MassStorageHost};
pub use orchestrator::{Harness, RunOutcome};
pub use phases::{Phase, PhaseError, PhaseRunner};
pub use report::{blink_once, closing_line, halt, LedReporter, LogReporter, Reporter, RESTART_HINT};
#[cfg(feature = "sdcard")]
pub use sdcard::{CardEvent, SdBlockDevice, SdHost, SD_FAST_KHZ, SD_INIT_KHZ};
