//! 单分区测试阶段
//!
//! 固定 12 个阶段，顺序不可调整。只有挂载、目录压力、文件读写、卸载
//! 四个阶段的失败会中止当前分区并终止整次运行；其余阶段的错误只记录日志。

use core::fmt;

use embedded_hal_async::delay::DelayNs;

use super::exercise;
use super::report::Reporter;
use crate::config::{CacheMode, TestRunConfig};
use crate::fs::{BlockCache, BlockDevice, CachedDisk, Filesystem, FsError, Mount, MOUNT_POINT};

/// 测试阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Phase {
    Mount,
    CacheWriteBackOn,
    PreCleanup,
    SuperblockStatsPre,
    ListDir,
    DirStress,
    FileStress,
    SuperblockStatsPost,
    Cleanup,
    BlockStats,
    CacheWriteBackOff,
    Unmount,
}

impl Phase {
    /// 执行顺序
    pub const ALL: [Phase; 12] = [
        Phase::Mount,
        Phase::CacheWriteBackOn,
        Phase::PreCleanup,
        Phase::SuperblockStatsPre,
        Phase::ListDir,
        Phase::DirStress,
        Phase::FileStress,
        Phase::SuperblockStatsPost,
        Phase::Cleanup,
        Phase::BlockStats,
        Phase::CacheWriteBackOff,
        Phase::Unmount,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::CacheWriteBackOn => "cache write-back on",
            Self::PreCleanup => "pre-cleanup",
            Self::SuperblockStatsPre => "superblock stats (pre)",
            Self::ListDir => "list dir",
            Self::DirStress => "dir stress",
            Self::FileStress => "file stress",
            Self::SuperblockStatsPost => "superblock stats (post)",
            Self::Cleanup => "cleanup",
            Self::BlockStats => "block stats",
            Self::CacheWriteBackOff => "cache write-back off",
            Self::Unmount => "unmount",
        }
    }

    /// 失败时是否中止运行
    pub const fn is_checked(self) -> bool {
        matches!(self, Self::Mount | Self::DirStress | Self::FileStress | Self::Unmount)
    }

    /// 执行前是否先等待 `phase_delay_ms`
    pub const fn delayed_before(self) -> bool {
        matches!(
            self,
            Self::Mount
                | Self::CacheWriteBackOn
                | Self::SuperblockStatsPre
                | Self::ListDir
                | Self::FileStress
                | Self::SuperblockStatsPost
                | Self::Cleanup
                | Self::BlockStats
        )
    }

    /// 在给定配置下是否执行
    pub const fn is_enabled(self, config: &TestRunConfig) -> bool {
        match self {
            Self::SuperblockStatsPre | Self::SuperblockStatsPost => config.superblock_stats,
            Self::Cleanup => config.cleanup,
            Self::BlockStats => config.block_stats,
            _ => true,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 检查阶段失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct PhaseError {
    pub phase: Phase,
    pub cause: FsError,
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase, self.cause)
    }
}

/// 分区阶段执行器
///
/// 配置、延时源和读写缓冲区在整次运行中复用，每个分区调用一次 [`PhaseRunner::run`]。
pub struct PhaseRunner<'a, Dl> {
    config: &'a TestRunConfig,
    delay: &'a mut Dl,
    buffer: &'a mut [u8],
}

impl<'a, Dl: DelayNs> PhaseRunner<'a, Dl> {
    pub fn new(config: &'a TestRunConfig, delay: &'a mut Dl, buffer: &'a mut [u8]) -> Self {
        Self { config, delay, buffer }
    }

    /// 阶段间延时
    pub async fn pause(&mut self) {
        if self.config.phase_delay_ms > 0 {
            self.delay.delay_ms(self.config.phase_delay_ms).await;
        }
    }

    /// 对一个分区执行全部阶段
    ///
    /// `Static` 模式挂载共享缓存 `shared`；`Dynamic` 模式为本次挂载新建缓存。
    pub async fn run<F, D, R>(
        &mut self,
        fs: &mut F,
        device: D,
        shared: &mut BlockCache,
        reporter: &mut R,
    ) -> Result<(), PhaseError>
    where
        F: Filesystem,
        D: BlockDevice,
        R: Reporter,
    {
        match self.config.cache_mode {
            CacheMode::Static => self.run_on(fs, CachedDisk::new(device, shared), reporter).await,
            CacheMode::Dynamic => {
                let mut transient = BlockCache::new();
                self.run_on(fs, CachedDisk::new(device, &mut transient), reporter).await
            }
        }
    }

    async fn run_on<F, D, R>(
        &mut self,
        fs: &mut F,
        disk: CachedDisk<'_, D>,
        reporter: &mut R,
    ) -> Result<(), PhaseError>
    where
        F: Filesystem,
        D: BlockDevice,
        R: Reporter,
    {
        self.enter(Phase::Mount, reporter).await;
        let mut mnt = Mount::mount(fs, disk).map_err(|cause| failed(reporter, Phase::Mount, cause))?;
        log_info!("mounted {} on {}", mnt.fs_name(), MOUNT_POINT);

        self.enter(Phase::CacheWriteBackOn, reporter).await;
        if let Err(e) = mnt.disk_mut().set_write_back(true) {
            log_warn!("write-back enable: {}", e);
        }

        self.enter(Phase::PreCleanup, reporter).await;
        exercise::cleanup(&mut mnt);

        if self.enter(Phase::SuperblockStatsPre, reporter).await {
            exercise::print_volume_stats(&mut mnt);
        }

        self.enter(Phase::ListDir, reporter).await;
        exercise::list_dir(&mut mnt, MOUNT_POINT);

        self.enter(Phase::DirStress, reporter).await;
        exercise::dir_test(&mut mnt, self.config.dir_count)
            .map_err(|cause| failed(reporter, Phase::DirStress, cause))?;

        self.enter(Phase::FileStress, reporter).await;
        exercise::file_test(&mut mnt, self.buffer, self.config.rw_size, self.config.rw_count)
            .map_err(|cause| failed(reporter, Phase::FileStress, cause))?;

        if self.enter(Phase::SuperblockStatsPost, reporter).await {
            exercise::print_volume_stats(&mut mnt);
        }

        if self.enter(Phase::Cleanup, reporter).await {
            exercise::cleanup(&mut mnt);
        }

        if self.enter(Phase::BlockStats, reporter).await {
            exercise::print_block_stats(mnt.disk());
        }

        self.enter(Phase::CacheWriteBackOff, reporter).await;
        if let Err(e) = mnt.disk_mut().set_write_back(false) {
            log_warn!("write-back disable: {}", e);
        }

        self.enter(Phase::Unmount, reporter).await;
        mnt.unmount().map_err(|cause| failed(reporter, Phase::Unmount, cause))?;
        Ok(())
    }

    /// 进入一个阶段，返回该阶段是否执行
    async fn enter<R: Reporter>(&mut self, phase: Phase, reporter: &mut R) -> bool {
        if !phase.is_enabled(self.config) {
            return false;
        }
        if phase.delayed_before() {
            self.pause().await;
        }
        reporter.phase_started(phase);
        true
    }
}

fn failed<R: Reporter>(reporter: &mut R, phase: Phase, cause: FsError) -> PhaseError {
    reporter.phase_failed(phase, cause);
    PhaseError { phase, cause }
}
