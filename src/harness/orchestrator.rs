//! 测试编排
//!
//! 等待设备 → 扫描 MBR → 按槽位顺序逐个测试分区。
//! 第一个失败的分区结束整次运行，后面的槽位不再尝试。

use embedded_hal_async::delay::DelayNs;

use super::host::{self, HostError, MassStorageHost};
use super::phases::{PhaseError, PhaseRunner};
use super::report::Reporter;
use crate::config::TestRunConfig;
use crate::fs::{scan, BlockCache, BlockDevice, Filesystem, ScanError, Slot};

/// 一次运行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum RunOutcome {
    /// 所有非空分区通过 (`tested` 可以为 0)
    Passed { tested: usize },
    /// 分区表不可读
    ScanFailed(ScanError),
    /// 某个分区的检查阶段失败
    PartitionFailed { slot: usize, error: PhaseError },
    /// 设备未就绪或不可访问
    DeviceUnavailable(HostError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// 宿主环境下的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Passed { .. } => 0,
            Self::ScanFailed(_) => 1,
            Self::PartitionFailed { .. } => 2,
            Self::DeviceUnavailable(_) => 3,
        }
    }
}

/// 测试编排器
pub struct Harness<'a, F, Dl> {
    config: &'a TestRunConfig,
    fs: &'a mut F,
    delay: &'a mut Dl,
    buffer: &'a mut [u8],
    cache: &'a mut BlockCache,
}

impl<'a, F: Filesystem, Dl: DelayNs> Harness<'a, F, Dl> {
    /// `cache` 为 `Static` 模式下所有挂载共用的缓存
    pub fn new(
        config: &'a TestRunConfig,
        fs: &'a mut F,
        delay: &'a mut Dl,
        buffer: &'a mut [u8],
        cache: &'a mut BlockCache,
    ) -> Self {
        Self { config, fs, delay, buffer, cache }
    }

    /// 完整运行: 等待设备就绪后测试其上的全部分区
    pub async fn run<H, R>(&mut self, host: &mut H, reporter: &mut R) -> RunOutcome
    where
        H: MassStorageHost,
        R: Reporter,
    {
        let outcome = match host::wait_ready(host, self.config.attach_timeout_ms).await {
            Err(e) => RunOutcome::DeviceUnavailable(e),
            Ok(()) => {
                reporter.device_ready();
                reporter.conditions(self.config);
                match host.block_device() {
                    Some(raw) => self.test_device(raw, reporter).await,
                    None => {
                        log_error!("open block device: fail");
                        RunOutcome::DeviceUnavailable(HostError::NoDevice)
                    }
                }
            }
        };
        reporter.finished(&outcome);
        outcome
    }

    /// 扫描并测试一个已就绪的原始设备
    pub async fn test_device<D, R>(&mut self, raw: &D, reporter: &mut R) -> RunOutcome
    where
        D: BlockDevice + ?Sized,
        R: Reporter,
    {
        let table = match timed!("mbr scan", scan(raw, self.config.part_types)) {
            Ok(table) => table,
            Err(e) => {
                reporter.scan_failed(e);
                return RunOutcome::ScanFailed(e);
            }
        };

        for (index, slot) in table.slots().iter().enumerate() {
            reporter.slot(index, slot.extent());
        }
        log_debug!("disk {:#010x}: {} partition(s) to test", table.disk_id(), table.populated());

        let mut runner = PhaseRunner::new(self.config, &mut *self.delay, &mut *self.buffer);
        let mut tested = 0;
        for (index, slot) in table.slots().iter().enumerate() {
            let Slot::Populated { offset, size, device, .. } = slot else {
                continue;
            };

            reporter.partition_started(index, *offset, *size);
            runner.pause().await;
            if let Err(error) = runner.run(&mut *self.fs, device, &mut *self.cache, reporter).await {
                return RunOutcome::PartitionFailed { slot: index, error };
            }
            tested += 1;
        }
        RunOutcome::Passed { tested }
    }
}
