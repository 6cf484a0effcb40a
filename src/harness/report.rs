//! 结果输出与空闲闪烁
//!
//! 运行过程中的进度通过 [`Reporter`] 输出，默认实现 [`LogReporter`] 走日志宏。
//! 运行结束后进入 [`halt`]，状态灯以固定半周期永久闪烁。
//! 成功与失败的唯一区别是成功时多打印一行重启提示。

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use super::orchestrator::RunOutcome;
use super::phases::Phase;
use crate::config::TestRunConfig;
use crate::fs::{FsError, ScanError};

/// 成功结束时的提示
pub const RESTART_HINT: &str = "press RESET button to restart";

const MB: u64 = 1024 * 1024;

/// 运行进度回调，全部方法默认为空
pub trait Reporter {
    /// 设备就绪
    fn device_ready(&mut self) {}

    /// 测试条件
    fn conditions(&mut self, _config: &TestRunConfig) {}

    fn scan_failed(&mut self, _error: ScanError) {}

    /// 扫描结果中的一个槽位，空槽位 `extent` 为 `None`
    fn slot(&mut self, _index: usize, _extent: Option<(u64, u64)>) {}

    /// 开始测试一个分区
    fn partition_started(&mut self, _index: usize, _offset: u64, _size: u64) {}

    fn phase_started(&mut self, _phase: Phase) {}

    fn phase_failed(&mut self, _phase: Phase, _cause: FsError) {}

    /// 运行结束
    fn finished(&mut self, _outcome: &RunOutcome) {}
}

/// 日志输出
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

fn log_extent(offset: u64, size: u64) {
    log_info!(" offset: {:#x}, {}MB", offset, offset / MB);
    log_info!(" size:   {:#x}, {}MB", size, size / MB);
}

impl Reporter for LogReporter {
    fn device_ready(&mut self) {
        log_info!("device ready");
    }

    fn conditions(&mut self, config: &TestRunConfig) {
        log_info!("test conditions:");
        log_info!("  rw size: {}", config.rw_size);
        log_info!("  rw count: {}", config.rw_count);
        log_info!("  cache mode: {}", config.cache_mode.as_str());
    }

    fn scan_failed(&mut self, error: ScanError) {
        log_error!("mbr scan error: {}", error);
    }

    fn slot(&mut self, index: usize, extent: Option<(u64, u64)>) {
        log_info!("mbr_entry {}:", index);
        match extent {
            Some((offset, size)) => log_extent(offset, size),
            None => log_info!("\tempty/unknown"),
        }
    }

    fn partition_started(&mut self, index: usize, offset: u64, size: u64) {
        log_info!("do tests for mbr_entry {}:", index);
        log_extent(offset, size);
    }

    fn phase_started(&mut self, phase: Phase) {
        log_debug!("phase: {}", phase.name());
    }

    fn phase_failed(&mut self, phase: Phase, cause: FsError) {
        log_error!("{} failed: {}", phase.name(), cause);
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        match closing_line(outcome) {
            Some(line) => log_info!("{}", line),
            None => log_debug!("run finished with exit code {}", outcome.exit_code()),
        }
    }
}

/// 运行结束时的最后一行，只有成功才输出
pub fn closing_line(outcome: &RunOutcome) -> Option<&'static str> {
    outcome.is_success().then_some(RESTART_HINT)
}

/// 日志输出 + 设备就绪指示灯
pub struct LedReporter<P> {
    log: LogReporter,
    ready_led: P,
}

impl<P: OutputPin> LedReporter<P> {
    pub fn new(ready_led: P) -> Self {
        Self { log: LogReporter, ready_led }
    }
}

impl<P: OutputPin> Reporter for LedReporter<P> {
    fn device_ready(&mut self) {
        if self.ready_led.set_high().is_err() {
            log_warn!("ready led unavailable");
        }
        self.log.device_ready();
    }

    fn conditions(&mut self, config: &TestRunConfig) {
        self.log.conditions(config);
    }

    fn scan_failed(&mut self, error: ScanError) {
        self.log.scan_failed(error);
    }

    fn slot(&mut self, index: usize, extent: Option<(u64, u64)>) {
        self.log.slot(index, extent);
    }

    fn partition_started(&mut self, index: usize, offset: u64, size: u64) {
        self.log.partition_started(index, offset, size);
    }

    fn phase_started(&mut self, phase: Phase) {
        self.log.phase_started(phase);
    }

    fn phase_failed(&mut self, phase: Phase, cause: FsError) {
        self.log.phase_failed(phase, cause);
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        self.log.finished(outcome);
    }
}

/// 闪烁一次: 等待、点亮、等待、熄灭
pub async fn blink_once<P, Dl>(led: &mut P, delay: &mut Dl, half_period_ms: u32) -> Result<(), P::Error>
where
    P: OutputPin,
    Dl: DelayNs,
{
    delay.delay_ms(half_period_ms).await;
    led.set_high()?;
    delay.delay_ms(half_period_ms).await;
    led.set_low()
}

/// 终止状态: 永久闪烁，不返回
pub async fn halt<P, Dl>(mut led: P, mut delay: Dl, half_period_ms: u32) -> !
where
    P: OutputPin,
    Dl: DelayNs,
{
    loop {
        if blink_once(&mut led, &mut delay, half_period_ms).await.is_err() {
            // 灯坏了也不能退出
            delay.delay_ms(half_period_ms).await;
        }
    }
}
