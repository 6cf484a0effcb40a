//! 大容量存储设备接入
//!
//! 传输层 (USB MSC / SD 卡等) 只需提供 "已接入" 与 "已枚举" 两个谓词、
//! 一个推进函数和原始块设备访问器。

use core::fmt;

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant};

use crate::fs::BlockDevice;

/// 大容量存储主机
pub trait MassStorageHost {
    type Device: BlockDevice;

    /// 设备已物理接入
    fn attached(&self) -> bool;

    /// 设备枚举完成，可以读写
    fn enumerated(&self) -> bool;

    /// 推进主机状态机
    fn process(&mut self);

    /// 原始块设备，设备不可用时返回 `None`
    fn block_device(&self) -> Option<&Self::Device>;
}

/// 设备接入错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum HostError {
    /// 超时仍未就绪
    Timeout,
    /// 就绪后无法取得块设备
    NoDevice,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "device not ready before timeout"),
            Self::NoDevice => write!(f, "block device unavailable"),
        }
    }
}

/// 轮询直到设备接入并枚举完成
///
/// `timeout_ms` 为 `None` 时无限等待。
pub async fn wait_ready<H: MassStorageHost>(host: &mut H, timeout_ms: Option<u32>) -> Result<(), HostError> {
    let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(u64::from(ms)));

    log_info!("connect mass storage device...");
    poll_until(host, deadline, |h| h.attached()).await?;
    log_info!("device connected");

    poll_until(host, deadline, |h| h.enumerated()).await?;
    log_info!("device enum done");
    Ok(())
}

async fn poll_until<H: MassStorageHost>(
    host: &mut H,
    deadline: Option<Instant>,
    ready: impl Fn(&H) -> bool,
) -> Result<(), HostError> {
    while !ready(host) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                log_warn!("device wait timed out");
                return Err(HostError::Timeout);
            }
        }
        host.process();
        yield_now().await;
    }
    Ok(())
}
