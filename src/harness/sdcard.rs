//! SPI SD 卡作为大容量存储设备
//!
//! 卡槽的卡检测脚 (低电平有效) 作为 "已接入"，卡初始化并读出容量作为 "枚举完成"。
//! 初始化必须在 [`SD_INIT_KHZ`] 以下进行；就绪与拔出通过 [`CardEvent`] 通知板级代码，
//! 由它切换 SPI 时钟。

use embedded_hal::digital::InputPin;
use embedded_sdmmc::{Block, BlockIdx};

use super::host::MassStorageHost;
use crate::fs::storage::check_span;
use crate::fs::{BlockDevice, StorageError, BLOCK_SIZE};

/// 卡初始化阶段的 SPI 时钟 (kHz)
pub const SD_INIT_KHZ: u32 = 400;

/// 卡就绪后的 SPI 时钟 (kHz)
pub const SD_FAST_KHZ: u32 = 20_000;

/// 卡状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CardEvent {
    /// 初始化完成，容量已知
    Ready,
    /// 就绪后被拔出
    Removed,
}

/// embedded-sdmmc 块设备到本库块设备的适配
pub struct SdBlockDevice<S> {
    card: S,
    blocks: u64,
}

impl<S> SdBlockDevice<S> {
    pub fn card(&self) -> &S {
        &self.card
    }
}

fn block_idx(lba: u64) -> Result<BlockIdx, StorageError> {
    u32::try_from(lba).map(BlockIdx).map_err(|_| StorageError::OutOfBounds)
}

impl<S: embedded_sdmmc::BlockDevice> BlockDevice for SdBlockDevice<S> {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        check_span(self.blocks, lba, buf.len())?;
        let mut block = [Block::new()];
        for (i, chunk) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.card
                .read(&mut block, block_idx(lba + i as u64)?)
                .map_err(|_| StorageError::ReadError)?;
            chunk.copy_from_slice(&block[0].contents);
        }
        Ok(())
    }

    fn write_blocks(&self, lba: u64, data: &[u8]) -> Result<(), StorageError> {
        check_span(self.blocks, lba, data.len())?;
        let mut block = [Block::new()];
        for (i, chunk) in data.chunks_exact(BLOCK_SIZE).enumerate() {
            block[0].contents.copy_from_slice(chunk);
            self.card
                .write(&block, block_idx(lba + i as u64)?)
                .map_err(|_| StorageError::WriteError)?;
        }
        Ok(())
    }
}

/// SD 卡存储主机
///
/// 卡检测电平在 [`MassStorageHost::process`] 中采样，`attached` 返回最近一次采样。
pub struct SdHost<S, P, E> {
    device: SdBlockDevice<S>,
    detect: P,
    present: bool,
    ready: bool,
    on_event: E,
}

impl<S, P, E> SdHost<S, P, E>
where
    S: embedded_sdmmc::BlockDevice,
    P: InputPin,
    E: FnMut(&S, CardEvent),
{
    /// `detect` 为低电平有效的卡检测输入
    pub fn new(card: S, detect: P, on_event: E) -> Self {
        Self {
            device: SdBlockDevice { card, blocks: 0 },
            detect,
            present: false,
            ready: false,
            on_event,
        }
    }

    fn sample_detect(&mut self) -> bool {
        match self.detect.is_low() {
            Ok(low) => low,
            Err(_) => {
                log_warn!("sd card detect unreadable");
                false
            }
        }
    }
}

impl<S, P, E> MassStorageHost for SdHost<S, P, E>
where
    S: embedded_sdmmc::BlockDevice,
    P: InputPin,
    E: FnMut(&S, CardEvent),
{
    type Device = SdBlockDevice<S>;

    fn attached(&self) -> bool {
        self.present
    }

    fn enumerated(&self) -> bool {
        self.ready
    }

    fn process(&mut self) {
        self.present = self.sample_detect();
        if !self.present {
            if self.ready {
                log_warn!("sd card removed");
                self.ready = false;
                self.device.blocks = 0;
                (self.on_event)(&self.device.card, CardEvent::Removed);
            }
            return;
        }
        if self.ready {
            return;
        }
        match self.device.card.num_blocks() {
            Ok(count) => {
                self.device.blocks = u64::from(count.0);
                self.ready = true;
                log_debug!("sd card: {} blocks", self.device.blocks);
                (self.on_event)(&self.device.card, CardEvent::Ready);
            }
            Err(_) => log_debug!("sd card init pending"),
        }
    }

    fn block_device(&self) -> Option<&Self::Device> {
        self.ready.then_some(&self.device)
    }
}
