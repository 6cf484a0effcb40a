//! 块设备抽象层
//!
//! 所有设备统一以 512 字节逻辑块寻址。读写方法取 `&self`，
//! 由实现者自行处理内部可变性，这样多个分区视图可以同时借用同一个原始设备。

use core::cell::Cell;
use core::fmt;

/// 逻辑块大小 (字节)
pub const BLOCK_SIZE: usize = 512;

/// 存储操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum StorageError {
    /// 读取失败
    ReadError,
    /// 写入失败
    WriteError,
    /// 地址越界
    OutOfBounds,
    /// 缓冲区长度不是块大小的整数倍
    AlignmentError,
    /// 设备未就绪
    NotReady,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadError => write!(f, "block read error"),
            Self::WriteError => write!(f, "block write error"),
            Self::OutOfBounds => write!(f, "block address out of bounds"),
            Self::AlignmentError => write!(f, "buffer not block aligned"),
            Self::NotReady => write!(f, "device not ready"),
        }
    }
}

/// 块设备
pub trait BlockDevice {
    /// 设备包含的逻辑块数
    fn block_count(&self) -> u64;

    /// 从 `lba` 开始读取 `buf.len() / BLOCK_SIZE` 个块
    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// 从 `lba` 开始写入 `data.len() / BLOCK_SIZE` 个块
    fn write_blocks(&self, lba: u64, data: &[u8]) -> Result<(), StorageError>;

    /// 本设备第 0 块在原始设备上的绝对块号
    ///
    /// 共享缓存以绝对块号为键，不同分区的块不会互相冲突。
    fn base_lba(&self) -> u64 {
        0
    }

    /// 设备容量 (字节)
    fn size_bytes(&self) -> u64 {
        self.block_count() * BLOCK_SIZE as u64
    }

    /// I/O 计数，不统计的设备返回 `None`
    fn io_stats(&self) -> Option<IoStats> {
        None
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &T {
    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read_blocks(lba, buf)
    }

    fn write_blocks(&self, lba: u64, data: &[u8]) -> Result<(), StorageError> {
        (**self).write_blocks(lba, data)
    }

    fn base_lba(&self) -> u64 {
        (**self).base_lba()
    }

    fn io_stats(&self) -> Option<IoStats> {
        (**self).io_stats()
    }
}

/// 校验一次传输: 长度按块对齐且不越过设备末尾，返回块数
pub fn check_span(block_count: u64, lba: u64, len: usize) -> Result<u64, StorageError> {
    if len % BLOCK_SIZE != 0 {
        return Err(StorageError::AlignmentError);
    }
    let blocks = (len / BLOCK_SIZE) as u64;
    match lba.checked_add(blocks) {
        Some(end) if end <= block_count => Ok(blocks),
        _ => Err(StorageError::OutOfBounds),
    }
}

/// 块设备 I/O 计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct IoStats {
    /// 读请求次数
    pub bread: u32,
    /// 写请求次数
    pub bwrite: u32,
    /// 读出的块数
    pub blocks_read: u64,
    /// 写入的块数
    pub blocks_written: u64,
}

/// 分区视图: 原始设备上的一段连续块区间
pub struct PartitionDevice<'d, D: ?Sized> {
    parent: &'d D,
    first_lba: u64,
    blocks: u64,
    stats: Cell<IoStats>,
}

impl<'d, D: BlockDevice + ?Sized> PartitionDevice<'d, D> {
    /// 在 `parent` 上划出 `[first_lba, first_lba + blocks)`，区间必须落在设备内
    pub fn new(parent: &'d D, first_lba: u64, blocks: u64) -> Result<Self, StorageError> {
        match first_lba.checked_add(blocks) {
            Some(end) if end <= parent.block_count() => Ok(Self {
                parent,
                first_lba,
                blocks,
                stats: Cell::new(IoStats::default()),
            }),
            _ => Err(StorageError::OutOfBounds),
        }
    }

    /// 分区起始偏移 (字节)
    pub fn offset(&self) -> u64 {
        self.first_lba * BLOCK_SIZE as u64
    }

    /// 分区大小 (字节)
    pub fn size(&self) -> u64 {
        self.blocks * BLOCK_SIZE as u64
    }

    pub fn stats(&self) -> IoStats {
        self.stats.get()
    }
}

impl<'d, D: BlockDevice + ?Sized> BlockDevice for PartitionDevice<'d, D> {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let blocks = check_span(self.blocks, lba, buf.len())?;
        self.parent.read_blocks(self.first_lba + lba, buf)?;
        let mut stats = self.stats.get();
        stats.bread += 1;
        stats.blocks_read += blocks;
        self.stats.set(stats);
        Ok(())
    }

    fn write_blocks(&self, lba: u64, data: &[u8]) -> Result<(), StorageError> {
        let blocks = check_span(self.blocks, lba, data.len())?;
        self.parent.write_blocks(self.first_lba + lba, data)?;
        let mut stats = self.stats.get();
        stats.bwrite += 1;
        stats.blocks_written += blocks;
        self.stats.set(stats);
        Ok(())
    }

    fn base_lba(&self) -> u64 {
        self.parent.base_lba() + self.first_lba
    }

    fn io_stats(&self) -> Option<IoStats> {
        Some(self.stats.get())
    }
}

impl<'d, D: ?Sized> fmt::Debug for PartitionDevice<'d, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionDevice")
            .field("first_lba", &self.first_lba)
            .field("blocks", &self.blocks)
            .field("stats", &self.stats.get())
            .finish()
    }
}
