//! MBR 分区表支持
//!
//! 读取原始设备第 0 块，解析 4 个主分区条目，
//! 为每个可用条目在原始设备上划出一个 [`PartitionDevice`]。

use core::fmt;

use super::storage::{BlockDevice, PartitionDevice, StorageError, BLOCK_SIZE};

/// 引导扇区签名 (偏移 510 处按小端读出)
const MBR_SIGNATURE: u16 = 0xAA55;

/// 磁盘标识偏移
const DISK_ID_OFFSET: usize = 440;

/// 分区表在引导扇区中的偏移
const PART_TABLE_OFFSET: usize = 446;

/// 单个分区条目大小
const PART_ENTRY_SIZE: usize = 16;

/// 主分区条目数
pub const MAX_PARTITIONS: usize = 4;

/// 分区表扫描错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum ScanError {
    /// 读取引导扇区失败
    Io(StorageError),
    /// 签名不匹配
    BadSignature(u16),
}

impl From<StorageError> for ScanError {
    fn from(e: StorageError) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "mbr read failed: {}", e),
            Self::BadSignature(sig) => write!(f, "unknown mbr signature: {:#x}", sig),
        }
    }
}

/// 原始分区条目
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct PartitionEntry {
    /// 引导标志 (0x80 = 活动分区)
    pub status: u8,
    /// 分区类型
    pub part_type: u8,
    /// 起始块号
    pub first_lba: u32,
    /// 块数
    pub sectors: u32,
}

impl PartitionEntry {
    /// 从 16 字节原始条目解析 (CHS 字段忽略)
    pub fn from_bytes(data: &[u8; PART_ENTRY_SIZE]) -> Self {
        Self {
            status: data[0],
            part_type: data[4],
            first_lba: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            sectors: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        }
    }

    /// 类型为 0 或长度为 0 的条目视为未使用
    pub fn is_unused(&self) -> bool {
        self.part_type == 0 || self.sectors == 0
    }

    pub fn is_active(&self) -> bool {
        self.status & 0x80 != 0
    }
}

/// 引导扇区内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub disk_id: u32,
    pub entries: [PartitionEntry; MAX_PARTITIONS],
}

impl BootRecord {
    /// 解析 512 字节引导扇区
    pub fn parse(sector: &[u8; BLOCK_SIZE]) -> Result<Self, ScanError> {
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != MBR_SIGNATURE {
            return Err(ScanError::BadSignature(signature));
        }

        let disk_id = u32::from_le_bytes([
            sector[DISK_ID_OFFSET],
            sector[DISK_ID_OFFSET + 1],
            sector[DISK_ID_OFFSET + 2],
            sector[DISK_ID_OFFSET + 3],
        ]);

        let mut entries = [PartitionEntry::default(); MAX_PARTITIONS];
        for (i, entry) in entries.iter_mut().enumerate() {
            let start = PART_TABLE_OFFSET + i * PART_ENTRY_SIZE;
            let mut raw = [0u8; PART_ENTRY_SIZE];
            raw.copy_from_slice(&sector[start..start + PART_ENTRY_SIZE]);
            *entry = PartitionEntry::from_bytes(&raw);
        }

        Ok(Self { disk_id, entries })
    }

    /// 从设备第 0 块读取并解析
    pub fn read<D: BlockDevice + ?Sized>(device: &D) -> Result<Self, ScanError> {
        let mut sector = [0u8; BLOCK_SIZE];
        device.read_blocks(0, &mut sector)?;
        Self::parse(&sector)
    }
}

/// 分区表中的一个槽位
pub enum Slot<'d, D: ?Sized> {
    /// 无分区或分区不可识别
    Empty,
    /// 已识别的分区
    Populated {
        /// 起始偏移 (字节)
        offset: u64,
        /// 大小 (字节)
        size: u64,
        /// MBR 分区类型
        part_type: u8,
        /// 分区视图
        device: PartitionDevice<'d, D>,
    },
}

impl<'d, D: ?Sized> Slot<'d, D> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// (偏移, 大小)，字节
    pub fn extent(&self) -> Option<(u64, u64)> {
        match self {
            Self::Empty => None,
            Self::Populated { offset, size, .. } => Some((*offset, *size)),
        }
    }
}

impl<'d, D: ?Sized> fmt::Debug for Slot<'d, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Populated { offset, size, part_type, .. } => f
                .debug_struct("Populated")
                .field("offset", &format_args!("{:#x}", offset))
                .field("size", &format_args!("{:#x} ({}MB)", size, size / (1024 * 1024)))
                .field("part_type", &format_args!("{:#04x}", part_type))
                .finish(),
        }
    }
}

/// 扫描结果: 恰好 4 个槽位，下标只表示枚举位置
pub struct PartitionTable<'d, D: ?Sized> {
    disk_id: u32,
    slots: [Slot<'d, D>; MAX_PARTITIONS],
}

impl<'d, D: ?Sized> PartitionTable<'d, D> {
    pub fn disk_id(&self) -> u32 {
        self.disk_id
    }

    pub fn slots(&self) -> &[Slot<'d, D>; MAX_PARTITIONS] {
        &self.slots
    }

    /// 非空槽位数
    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }
}

impl<'d, D: ?Sized> fmt::Debug for PartitionTable<'d, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTable")
            .field("disk_id", &format_args!("{:#010x}", self.disk_id))
            .field("slots", &self.slots)
            .finish()
    }
}

/// 扫描原始设备的 MBR
///
/// 只有类型在 `accept` 中、且完全落在设备内的条目才生成分区视图，
/// 其余条目 (未使用、未知类型、越界) 一律成为 [`Slot::Empty`]。
pub fn scan<'d, D: BlockDevice + ?Sized>(
    raw: &'d D,
    accept: &[u8],
) -> Result<PartitionTable<'d, D>, ScanError> {
    let record = BootRecord::read(raw)?;
    log_debug!("mbr disk id: {:#x}", record.disk_id);

    let slots = core::array::from_fn(|i| {
        let entry = record.entries[i];
        log_debug!(
            "mbr_part {}: active={} type={:#x} first_lba={} sectors={}",
            i,
            entry.is_active(),
            entry.part_type,
            entry.first_lba,
            entry.sectors
        );

        if entry.is_unused() || !accept.contains(&entry.part_type) {
            return Slot::Empty;
        }

        match PartitionDevice::new(raw, u64::from(entry.first_lba), u64::from(entry.sectors)) {
            Ok(device) => Slot::Populated {
                offset: device.offset(),
                size: device.size(),
                part_type: entry.part_type,
                device,
            },
            Err(e) => {
                log_warn!("mbr_part {}: {}", i, e);
                Slot::Empty
            }
        }
    });

    Ok(PartitionTable { disk_id: record.disk_id, slots })
}
