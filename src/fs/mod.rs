//! 文件系统模块
//!
//! - `storage`: 块设备抽象与分区视图
//! - `partition`: MBR 扫描
//! - `cache`: 共享块缓存与回写控制
//! - `littlefs`: 基于 littlefs2 的文件系统后端 (feature `littlefs`)
//!
//! 文件系统实现本身是外部协作者，这里只定义测试需要的操作集合 [`Filesystem`]，
//! 以及把 "文件系统 + 缓存设备" 绑在一起的挂载点 [`Mount`]。

pub mod cache;
pub mod partition;
pub mod storage;

#[cfg(feature = "littlefs")]
pub mod littlefs;

use core::fmt;

pub use cache::{BlockCache, CacheStats, CachedDisk};
pub use partition::{scan, PartitionTable, ScanError, Slot};
pub use storage::{BlockDevice, IoStats, PartitionDevice, StorageError, BLOCK_SIZE};

/// 挂载点根目录
pub const MOUNT_POINT: &str = "/";

/// 文件名最大长度
pub const MAX_NAME_LEN: usize = 64;

/// 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FsError {
    /// 存储层错误
    Storage(StorageError),
    /// 文件系统损坏
    Corrupt,
    /// 文件/目录不存在
    NotFound,
    /// 文件/目录已存在
    AlreadyExists,
    /// 不是目录
    NotADirectory,
    /// 目录非空
    DirectoryNotEmpty,
    /// 路径过长
    PathTooLong,
    /// 空间不足
    NoSpace,
    /// 文件系统未挂载
    NotMounted,
    /// 挂载失败 (无可识别的文件系统)
    MountFailed,
    /// 实际读写长度与请求不符
    ShortTransfer { expected: usize, actual: usize },
    /// 读回数据与写入不一致
    DataMismatch { chunk: u32 },
    /// 其他 IO 错误
    IoError,
}

impl From<StorageError> for FsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Corrupt => write!(f, "filesystem corrupt"),
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::DirectoryNotEmpty => write!(f, "directory not empty"),
            Self::PathTooLong => write!(f, "path too long"),
            Self::NoSpace => write!(f, "no space"),
            Self::NotMounted => write!(f, "not mounted"),
            Self::MountFailed => write!(f, "mount failed"),
            Self::ShortTransfer { expected, actual } => {
                write!(f, "short transfer: {} of {} bytes", actual, expected)
            }
            Self::DataMismatch { chunk } => write!(f, "data mismatch in chunk {}", chunk),
            Self::IoError => write!(f, "io error"),
        }
    }
}

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    /// 列目录时的类型标签
    pub const fn tag(self) -> &'static str {
        match self {
            Self::File => "[reg] ",
            Self::Directory => "[dir] ",
        }
    }
}

/// 目录项元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    /// 文件大小 (目录为 0)
    pub size: u64,
    pub name: heapless::String<MAX_NAME_LEN>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        matches!(self.file_type, FileType::Directory)
    }
}

/// 卷级统计 (超级块信息)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct VolumeStats {
    pub fs_name: &'static str,
    pub block_size: u32,
    pub blocks_count: u64,
    pub free_blocks_count: u64,
}

/// 测试所需的文件系统操作
///
/// 每个操作都显式拿到挂载的缓存设备，文件系统自身只保存挂载元数据。
/// 路径以挂载点根目录为基准，例如 `/dir1/f0`。
pub trait Filesystem {
    fn name(&self) -> &'static str;

    fn mount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError>;

    fn unmount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError>;

    fn create_dir<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError>;

    /// 递归删除目录
    fn remove_dir_all<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError>;

    /// 创建文件，已存在时截断为空
    fn create_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError>;

    /// 追加写入，返回实际写入字节数
    fn append<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        data: &[u8],
    ) -> Result<usize, FsError>;

    /// 从 `offset` 读取，返回实际读取字节数
    fn read_at<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError>;

    fn remove_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError>;

    /// 遍历目录，`.` 与 `..` 不回调
    fn read_dir<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        visit: &mut dyn FnMut(&Metadata),
    ) -> Result<(), FsError>;

    fn stats<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<VolumeStats, FsError>;
}

/// 已挂载的分区
///
/// 挂载失败或中途放弃时直接丢弃即可，不会隐式卸载。
pub struct Mount<'a, 'c, F, D> {
    fs: &'a mut F,
    disk: CachedDisk<'c, D>,
}

impl<'a, 'c, F: Filesystem, D: BlockDevice> Mount<'a, 'c, F, D> {
    /// 挂载前丢弃该分区的干净缓存块，设备可能在两次挂载之间被改写
    pub fn mount(fs: &'a mut F, mut disk: CachedDisk<'c, D>) -> Result<Self, FsError> {
        disk.invalidate();
        fs.mount(&mut disk)?;
        Ok(Self { fs, disk })
    }

    /// 卸载，刷出该分区的全部脏块并让出缓存条目
    pub fn unmount(mut self) -> Result<(), FsError> {
        self.fs.unmount(&mut self.disk)?;
        self.disk.flush()?;
        self.disk.invalidate();
        Ok(())
    }

    pub fn disk(&self) -> &CachedDisk<'c, D> {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut CachedDisk<'c, D> {
        &mut self.disk
    }

    pub fn fs_name(&self) -> &'static str {
        self.fs.name()
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), FsError> {
        self.fs.create_dir(&mut self.disk, path)
    }

    pub fn remove_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        self.fs.remove_dir_all(&mut self.disk, path)
    }

    pub fn create_file(&mut self, path: &str) -> Result<(), FsError> {
        self.fs.create_file(&mut self.disk, path)
    }

    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        self.fs.append(&mut self.disk, path, data)
    }

    pub fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        self.fs.read_at(&mut self.disk, path, offset, buf)
    }

    pub fn remove_file(&mut self, path: &str) -> Result<(), FsError> {
        self.fs.remove_file(&mut self.disk, path)
    }

    pub fn read_dir(&mut self, path: &str, visit: &mut dyn FnMut(&Metadata)) -> Result<(), FsError> {
        self.fs.read_dir(&mut self.disk, path, visit)
    }

    pub fn stats(&mut self) -> Result<VolumeStats, FsError> {
        self.fs.stats(&mut self.disk)
    }
}
