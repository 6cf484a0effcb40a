//! LittleFS 文件系统后端
//!
//! 基于 littlefs2，把分区开头固定大小 (16MB) 的一段区域当作 LittleFS 卷，
//! 分区小于卷大小时拒绝挂载。
//! 所有块访问都经过挂载时的 [`CachedDisk`]，因此回写开关和共享缓存对它同样生效。
//!
//! littlefs2 的挂载状态只存在于闭包内，这里每个操作都重新 `mount_and_then` 一次，
//! [`LittleFs`] 自身只记录挂载的是哪个分区。

use littlefs2::consts::{U16, U512};
use littlefs2::driver::Storage;
use littlefs2::fs::Filesystem as Lfs;
use littlefs2::io::{self, prelude::*, SeekFrom};
use littlefs2::path::Path;

use super::cache::CachedDisk;
use super::storage::{BlockDevice, BLOCK_SIZE};
use super::{FileType, Filesystem, FsError, Metadata, VolumeStats};

/// LittleFS 擦除块大小
pub const LFS_BLOCK_SIZE: usize = 4096;

/// 卷的块数 (4KB * 4096 = 16MB)
pub const LFS_BLOCK_COUNT: usize = 4096;

/// 卷大小 (字节)
pub const LFS_VOLUME_BYTES: u64 = (LFS_BLOCK_SIZE * LFS_BLOCK_COUNT) as u64;

/// 卷占用的逻辑块数
const VOLUME_LBAS: u64 = LFS_VOLUME_BYTES / BLOCK_SIZE as u64;

/// 路径缓冲区 (含结尾 NUL)
const PATH_BUF: usize = 256;

/// 把 `CachedDisk` 适配为 littlefs2 存储
struct DiskStorage<'s, 'c, D> {
    disk: &'s mut CachedDisk<'c, D>,
}

impl<'s, 'c, D: BlockDevice> DiskStorage<'s, 'c, D> {
    fn lba(off: usize, len: usize) -> io::Result<u64> {
        if off % BLOCK_SIZE != 0 || len % BLOCK_SIZE != 0 || (off + len) as u64 > LFS_VOLUME_BYTES {
            return Err(io::Error::Invalid);
        }
        Ok((off / BLOCK_SIZE) as u64)
    }
}

impl<'s, 'c, D: BlockDevice> Storage for DiskStorage<'s, 'c, D> {
    const READ_SIZE: usize = BLOCK_SIZE;
    const WRITE_SIZE: usize = BLOCK_SIZE;
    const BLOCK_SIZE: usize = LFS_BLOCK_SIZE;
    const BLOCK_COUNT: usize = LFS_BLOCK_COUNT;
    const BLOCK_CYCLES: isize = -1;

    type CACHE_SIZE = U512;
    type LOOKAHEAD_SIZE = U16;

    fn read(&mut self, off: usize, buf: &mut [u8]) -> io::Result<usize> {
        let lba = Self::lba(off, buf.len())?;
        self.disk.read(lba, buf).map_err(|_| io::Error::Io)?;
        Ok(buf.len())
    }

    fn write(&mut self, off: usize, data: &[u8]) -> io::Result<usize> {
        let lba = Self::lba(off, data.len())?;
        self.disk.write(lba, data).map_err(|_| io::Error::Io)?;
        Ok(data.len())
    }

    // SD 卡/U 盘由控制器负责擦除
    fn erase(&mut self, off: usize, len: usize) -> io::Result<usize> {
        Self::lba(off, len)?;
        Ok(len)
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e {
            io::Error::NoSuchEntry => Self::NotFound,
            io::Error::EntryAlreadyExisted => Self::AlreadyExists,
            io::Error::PathNotDir => Self::NotADirectory,
            io::Error::DirNotEmpty => Self::DirectoryNotEmpty,
            io::Error::NoSpace => Self::NoSpace,
            io::Error::FilenameTooLong => Self::PathTooLong,
            io::Error::Corruption => Self::Corrupt,
            _ => Self::IoError,
        }
    }
}

/// 以 NUL 结尾的路径
struct CPath {
    buf: heapless::Vec<u8, PATH_BUF>,
}

impl CPath {
    fn new(path: &str) -> Result<Self, FsError> {
        let mut buf = heapless::Vec::new();
        buf.extend_from_slice(path.as_bytes()).map_err(|_| FsError::PathTooLong)?;
        buf.push(0).map_err(|_| FsError::PathTooLong)?;
        Ok(Self { buf })
    }

    fn as_path(&self) -> Result<&Path, FsError> {
        Path::from_bytes_with_nul(&self.buf).map_err(|_| FsError::PathTooLong)
    }
}

/// LittleFS 后端
#[derive(Debug, Default)]
pub struct LittleFs {
    mounted: Option<u64>,
    auto_format: bool,
}

impl LittleFs {
    pub const fn new() -> Self {
        Self { mounted: None, auto_format: false }
    }

    /// 挂载时遇到无法识别的卷先格式化 (会清空该区域)
    pub const fn with_auto_format(mut self, enabled: bool) -> Self {
        self.auto_format = enabled;
        self
    }

    /// 在分区开头创建空卷
    pub fn format<D: BlockDevice>(disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        let mut storage = DiskStorage { disk };
        Lfs::format(&mut storage).map_err(|_| FsError::IoError)?;
        disk_flush(&mut storage)
    }

    fn ensure_mounted<D: BlockDevice>(&self, disk: &CachedDisk<'_, D>) -> Result<(), FsError> {
        match self.mounted {
            Some(base) if base == disk.device().base_lba() => Ok(()),
            _ => Err(FsError::NotMounted),
        }
    }

    fn with_fs<'s, 'c, D, R>(
        &self,
        disk: &'s mut CachedDisk<'c, D>,
        f: impl FnOnce(&Lfs<'_, DiskStorage<'s, 'c, D>>) -> io::Result<R>,
    ) -> Result<R, FsError>
    where
        D: BlockDevice,
    {
        self.ensure_mounted(disk)?;
        let mut storage = DiskStorage { disk };
        Ok(Lfs::mount_and_then(&mut storage, f)?)
    }
}

fn disk_flush<D: BlockDevice>(storage: &mut DiskStorage<'_, '_, D>) -> Result<(), FsError> {
    storage.disk.flush()?;
    Ok(())
}

impl Filesystem for LittleFs {
    fn name(&self) -> &'static str {
        "littlefs"
    }

    fn mount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        if disk.block_count() < VOLUME_LBAS {
            log_warn!("littlefs: partition smaller than volume ({} bytes)", LFS_VOLUME_BYTES);
            return Err(FsError::MountFailed);
        }
        if !Lfs::is_mountable(&mut DiskStorage { disk: &mut *disk }) {
            if !self.auto_format {
                return Err(FsError::MountFailed);
            }
            log_warn!("littlefs: no volume found, formatting");
            Self::format(disk)?;
            if !Lfs::is_mountable(&mut DiskStorage { disk: &mut *disk }) {
                return Err(FsError::MountFailed);
            }
        }
        self.mounted = Some(disk.device().base_lba());
        Ok(())
    }

    fn unmount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        self.ensure_mounted(disk)?;
        self.mounted = None;
        Ok(())
    }

    fn create_dir<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| fs.create_dir(path))
    }

    fn remove_dir_all<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| fs.remove_dir_all(path))
    }

    fn create_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| fs.create_file_and_then(path, |_| Ok(())))
    }

    fn append<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        data: &[u8],
    ) -> Result<usize, FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| {
            fs.open_file_with_options_and_then(|o| o.write(true).append(true), path, |file| file.write(data))
        })
    }

    fn read_at<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        let offset = u32::try_from(offset).map_err(|_| FsError::IoError)?;
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| {
            fs.open_file_and_then(path, |file| {
                file.seek(SeekFrom::Start(offset))?;
                let mut total = 0;
                while total < buf.len() {
                    let n = file.read(&mut buf[total..])?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                Ok(total)
            })
        })
    }

    fn remove_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| fs.remove(path))
    }

    fn read_dir<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        visit: &mut dyn FnMut(&Metadata),
    ) -> Result<(), FsError> {
        let path = CPath::new(path)?;
        let path = path.as_path()?;
        self.with_fs(disk, |fs| {
            fs.read_dir_and_then(path, |dir| {
                for entry in dir {
                    let entry = entry?;
                    let name: &str = entry.file_name().as_ref();
                    if name == "." || name == ".." {
                        continue;
                    }
                    let meta = entry.metadata();
                    let mut short = heapless::String::new();
                    // 超长文件名截断显示
                    for c in name.chars() {
                        if short.push(c).is_err() {
                            break;
                        }
                    }
                    visit(&Metadata {
                        file_type: if meta.is_dir() { FileType::Directory } else { FileType::File },
                        size: meta.len() as u64,
                        name: short,
                    });
                }
                Ok(())
            })
        })
    }

    fn stats<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<VolumeStats, FsError> {
        let free = self.with_fs(disk, |fs| fs.available_blocks())?;
        Ok(VolumeStats {
            fs_name: "littlefs",
            block_size: LFS_BLOCK_SIZE as u32,
            blocks_count: LFS_BLOCK_COUNT as u64,
            free_blocks_count: free as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TestRunConfig, RW_BUFFER_SIZE};
    use crate::fs::{BlockCache, Mount, PartitionDevice};
    use crate::harness::exercise;
    use crate::testing::RamDisk;

    const DISK_BLOCKS: u64 = VOLUME_LBAS;

    #[test]
    fn test_unformatted_mount_fails() {
        let disk = RamDisk::new(DISK_BLOCKS);
        let mut cache = BlockCache::new();
        let mut fs = LittleFs::new();
        let err = Mount::mount(&mut fs, CachedDisk::new(&disk, &mut cache)).err();
        assert_eq!(err, Some(FsError::MountFailed));
    }

    #[test]
    fn test_small_partition_rejected() {
        let disk = RamDisk::new(DISK_BLOCKS - 1);
        let mut cache = BlockCache::new();
        let mut fs = LittleFs::new();
        let err = Mount::mount(&mut fs, CachedDisk::new(&disk, &mut cache)).err();
        assert_eq!(err, Some(FsError::MountFailed));
    }

    #[test]
    fn test_file_and_dir_ops() {
        let disk = RamDisk::new(DISK_BLOCKS);
        let mut cache = BlockCache::new();
        LittleFs::format(&mut CachedDisk::new(&disk, &mut cache)).unwrap();

        let mut fs = LittleFs::new();
        let mut mnt = Mount::mount(&mut fs, CachedDisk::new(&disk, &mut cache)).unwrap();
        mnt.create_dir("/dir1").unwrap();
        mnt.create_file("/dir1/f0").unwrap();
        mnt.create_file("/test1").unwrap();
        assert_eq!(mnt.append("/test1", &[b'7'; 600]).unwrap(), 600);

        let mut buf = [0u8; 100];
        assert_eq!(mnt.read_at("/test1", 550, &mut buf).unwrap(), 50);
        assert!(buf[..50].iter().all(|&b| b == b'7'));

        let mut names = std::vec::Vec::new();
        mnt.read_dir("/", &mut |e: &Metadata| names.push((std::string::String::from(e.name.as_str()), e.is_dir())))
            .unwrap();
        names.sort();
        let expected = [(std::string::String::from("dir1"), true), (std::string::String::from("test1"), false)];
        assert_eq!(names, expected);

        assert_eq!(mnt.create_dir("/dir1"), Err(FsError::AlreadyExists));
        assert_eq!(mnt.remove_file("/missing"), Err(FsError::NotFound));
        mnt.remove_dir_all("/dir1").unwrap();

        let stats = mnt.stats().unwrap();
        assert_eq!(stats.blocks_count, LFS_BLOCK_COUNT as u64);
        assert!(stats.free_blocks_count < stats.blocks_count);
        mnt.unmount().unwrap();
    }

    #[test]
    fn test_auto_format_mounts_blank_partition() {
        let disk = RamDisk::new(DISK_BLOCKS + 64);
        let part = PartitionDevice::new(&disk, 64, DISK_BLOCKS).unwrap();
        let mut cache = BlockCache::new();
        let mut fs = LittleFs::new().with_auto_format(true);

        let mut mnt = Mount::mount(&mut fs, CachedDisk::new(&part, &mut cache)).unwrap();
        mnt.create_file("/a").unwrap();
        mnt.unmount().unwrap();

        // 已有卷不会被再次格式化
        let mut mnt = Mount::mount(&mut fs, CachedDisk::new(&part, &mut cache)).unwrap();
        let mut entries = 0;
        mnt.read_dir("/", &mut |_: &Metadata| entries += 1).unwrap();
        assert_eq!(entries, 1);
        mnt.unmount().unwrap();

        // 分区之外的块没有被触碰
        assert_eq!(disk.block(0), [0u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_default_file_stress_fits_volume() {
        let config = TestRunConfig::new();
        assert_eq!(config.validate_volume(LFS_VOLUME_BYTES), Ok(()));

        let disk = RamDisk::new(DISK_BLOCKS);
        let mut cache = BlockCache::new();
        LittleFs::format(&mut CachedDisk::new(&disk, &mut cache)).unwrap();

        let mut fs = LittleFs::new();
        let mut mnt = Mount::mount(&mut fs, CachedDisk::new(&disk, &mut cache)).unwrap();
        let mut buffer = [0u8; RW_BUFFER_SIZE];
        exercise::file_test(&mut mnt, &mut buffer, config.rw_size, config.rw_count).unwrap();

        let stats = mnt.stats().unwrap();
        let used = (stats.blocks_count - stats.free_blocks_count) * LFS_BLOCK_SIZE as u64;
        assert!(used >= config.rw_size as u64 * u64::from(config.rw_count));
        mnt.unmount().unwrap();
    }
}
