//! 主机测试夹具
//!
//! 稀疏内存块设备、内存文件系统、记录型延时/上报器以及模拟的 LED 和存储主机。

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::collections::{BTreeMap, BTreeSet};
use std::string::String;
use std::vec::Vec;

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;

use crate::config::TestRunConfig;
use crate::fs::storage::check_span;
use crate::fs::{
    BlockDevice, CachedDisk, FileType, Filesystem, FsError, Metadata, ScanError, StorageError, VolumeStats,
    BLOCK_SIZE,
};
use crate::harness::{MassStorageHost, Phase, Reporter, RunOutcome};

// ===== 块设备 =====

/// 稀疏内存磁盘，未写过的块读出全 0
pub struct RamDisk {
    blocks: u64,
    data: RefCell<BTreeMap<u64, [u8; BLOCK_SIZE]>>,
    fail_read: Cell<Option<u64>>,
    fail_write: Cell<Option<u64>>,
    reads: Cell<u32>,
    writes: Cell<u32>,
}

impl RamDisk {
    pub fn new(blocks: u64) -> Self {
        Self {
            blocks,
            data: RefCell::new(BTreeMap::new()),
            fail_read: Cell::new(None),
            fail_write: Cell::new(None),
            reads: Cell::new(0),
            writes: Cell::new(0),
        }
    }

    pub fn block(&self, lba: u64) -> [u8; BLOCK_SIZE] {
        self.data.borrow().get(&lba).copied().unwrap_or([0u8; BLOCK_SIZE])
    }

    /// 直接写入镜像数据，不计数
    pub fn load(&self, lba: u64, bytes: &[u8]) {
        let mut data = self.data.borrow_mut();
        for (i, chunk) in bytes.chunks(BLOCK_SIZE).enumerate() {
            let mut block = [0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            data.insert(lba + i as u64, block);
        }
    }

    pub fn fail_reads_at(&self, lba: u64) {
        self.fail_read.set(Some(lba));
    }

    pub fn fail_writes_at(&self, lba: u64) {
        self.fail_write.set(Some(lba));
    }

    /// 读请求次数
    pub fn reads(&self) -> u32 {
        self.reads.get()
    }

    /// 写请求次数
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    fn hits(fault: Option<u64>, lba: u64, blocks: u64) -> bool {
        fault.is_some_and(|f| (lba..lba + blocks).contains(&f))
    }
}

impl BlockDevice for RamDisk {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let blocks = check_span(self.blocks, lba, buf.len())?;
        if Self::hits(self.fail_read.get(), lba, blocks) {
            return Err(StorageError::ReadError);
        }
        self.reads.set(self.reads.get() + 1);
        for (i, chunk) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            chunk.copy_from_slice(&self.block(lba + i as u64));
        }
        Ok(())
    }

    fn write_blocks(&self, lba: u64, data: &[u8]) -> Result<(), StorageError> {
        let blocks = check_span(self.blocks, lba, data.len())?;
        if Self::hits(self.fail_write.get(), lba, blocks) {
            return Err(StorageError::WriteError);
        }
        self.writes.set(self.writes.get() + 1);
        self.load(lba, data);
        Ok(())
    }
}

/// 生成 MBR 引导扇区，条目为 (类型, 起始块, 块数)
pub fn mbr_image(disk_id: u32, entries: &[Option<(u8, u32, u32)>]) -> [u8; BLOCK_SIZE] {
    let mut sector = [0u8; BLOCK_SIZE];
    sector[440..444].copy_from_slice(&disk_id.to_le_bytes());
    for (i, entry) in entries.iter().take(4).enumerate() {
        if let Some((part_type, first_lba, sectors)) = *entry {
            let base = 446 + i * 16;
            sector[base + 4] = part_type;
            sector[base + 8..base + 12].copy_from_slice(&first_lba.to_le_bytes());
            sector[base + 12..base + 16].copy_from_slice(&sectors.to_le_bytes());
        }
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

// ===== 内存文件系统 =====

/// 文件系统操作，用于故障注入和调用记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    Mount,
    Unmount,
    CreateDir,
    RemoveDir,
    CreateFile,
    Append,
    ReadAt,
    RemoveFile,
    ReadDir,
    Stats,
}

const MAGIC: &[u8; 8] = b"MEMFS\x00\x00\x01";
const META_LBA: u64 = 1;

#[derive(Default)]
struct Volume {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    generation: u64,
}

impl Volume {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    /// 每次修改写一次元数据块，让缓存里有真实的脏块
    fn touch<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        self.generation += 1;
        let mut block = [0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&self.generation.to_le_bytes());
        disk.write(META_LBA, &block)?;
        Ok(())
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

struct Fault {
    mount: Option<u32>,
    op: FsOp,
    error: FsError,
}

/// 内存文件系统
///
/// 设备第 0 块必须带有 [`MemFs::format`] 写入的标记才能挂载。
/// 内容按设备的绝对起始块号保存，重新挂载同一分区时仍在。
#[derive(Default)]
pub struct MemFs {
    volumes: BTreeMap<u64, Volume>,
    mounted: Option<u64>,
    attempts: u32,
    mounts: u32,
    faults: Vec<Fault>,
    calls: Vec<(FsOp, bool)>,
    corrupt: bool,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format<D: BlockDevice + ?Sized>(dev: &D) {
        let mut block = [0u8; BLOCK_SIZE];
        block[..MAGIC.len()].copy_from_slice(MAGIC);
        dev.write_blocks(0, &block).unwrap();
    }

    /// 每次执行 `op` 都失败
    pub fn fail(&mut self, op: FsOp, error: FsError) {
        self.faults.push(Fault { mount: None, op, error });
    }

    /// 仅在第 `mount` 次挂载 (从 1 开始) 期间执行 `op` 失败
    pub fn fail_on_mount(&mut self, mount: u32, op: FsOp, error: FsError) {
        self.faults.push(Fault { mount: Some(mount), op, error });
    }

    /// 读出的数据首字节取反
    pub fn corrupt_reads(&mut self) {
        self.corrupt = true;
    }

    /// 成功挂载次数
    pub fn mounts(&self) -> u32 {
        self.mounts
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn called(&self, op: FsOp) -> bool {
        self.calls.iter().any(|(o, _)| *o == op)
    }

    /// `op` 是否曾在回写模式下执行
    pub fn saw_write_back(&self, op: FsOp) -> bool {
        self.calls.iter().any(|&(o, wb)| o == op && wb)
    }

    pub fn is_empty_at(&self, base_lba: u64) -> bool {
        self.volumes
            .get(&base_lba)
            .map_or(true, |v| v.dirs.is_empty() && v.files.is_empty())
    }

    fn check<D: BlockDevice>(&mut self, op: FsOp, disk: &CachedDisk<'_, D>) -> Result<(), FsError> {
        self.calls.push((op, disk.write_back_enabled()));
        let attempts = self.attempts;
        match self
            .faults
            .iter()
            .find(|f| f.op == op && f.mount.map_or(true, |n| n == attempts))
        {
            Some(fault) => Err(fault.error),
            None => Ok(()),
        }
    }

    fn volume<D: BlockDevice>(&mut self, disk: &CachedDisk<'_, D>) -> Result<&mut Volume, FsError> {
        let base = self.mounted.ok_or(FsError::NotMounted)?;
        if base != disk.device().base_lba() {
            return Err(FsError::NotMounted);
        }
        self.volumes.get_mut(&base).ok_or(FsError::NotMounted)
    }
}

impl Filesystem for MemFs {
    fn name(&self) -> &'static str {
        "memfs"
    }

    fn mount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        self.attempts += 1;
        self.check(FsOp::Mount, disk)?;
        let mut block = [0u8; BLOCK_SIZE];
        disk.read(0, &mut block)?;
        if &block[..MAGIC.len()] != MAGIC {
            return Err(FsError::MountFailed);
        }
        let base = disk.device().base_lba();
        self.volumes.entry(base).or_default();
        self.mounted = Some(base);
        self.mounts += 1;
        Ok(())
    }

    fn unmount<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<(), FsError> {
        self.check(FsOp::Unmount, disk)?;
        self.volume(disk)?;
        self.mounted = None;
        Ok(())
    }

    fn create_dir<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        self.check(FsOp::CreateDir, disk)?;
        let vol = self.volume(disk)?;
        if !vol.is_dir(parent(path)) {
            return Err(FsError::NotFound);
        }
        if vol.is_dir(path) || vol.files.contains_key(path) {
            return Err(FsError::AlreadyExists);
        }
        vol.dirs.insert(path.into());
        vol.touch(disk)
    }

    fn remove_dir_all<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        self.check(FsOp::RemoveDir, disk)?;
        let vol = self.volume(disk)?;
        if !vol.dirs.contains(path) {
            return Err(FsError::NotFound);
        }
        let prefix = format!("{}/", path);
        vol.dirs.retain(|d| d != path && !d.starts_with(&prefix));
        vol.files.retain(|f, _| !f.starts_with(&prefix));
        vol.touch(disk)
    }

    fn create_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        self.check(FsOp::CreateFile, disk)?;
        let vol = self.volume(disk)?;
        if !vol.is_dir(parent(path)) {
            return Err(FsError::NotFound);
        }
        if vol.is_dir(path) {
            return Err(FsError::AlreadyExists);
        }
        vol.files.insert(path.into(), Vec::new());
        vol.touch(disk)
    }

    fn append<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        data: &[u8],
    ) -> Result<usize, FsError> {
        self.check(FsOp::Append, disk)?;
        let vol = self.volume(disk)?;
        vol.files.get_mut(path).ok_or(FsError::NotFound)?.extend_from_slice(data);
        vol.touch(disk)?;
        Ok(data.len())
    }

    fn read_at<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        self.check(FsOp::ReadAt, disk)?;
        let corrupt = self.corrupt;
        let vol = self.volume(disk)?;
        let file = vol.files.get(path).ok_or(FsError::NotFound)?;
        let start = (offset as usize).min(file.len());
        let n = (file.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&file[start..start + n]);
        if corrupt && n > 0 {
            buf[0] ^= 0xFF;
        }
        Ok(n)
    }

    fn remove_file<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>, path: &str) -> Result<(), FsError> {
        self.check(FsOp::RemoveFile, disk)?;
        let vol = self.volume(disk)?;
        vol.files.remove(path).ok_or(FsError::NotFound)?;
        vol.touch(disk)
    }

    fn read_dir<D: BlockDevice>(
        &mut self,
        disk: &mut CachedDisk<'_, D>,
        path: &str,
        visit: &mut dyn FnMut(&Metadata),
    ) -> Result<(), FsError> {
        self.check(FsOp::ReadDir, disk)?;
        let vol = self.volume(disk)?;
        if !vol.is_dir(path) {
            return Err(if vol.files.contains_key(path) { FsError::NotADirectory } else { FsError::NotFound });
        }

        let dirs = vol.dirs.iter().map(|d| (d, FileType::Directory, 0u64));
        let files = vol.files.iter().map(|(f, data)| (f, FileType::File, data.len() as u64));
        for (entry, file_type, size) in dirs.chain(files) {
            if parent(entry) != path {
                continue;
            }
            let mut name = heapless::String::new();
            name.push_str(file_name(entry)).map_err(|_| FsError::PathTooLong)?;
            visit(&Metadata { file_type, size, name });
        }
        Ok(())
    }

    fn stats<D: BlockDevice>(&mut self, disk: &mut CachedDisk<'_, D>) -> Result<VolumeStats, FsError> {
        self.check(FsOp::Stats, disk)?;
        let blocks_count = disk.block_count();
        let vol = self.volume(disk)?;
        let used: u64 = vol
            .files
            .values()
            .map(|f| (f.len() as u64).div_ceil(BLOCK_SIZE as u64))
            .sum();
        Ok(VolumeStats {
            fs_name: "memfs",
            block_size: BLOCK_SIZE as u32,
            blocks_count,
            free_blocks_count: blocks_count.saturating_sub(used + 2),
        })
    }
}

// ===== 延时 / LED =====

/// 记录每次毫秒级延时，不真正等待
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub delays_ms: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.delays_ms.push(ms);
    }
}

/// 记录电平变化
#[derive(Debug, Default)]
pub struct MockLed {
    pub states: Vec<bool>,
}

impl MockLed {
    pub fn is_on(&self) -> bool {
        self.states.last().copied().unwrap_or(false)
    }
}

impl ErrorType for MockLed {
    type Error = Infallible;
}

impl OutputPin for MockLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.states.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.states.push(true);
        Ok(())
    }
}

// ===== 上报 =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DeviceReady,
    Conditions,
    ScanFailed(ScanError),
    Slot(usize, Option<(u64, u64)>),
    PartitionStarted(usize),
    PhaseStarted(Phase),
    PhaseFailed(Phase, FsError),
    Finished(RunOutcome),
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub events: Vec<Event>,
}

impl RecordingReporter {
    /// 开始测试的槽位
    pub fn started(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::PartitionStarted(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    /// 扫描结果 dump
    pub fn slots(&self) -> Vec<Option<(u64, u64)>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Slot(_, extent) => Some(*extent),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn device_ready(&mut self) {
        self.events.push(Event::DeviceReady);
    }

    fn conditions(&mut self, _config: &TestRunConfig) {
        self.events.push(Event::Conditions);
    }

    fn scan_failed(&mut self, error: ScanError) {
        self.events.push(Event::ScanFailed(error));
    }

    fn slot(&mut self, index: usize, extent: Option<(u64, u64)>) {
        self.events.push(Event::Slot(index, extent));
    }

    fn partition_started(&mut self, index: usize, _offset: u64, _size: u64) {
        self.events.push(Event::PartitionStarted(index));
    }

    fn phase_started(&mut self, phase: Phase) {
        self.events.push(Event::PhaseStarted(phase));
    }

    fn phase_failed(&mut self, phase: Phase, cause: FsError) {
        self.events.push(Event::PhaseFailed(phase, cause));
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        self.events.push(Event::Finished(*outcome));
    }
}

// ===== 存储主机 =====

/// 在指定轮询次数后接入/枚举完成的模拟主机
pub struct MockHost<Dev> {
    device: Dev,
    present: bool,
    attach_at: Option<u32>,
    enum_at: u32,
    polls: u32,
}

impl<Dev: BlockDevice> MockHost<Dev> {
    /// 默认立即就绪
    pub fn new(device: Dev) -> Self {
        Self { device, present: true, attach_at: Some(0), enum_at: 0, polls: 0 }
    }

    pub fn attach_after(mut self, polls: u32) -> Self {
        self.attach_at = Some(polls);
        self
    }

    pub fn enumerate_after(mut self, polls: u32) -> Self {
        self.enum_at = polls;
        self
    }

    pub fn never_attach(mut self) -> Self {
        self.attach_at = None;
        self
    }

    /// 就绪后仍拿不到块设备
    pub fn without_device(mut self) -> Self {
        self.present = false;
        self
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl<Dev: BlockDevice> MassStorageHost for MockHost<Dev> {
    type Device = Dev;

    fn attached(&self) -> bool {
        self.attach_at.is_some_and(|n| self.polls >= n)
    }

    fn enumerated(&self) -> bool {
        self.attached() && self.polls >= self.enum_at
    }

    fn process(&mut self) {
        self.polls += 1;
    }

    fn block_device(&self) -> Option<&Dev> {
        self.present.then_some(&self.device)
    }
}
