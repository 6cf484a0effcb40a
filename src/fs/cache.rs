//! 块缓存
//!
//! 固定容量的 LRU 块缓存，条目以原始设备上的绝对块号为键，
//! 因此同一个缓存实例可以先后服务多个分区。
//!
//! 回写模式由 [`CachedDisk`] 上的引用计数控制:
//! - 计数 > 0: 写入只标记脏块，淘汰或关闭回写时才落盘
//! - 计数 = 0: 写穿透，同时刷新缓存副本
//! - 计数从 1 降到 0 时立即刷出全部脏块

use super::storage::{check_span, BlockDevice, StorageError, BLOCK_SIZE};

/// 缓存块数 (16 * 512B = 8KB)
pub const CACHE_BLOCKS: usize = 16;

struct CacheEntry {
    lba: u64,
    data: [u8; BLOCK_SIZE],
    valid: bool,
    dirty: bool,
    last_used: u64,
}

impl CacheEntry {
    const EMPTY: Self = Self {
        lba: 0,
        data: [0u8; BLOCK_SIZE],
        valid: false,
        dirty: false,
        last_used: 0,
    };
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    /// 回写到设备的脏块数
    pub write_backs: u32,
    /// LRU 时钟
    pub lru_ctr: u64,
    /// 当前有效块数
    pub ref_blocks: usize,
    /// 有效块数峰值
    pub max_ref_blocks: usize,
}

/// 块缓存实例
pub struct BlockCache {
    entries: [CacheEntry; CACHE_BLOCKS],
    tick: u64,
    stats: CacheStats,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCache {
    pub const fn new() -> Self {
        Self {
            entries: [CacheEntry::EMPTY; CACHE_BLOCKS],
            tick: 0,
            stats: CacheStats {
                hits: 0,
                misses: 0,
                write_backs: 0,
                lru_ctr: 0,
                ref_blocks: 0,
                max_ref_blocks: 0,
            },
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { lru_ctr: self.tick, ref_blocks: self.ref_blocks(), ..self.stats }
    }

    pub fn ref_blocks(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    pub fn dirty_blocks(&self) -> usize {
        self.entries.iter().filter(|e| e.valid && e.dirty).count()
    }

    fn find(&self, lba: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.valid && e.lba == lba)
    }

    /// 选出淘汰位置: 优先空闲条目，其次 LRU
    ///
    /// 其他设备的脏块无法在这里写回，不参与淘汰。
    fn victim(&self, range: (u64, u64)) -> Option<usize> {
        if let Some(idx) = self.entries.iter().position(|e| !e.valid) {
            return Some(idx);
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.dirty || (range.0..range.1).contains(&e.lba))
            .min_by_key(|(_, e)| e.last_used)
            .map(|(idx, _)| idx)
    }

    fn touch(&mut self, idx: usize) {
        self.tick += 1;
        self.entries[idx].last_used = self.tick;
    }

    /// 取得 `lba` 的缓存位置，未命中时淘汰一个条目 (必要时写回)
    fn slot_for<D: BlockDevice>(&mut self, dev: &D, lba: u64) -> Result<(usize, bool), StorageError> {
        let base = dev.base_lba();
        if let Some(idx) = self.find(base + lba) {
            self.stats.hits += 1;
            self.touch(idx);
            return Ok((idx, true));
        }

        self.stats.misses += 1;
        let idx = self
            .victim((base, base + dev.block_count()))
            .ok_or(StorageError::NotReady)?;
        let entry = &mut self.entries[idx];
        if entry.valid && entry.dirty {
            dev.write_blocks(entry.lba - base, &entry.data)?;
            entry.dirty = false;
            self.stats.write_backs += 1;
        }
        entry.valid = false;
        self.touch(idx);
        Ok((idx, false))
    }

    fn note_ref(&mut self) {
        let refs = self.ref_blocks();
        if refs > self.stats.max_ref_blocks {
            self.stats.max_ref_blocks = refs;
        }
    }

    fn read_block<D: BlockDevice>(&mut self, dev: &D, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let (idx, hit) = self.slot_for(dev, lba)?;
        let entry = &mut self.entries[idx];
        if !hit {
            dev.read_blocks(lba, &mut entry.data)?;
            entry.lba = dev.base_lba() + lba;
            entry.valid = true;
            entry.dirty = false;
            self.note_ref();
        }
        buf.copy_from_slice(&self.entries[idx].data);
        Ok(())
    }

    fn write_block<D: BlockDevice>(
        &mut self,
        dev: &D,
        lba: u64,
        data: &[u8],
        write_back: bool,
    ) -> Result<(), StorageError> {
        if !write_back {
            dev.write_blocks(lba, data)?;
        }
        let (idx, _) = self.slot_for(dev, lba)?;
        let entry = &mut self.entries[idx];
        entry.data.copy_from_slice(data);
        entry.lba = dev.base_lba() + lba;
        entry.valid = true;
        entry.dirty = write_back;
        self.note_ref();
        Ok(())
    }

    /// 写回属于 `dev` 的全部脏块
    pub fn flush<D: BlockDevice>(&mut self, dev: &D) -> Result<(), StorageError> {
        let base = dev.base_lba();
        let end = base + dev.block_count();
        for entry in self.entries.iter_mut() {
            if entry.valid && entry.dirty && (base..end).contains(&entry.lba) {
                dev.write_blocks(entry.lba - base, &entry.data)?;
                entry.dirty = false;
                self.stats.write_backs += 1;
            }
        }
        Ok(())
    }

    /// 丢弃属于 `dev` 的干净条目，返回丢弃数
    ///
    /// 脏块是该块的最新内容，保留到写回为止。
    pub fn invalidate<D: BlockDevice>(&mut self, dev: &D) -> usize {
        let base = dev.base_lba();
        let end = base + dev.block_count();
        let mut dropped = 0;
        for entry in self.entries.iter_mut() {
            if entry.valid && !entry.dirty && (base..end).contains(&entry.lba) {
                entry.valid = false;
                dropped += 1;
            }
        }
        dropped
    }
}

/// 挂载期间的 "设备 + 缓存" 组合
///
/// 文件系统只通过它访问分区，回写开关也挂在这里。
pub struct CachedDisk<'c, D> {
    dev: D,
    cache: &'c mut BlockCache,
    write_back: u32,
}

impl<'c, D: BlockDevice> CachedDisk<'c, D> {
    pub fn new(dev: D, cache: &'c mut BlockCache) -> Self {
        Self { dev, cache, write_back: 0 }
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn cache(&self) -> &BlockCache {
        self.cache
    }

    pub fn block_count(&self) -> u64 {
        self.dev.block_count()
    }

    pub fn write_back_enabled(&self) -> bool {
        self.write_back > 0
    }

    pub fn read(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        check_span(self.dev.block_count(), lba, buf.len())?;
        for (i, block) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.cache.read_block(&self.dev, lba + i as u64, block)?;
        }
        Ok(())
    }

    pub fn write(&mut self, lba: u64, data: &[u8]) -> Result<(), StorageError> {
        check_span(self.dev.block_count(), lba, data.len())?;
        let write_back = self.write_back_enabled();
        for (i, block) in data.chunks_exact(BLOCK_SIZE).enumerate() {
            self.cache.write_block(&self.dev, lba + i as u64, block, write_back)?;
        }
        Ok(())
    }

    /// 回写开关 (引用计数)
    ///
    /// 关闭使计数归零时刷出脏块；刷盘失败时计数仍然归零。
    pub fn set_write_back(&mut self, enable: bool) -> Result<(), StorageError> {
        if enable {
            self.write_back += 1;
            return Ok(());
        }
        self.write_back = self.write_back.saturating_sub(1);
        if self.write_back == 0 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.cache.flush(&self.dev)
    }

    /// 丢弃本设备的干净缓存块，下次访问重新从设备读取
    pub fn invalidate(&mut self) -> usize {
        self.cache.invalidate(&self.dev)
    }
}
