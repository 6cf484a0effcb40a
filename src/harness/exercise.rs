//! 文件系统测试例程
//!
//! 目录压力、文件读写校验、清理、列目录以及统计输出。
//! 所有路径都相对挂载点根目录。

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;

use crate::fs::{BlockDevice, CachedDisk, Filesystem, FsError, Metadata, Mount, MAX_NAME_LEN};

/// 目录测试使用的目录
pub const DIR_PATH: &str = "/dir1";

/// 问候文件
pub const HELLO_PATH: &str = "/hello.txt";

/// 问候文件内容
pub const HELLO_TEXT: &[u8] = b"Hello World !\n";

/// 读写测试文件
pub const RW_PATH: &str = "/test1";

/// 第 `chunk` 块的填充字节: '0'..'9' 循环
pub const fn fill_byte(chunk: u32) -> u8 {
    b'0' + (chunk % 10) as u8
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis()
}

/// KB/s，分母加 1 避免除零
fn speed_kbs(bytes: u64, ms: u64) -> u64 {
    bytes / (ms + 1)
}

/// 打印目录内容，失败只记录日志
pub fn list_dir<F: Filesystem, D: BlockDevice>(mnt: &mut Mount<'_, '_, F, D>, path: &str) {
    log_info!("ls {}", path);
    let mut count = 0u32;
    let result = mnt.read_dir(path, &mut |entry: &Metadata| {
        count += 1;
        log_info!("  {}{} ({} bytes)", entry.file_type.tag(), entry.name.as_str(), entry.size);
    });
    match result {
        Ok(()) => log_debug!("ls {}: {} entries", path, count),
        Err(e) => log_warn!("ls {} failed: {}", path, e),
    }
}

/// 目录压力测试: 在 `/dir1` 下创建 `count` 个空文件
///
/// 文件创建期间强制开启回写。
pub fn dir_test<F: Filesystem, D: BlockDevice>(mnt: &mut Mount<'_, '_, F, D>, count: u32) -> Result<(), FsError> {
    log_info!("directory create: {}", DIR_PATH);
    mnt.create_dir(DIR_PATH)?;

    log_info!("add files to: {}", DIR_PATH);
    let start = Instant::now();
    mnt.disk_mut().set_write_back(true)?;
    let created = create_entries(mnt, count);
    let flushed = mnt.disk_mut().set_write_back(false);
    created?;
    flushed?;
    log_info!("  dir create time: {} ms", elapsed_ms(start));

    list_dir(mnt, DIR_PATH);
    Ok(())
}

fn create_entries<F: Filesystem, D: BlockDevice>(mnt: &mut Mount<'_, '_, F, D>, count: u32) -> Result<(), FsError> {
    let mut path: String<MAX_NAME_LEN> = String::new();
    for i in 0..count {
        path.clear();
        write!(path, "{}/f{}", DIR_PATH, i).map_err(|_| FsError::PathTooLong)?;
        mnt.create_file(&path)?;
    }
    Ok(())
}

/// 文件读写测试
///
/// 先写问候文件，再把 `rw_count` 个 `rw_size` 字节的块写入 `/test1`，
/// 第 i 块全部填充 `'0' + i % 10`，最后逐块读回校验。
pub fn file_test<F: Filesystem, D: BlockDevice>(
    mnt: &mut Mount<'_, '_, F, D>,
    buffer: &mut [u8],
    rw_size: usize,
    rw_count: u32,
) -> Result<(), FsError> {
    log_info!("file_test:");
    log_info!("  rw size: {}", rw_size);
    log_info!("  rw count: {}", rw_count);

    let available = buffer.len();
    let chunk = buffer.get_mut(..rw_size).ok_or(FsError::ShortTransfer {
        expected: rw_size,
        actual: available,
    })?;

    mnt.create_file(HELLO_PATH)?;
    expect_len(HELLO_TEXT.len(), mnt.append(HELLO_PATH, HELLO_TEXT)?)?;

    mnt.create_file(RW_PATH)?;
    log_info!("fs write: {} * {} ...", rw_size, rw_count);
    let start = Instant::now();
    for i in 0..rw_count {
        chunk.fill(fill_byte(i));
        let written = mnt.append(RW_PATH, chunk).inspect_err(|_| log_warn!("  file_test: rw_count = {}", i))?;
        expect_len(rw_size, written)?;
    }
    report_speed("write", rw_size, rw_count, elapsed_ms(start));

    log_info!("fs read: {} * {} ...", rw_size, rw_count);
    let start = Instant::now();
    let mut offset = 0u64;
    for i in 0..rw_count {
        let read = mnt.read_at(RW_PATH, offset, chunk)?;
        expect_len(rw_size, read)?;
        let fill = fill_byte(i);
        if chunk.iter().any(|&b| b != fill) {
            log_error!("  file_test: data mismatch in chunk {}", i);
            return Err(FsError::DataMismatch { chunk: i });
        }
        offset += rw_size as u64;
    }
    report_speed("read", rw_size, rw_count, elapsed_ms(start));
    Ok(())
}

fn expect_len(expected: usize, actual: usize) -> Result<(), FsError> {
    if expected == actual {
        Ok(())
    } else {
        Err(FsError::ShortTransfer { expected, actual })
    }
}

fn report_speed(op: &str, rw_size: usize, rw_count: u32, ms: u64) {
    let bytes = rw_size as u64 * u64::from(rw_count);
    log_info!("  {} time: {} ms", op, ms);
    log_info!("  {} speed: {} KB/s", op, speed_kbs(bytes, ms));
}

/// 删除上一次运行留下的文件，不存在不算错误
pub fn cleanup<F: Filesystem, D: BlockDevice>(mnt: &mut Mount<'_, '_, F, D>) {
    log_info!("cleanup:");
    let start = Instant::now();

    for path in [HELLO_PATH, RW_PATH] {
        log_info!("  remove {}", path);
        tolerate_missing(path, mnt.remove_file(path));
    }

    log_info!("  remove {}", DIR_PATH);
    tolerate_missing(DIR_PATH, mnt.remove_dir_all(DIR_PATH));

    log_info!("  cleanup time: {} ms", elapsed_ms(start));
}

fn tolerate_missing(path: &str, result: Result<(), FsError>) {
    match result {
        Ok(()) | Err(FsError::NotFound) => {}
        Err(e) => log_warn!("  remove {} failed: {}", path, e),
    }
}

/// 打印超级块统计
pub fn print_volume_stats<F: Filesystem, D: BlockDevice>(mnt: &mut Mount<'_, '_, F, D>) {
    match mnt.stats() {
        Ok(stats) => {
            log_info!("********************");
            log_info!("volume stats ({}):", stats.fs_name);
            log_info!("  block_size: {}", stats.block_size);
            log_info!("  blocks_count: {}", stats.blocks_count);
            log_info!("  free_blocks_count: {}", stats.free_blocks_count);
            log_info!("********************");
        }
        Err(e) => log_warn!("volume stats failed: {}", e),
    }
}

/// 打印块设备与缓存统计
pub fn print_block_stats<D: BlockDevice>(disk: &CachedDisk<'_, D>) {
    let dev = disk.device();
    log_info!("********************");
    log_info!("block device stats:");
    log_info!("  block_size: {}", crate::fs::BLOCK_SIZE);
    log_info!("  block_count: {}", dev.block_count());
    if let Some(io) = dev.io_stats() {
        log_info!("  bread_ctr: {} ({} blocks)", io.bread, io.blocks_read);
        log_info!("  bwrite_ctr: {} ({} blocks)", io.bwrite, io.blocks_written);
    }

    let cache = disk.cache().stats();
    log_info!("  cache write-back: {}", disk.write_back_enabled());
    log_info!("  cache hits: {} misses: {}", cache.hits, cache.misses);
    log_info!("  cache write_backs: {}", cache.write_backs);
    log_info!("  cache lru_ctr: {}", cache.lru_ctr);
    log_info!("  cache ref_blocks: {}", cache.ref_blocks);
    log_info!("  cache max_ref_blocks: {}", cache.max_ref_blocks);
    log_info!("  cache dirty_blocks: {}", disk.cache().dirty_blocks());
    log_info!("********************");
}
