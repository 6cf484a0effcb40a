//! 测试运行配置
//!
//! 所有参数在启动时构造一次，之后只读，并显式传给编排器和阶段执行器。
//! 默认值即编译期常量，没有运行时参数解析。

use core::fmt;

/// 读写缓冲区大小 (字节)
pub const RW_BUFFER_SIZE: usize = 16 * 1024;

/// 默认读写重复次数
pub const DEFAULT_RW_COUNT: u32 = 100;

/// 默认目录测试条目数
pub const DEFAULT_DIR_COUNT: u32 = 100;

/// 阶段之间的默认延时 (毫秒)，照顾慢速日志/显示终端
pub const DEFAULT_PHASE_DELAY_MS: u32 = 1000;

/// 空闲闪烁半周期 (毫秒)
pub const IDLE_BLINK_MS: u32 = 500;

/// 卷容量中为文件系统元数据和写时复制预留的比例 (1/8)
pub const VOLUME_RESERVE_DIV: u64 = 8;

/// Linux 分区类型
pub const PART_TYPE_LINUX: u8 = 0x83;

/// 默认接受的分区类型
pub const DEFAULT_PART_TYPES: &[u8] = &[PART_TYPE_LINUX];

/// 块缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CacheMode {
    /// 所有挂载共用进程级缓存实例
    Static,
    /// 每次挂载使用独立的临时缓存，卸载后丢弃
    Dynamic,
}

impl CacheMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

/// 配置校验错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// 读写块大小为 0
    ZeroRwSize,
    /// 读写块大小超过缓冲区
    RwSizeExceedsBuffer { rw_size: usize, buffer: usize },
    /// 读写次数为 0
    ZeroRwCount,
    /// 没有可接受的分区类型
    NoPartitionTypes,
    /// 文件读写测试的数据量超过卷的可用容量
    PayloadExceedsVolume { payload: u64, usable: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroRwSize => write!(f, "rw size is zero"),
            Self::RwSizeExceedsBuffer { rw_size, buffer } => {
                write!(f, "rw size {} exceeds buffer of {} bytes", rw_size, buffer)
            }
            Self::ZeroRwCount => write!(f, "rw count is zero"),
            Self::NoPartitionTypes => write!(f, "no accepted partition types"),
            Self::PayloadExceedsVolume { payload, usable } => {
                write!(f, "rw payload {} exceeds usable volume of {} bytes", payload, usable)
            }
        }
    }
}

/// 一次测试运行的全部参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestRunConfig {
    /// 单次读写大小 (字节)
    pub rw_size: usize,
    /// 读写重复次数
    pub rw_count: u32,
    /// 目录测试条目数
    pub dir_count: u32,
    /// 缓存策略
    pub cache_mode: CacheMode,
    /// 主测试后执行清理
    pub cleanup: bool,
    /// 输出块设备统计
    pub block_stats: bool,
    /// 主测试前后输出超级块统计
    pub superblock_stats: bool,
    /// 阶段间延时 (毫秒)，0 表示不延时
    pub phase_delay_ms: u32,
    /// 等待设备就绪的超时 (毫秒)，`None` 表示无限等待
    pub attach_timeout_ms: Option<u32>,
    /// 视为可测试分区的 MBR 类型
    pub part_types: &'static [u8],
}

impl Default for TestRunConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunConfig {
    /// 编译期默认配置
    pub const fn new() -> Self {
        Self {
            rw_size: RW_BUFFER_SIZE,
            rw_count: DEFAULT_RW_COUNT,
            dir_count: DEFAULT_DIR_COUNT,
            cache_mode: CacheMode::Static,
            cleanup: false,
            block_stats: false,
            superblock_stats: false,
            phase_delay_ms: DEFAULT_PHASE_DELAY_MS,
            attach_timeout_ms: None,
            part_types: DEFAULT_PART_TYPES,
        }
    }

    pub const fn with_rw(mut self, rw_size: usize, rw_count: u32) -> Self {
        self.rw_size = rw_size;
        self.rw_count = rw_count;
        self
    }

    pub const fn with_dir_count(mut self, dir_count: u32) -> Self {
        self.dir_count = dir_count;
        self
    }

    pub const fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub const fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub const fn with_block_stats(mut self, enabled: bool) -> Self {
        self.block_stats = enabled;
        self
    }

    pub const fn with_superblock_stats(mut self, enabled: bool) -> Self {
        self.superblock_stats = enabled;
        self
    }

    pub const fn with_phase_delay_ms(mut self, ms: u32) -> Self {
        self.phase_delay_ms = ms;
        self
    }

    pub const fn with_attach_timeout_ms(mut self, ms: Option<u32>) -> Self {
        self.attach_timeout_ms = ms;
        self
    }

    pub const fn with_part_types(mut self, types: &'static [u8]) -> Self {
        self.part_types = types;
        self
    }

    /// 校验配置与给定缓冲区是否匹配
    pub fn validate(&self, buffer_len: usize) -> Result<(), ConfigError> {
        if self.rw_size == 0 {
            return Err(ConfigError::ZeroRwSize);
        }
        if self.rw_size > buffer_len {
            return Err(ConfigError::RwSizeExceedsBuffer {
                rw_size: self.rw_size,
                buffer: buffer_len,
            });
        }
        if self.rw_count == 0 {
            return Err(ConfigError::ZeroRwCount);
        }
        if self.part_types.is_empty() {
            return Err(ConfigError::NoPartitionTypes);
        }
        Ok(())
    }

    /// 文件读写测试写入的总字节数
    pub const fn rw_payload(&self) -> u64 {
        self.rw_size as u64 * self.rw_count as u64
    }

    /// 校验读写数据量能放进 `volume_bytes` 大小的卷 (扣除预留)
    pub fn validate_volume(&self, volume_bytes: u64) -> Result<(), ConfigError> {
        let usable = volume_bytes - volume_bytes / VOLUME_RESERVE_DIV;
        let payload = self.rw_payload();
        if payload > usable {
            return Err(ConfigError::PayloadExceedsVolume { payload, usable });
        }
        Ok(())
    }
}
