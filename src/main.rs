//! mscfs-bringup - ESP32-S3 板级入口
//!
//! 单个 Embassy 任务顺序执行: 等待 SD 卡 → 扫描 MBR → 逐分区测试 → 闪灯。
//!
//! 引脚分配 (按实际硬件调整):
//! - SPI2: SCK=GPIO12, MOSI=GPIO11, MISO=GPIO13, CS=GPIO10
//! - 卡检测: GPIO9 (低电平有效)
//! - 绿灯 GPIO4 (空闲闪烁), 红灯 GPIO5 (设备就绪)
//!
//! SD 卡准备: MBR 分区表中至少一个类型 0x83 的主分区，大小不小于 16MB，
//! 分区起始处为 littlefs 卷 (块大小 4096，块数 4096，读写粒度 512)，
//! 在主机上按 `fs::littlefs` 中的常量生成镜像后写到分区起始扇区。
//! 也可以启用 `format` feature，挂载时找不到卷就先格式化 (会清空分区开头 16MB)。

#![no_std]
#![no_main]

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_executor::Spawner;
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::{
    delay::Delay as BusyDelay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    spi::{
        master::{Config as SpiConfig, Spi},
        Mode as SpiMode,
    },
    time::Rate,
    timer::timg::TimerGroup,
    Blocking,
};
use static_cell::StaticCell;

use mscfs_bringup::config::{TestRunConfig, IDLE_BLINK_MS, RW_BUFFER_SIZE};
use mscfs_bringup::fs::littlefs::{LittleFs, LFS_VOLUME_BYTES};
use mscfs_bringup::fs::BlockCache;
use mscfs_bringup::harness::{halt, CardEvent, Harness, LedReporter, SdHost, SD_FAST_KHZ, SD_INIT_KHZ};
use mscfs_bringup::{log_debug, log_error, log_info, log_warn};

// ===== 日志后端 =====
#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

// ===== Panic Handler =====
#[cfg(any(feature = "dev", feature = "log-println"))]
use esp_backtrace as _;

#[cfg(not(any(feature = "dev", feature = "log-println")))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ===== 静态分配 =====
/// 读写测试缓冲区
static RW_BUFFER: StaticCell<[u8; RW_BUFFER_SIZE]> = StaticCell::new();

/// Static 模式下所有挂载共用的块缓存
static BLOCK_CACHE: StaticCell<BlockCache> = StaticCell::new();

/// 本次运行的测试参数
const CONFIG: TestRunConfig = TestRunConfig::new();

type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, BusyDelay>;
type Card = SdCard<SdSpi, BusyDelay>;

fn sd_spi_config(khz: u32) -> SpiConfig {
    SpiConfig::default()
        .with_frequency(Rate::from_khz(khz))
        .with_mode(SpiMode::_0)
}

/// 卡就绪后提速，拔出后回到初始化时钟
fn on_card_event(card: &Card, event: CardEvent) {
    let khz = match event {
        CardEvent::Ready => SD_FAST_KHZ,
        CardEvent::Removed => {
            card.mark_card_uninit();
            SD_INIT_KHZ
        }
    };
    match card.spi(|dev| dev.bus_mut().apply_config(&sd_spi_config(khz))) {
        Ok(()) => log_debug!("sd spi clock {} kHz", khz),
        Err(_) => log_warn!("sd spi clock change to {} kHz failed", khz),
    }
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    // ========================================
    // 1. 硬件初始化
    // ========================================
    let peripherals = esp_hal::init(esp_hal::Config::default());
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log_info!("{} v{}", mscfs_bringup::NAME, mscfs_bringup::VERSION);

    let green = Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default());
    let red = Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default());

    let config = CONFIG;
    if let Err(e) = config
        .validate(RW_BUFFER_SIZE)
        .and_then(|()| config.validate_volume(LFS_VOLUME_BYTES))
    {
        log_error!("invalid config: {}", e);
        halt(green, Delay, IDLE_BLINK_MS).await
    }

    // ========================================
    // 2. SD 卡 (SPI2)
    // ========================================
    let spi = match Spi::new(peripherals.SPI2, sd_spi_config(SD_INIT_KHZ)) {
        Ok(spi) => spi
            .with_sck(peripherals.GPIO12)
            .with_mosi(peripherals.GPIO11)
            .with_miso(peripherals.GPIO13),
        Err(_) => {
            log_error!("spi init failed");
            halt(green, Delay, IDLE_BLINK_MS).await
        }
    };
    let cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let spi_dev = match ExclusiveDevice::new(spi, cs, BusyDelay::new()) {
        Ok(dev) => dev,
        Err(_) => {
            log_error!("sd chip select init failed");
            halt(green, Delay, IDLE_BLINK_MS).await
        }
    };
    let card: Card = SdCard::new(spi_dev, BusyDelay::new());
    let detect = Input::new(peripherals.GPIO9, InputConfig::default().with_pull(Pull::Up));
    let mut host = SdHost::new(card, detect, on_card_event);

    // ========================================
    // 3. 测试
    // ========================================
    let buffer = RW_BUFFER.init([0u8; RW_BUFFER_SIZE]);
    let cache = BLOCK_CACHE.init(BlockCache::new());
    let mut fs = LittleFs::new().with_auto_format(cfg!(feature = "format"));
    let mut delay = Delay;
    let mut reporter = LedReporter::new(red);

    let outcome = Harness::new(&config, &mut fs, &mut delay, buffer, cache)
        .run(&mut host, &mut reporter)
        .await;
    log_debug!("exit code {}", outcome.exit_code());

    // ========================================
    // 4. 空闲闪烁，等待复位
    // ========================================
    halt(green, Delay, IDLE_BLINK_MS).await
}
