//! 条件编译日志系统
//!
//! 根据 feature 选择日志后端:
//! - `log-defmt`: defmt + RTT (二进制日志)
//! - `dev` / `log-println`: esp-println 文本输出
//! - 默认 (含主机测试): 日志语句编译为空，但格式串仍参与类型检查
//!
//! 上层只使用 `log_*!` 宏，不直接依赖任何后端。
//! 需要用 defmt 输出的自定义类型须在 `log-defmt` 下派生 `defmt::Format`。

// ===================================================================
// defmt 后端
// ===================================================================
#[cfg(feature = "log-defmt")]
#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// esp-println 后端
// ===================================================================
#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    (error, $($arg:tt)*) => { esp_println::println!("[ERROR] {}", format_args!($($arg)*)) };
    (warn, $($arg:tt)*) => { esp_println::println!("[WARN] {}", format_args!($($arg)*)) };
    (info, $($arg:tt)*) => { esp_println::println!("{}", format_args!($($arg)*)) };
    (debug, $($arg:tt)*) => { esp_println::println!("[DEBUG] {}", format_args!($($arg)*)) };
    (trace, $($arg:tt)*) => { esp_println::println!("[TRACE] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 空实现
// ===================================================================
#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:ident, $($arg:tt)*) => {{
        if false {
            let _ = format_args!($($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log!(error, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__log!(warn, $($arg)*) };
}

/// 普通输出: 测试条件、分区信息、阶段进度都走这一级
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log!(info, $($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__log!(debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::__log!(trace, $($arg)*) };
}

// ===================================================================
// 计时宏
// ===================================================================

/// 测量代码块耗时并以 debug 级别输出，返回代码块的值
///
/// # Example
/// ```ignore
/// let table = timed!("mbr scan", scan(&raw, &config))?;
/// // 输出: [DEBUG] mbr scan: 12 ms
/// ```
#[macro_export]
macro_rules! timed {
    ($name:expr, $block:expr) => {{
        let start = embassy_time::Instant::now();
        let result = $block;
        $crate::log_debug!("{}: {} ms", $name, start.elapsed().as_millis());
        result
    }};
}
