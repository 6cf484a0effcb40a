//! 通用工具

#[macro_use]
pub mod log;
