//! # 病灶追踪管理模块
//!
//! 提供配置加载、校验、保存以及日志初始化等运维功能

pub mod config;
pub mod logging;

// 重新导出主要类型
pub use crate::config::{ConfigManager, ConfigValidator, LoggingConfig, RecistConfig};
pub use crate::logging::{init_logging, LogFormat};
