//! # QFlow管理模块
//!
//! 配置加载与验证、日志初始化。

pub mod config;
pub mod logging;

pub use config::{ConfigManager, ConfigOverrides, ConfigValidator, FlowConfig, LogFormat, LoggingConfig};
pub use logging::init_logging;
