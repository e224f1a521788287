//! 日志初始化

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// 构造过滤器，`RUST_LOG` 优先于配置
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level)),
    }
}

/// 安装全局日志订阅器
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.level)?)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;
    tracing::debug!("Logging initialised with {:?} format", config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_directives() {
        assert!(env_filter("info").is_ok());
        assert!(env_filter("qflow_workflow=debug,warn").is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig {
            format: LogFormat::Compact,
            ..Default::default()
        };
        // 全局订阅器只能安装一次
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
