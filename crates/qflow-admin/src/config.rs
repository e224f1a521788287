//! 配置管理
//!
//! 默认值 → TOML 配置文件（可选）→ `QFLOW__` 前缀的环境变量，逐层覆盖。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use qflow_core::Station;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "QFLOW";

/// 系统完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 站点口令
    pub stations: StationsConfig,
    /// 排队票配置
    pub tickets: TicketsConfig,
    /// 候诊大屏配置
    pub display: DisplayConfig,
    /// 患者登记配置
    pub registry: RegistryConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务器名称
    pub name: String,
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// 数据库配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
}

/// 各站点共享口令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationsConfig {
    pub triage: String,
    pub doctor: String,
    pub pharmacy: String,
    pub lab: String,
    pub payment: String,
}

impl StationsConfig {
    pub fn credentials(&self) -> HashMap<Station, String> {
        HashMap::from([
            (Station::Triage, self.triage.clone()),
            (Station::Doctor, self.doctor.clone()),
            (Station::Pharmacy, self.pharmacy.clone()),
            (Station::Lab, self.lab.clone()),
            (Station::Payment, self.payment.clone()),
        ])
    }
}

/// 排队票配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketsConfig {
    /// 票号前缀
    pub prefix: String,
}

/// 候诊大屏配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
}

/// 患者登记配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 搜索返回条数上限
    pub search_limit: i64,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: FlowConfig,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

impl ConfigManager {
    /// 加载并验证配置
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path, ENV_PREFIX)?;
        Self::with_config(config, config_path.map(Path::to_path_buf))
    }

    pub fn with_config(config: FlowConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path,
            validator,
        })
    }

    fn load_config(config_path: Option<&Path>, env_prefix: &str) -> Result<FlowConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&FlowConfig::default()).context("Failed to build default configuration")?,
        );

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(env_prefix).separator("__").try_parsing(true))
            .build()
            .context("Failed to load configuration")?;

        let config: FlowConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 应用命令行覆盖并重新验证
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        let mut updated = self.config.clone();

        if let Some(host) = overrides.host {
            updated.server.host = host;
        }
        if let Some(port) = overrides.port {
            updated.server.port = port;
        }
        if let Some(url) = overrides.database_url {
            updated.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            updated.logging.level = level;
        }

        self.validator.validate(&updated)?;
        self.config = updated;
        Ok(())
    }

    /// 生效配置的 TOML 文本
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config).context("Failed to serialize configuration")
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&FlowConfig) -> Result<()>,
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port",
                validator: |config| {
                    if config.server.port == 0 {
                        anyhow::bail!("server port cannot be 0");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "database.max_connections",
                validator: |config| {
                    if config.database.max_connections == 0 {
                        anyhow::bail!("database max connections cannot be 0");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "display.poll_interval_secs",
                validator: |config| {
                    if config.display.poll_interval_secs == 0 {
                        anyhow::bail!("display poll interval cannot be 0");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "tickets.prefix",
                validator: |config| {
                    if config.tickets.prefix.trim().is_empty() {
                        anyhow::bail!("ticket prefix cannot be empty");
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "stations",
                validator: |config| {
                    let credentials = config.stations.credentials();
                    let mut empty: Vec<_> = credentials
                        .iter()
                        .filter(|(_, password)| password.is_empty())
                        .map(|(station, _)| station.as_str())
                        .collect();
                    if !empty.is_empty() {
                        empty.sort();
                        anyhow::bail!("empty credential for {}", empty.join(", "));
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "registry.search_limit",
                validator: |config| {
                    if config.registry.search_limit <= 0 {
                        anyhow::bail!("search limit must be positive");
                    }
                    Ok(())
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &FlowConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration value {}", rule.field_path)));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "QFlow-Server".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://qflow.db".to_string(),
            max_connections: 5,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            triage: "triage123".to_string(),
            doctor: "doctor123".to_string(),
            pharmacy: "pharmacy123".to_string(),
            lab: "lab123".to_string(),
            payment: "payment123".to_string(),
        }
    }
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            prefix: "T".to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 7,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { search_limit: 50 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
