//! 错误定义模块

use crate::models::Station;
use thiserror::Error;

/// 排队系统统一错误类型
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("没有可处理的排队票: {0}")]
    NoActiveTicket(String),

    #[error("输入无效 ({field}): {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("无效的去向: {0}")]
    InvalidDestination(String),

    #[error("站点不匹配: 排队票 {ticket} 当前去向 {expected}, 操作站点 {actual}")]
    StationMismatch {
        ticket: String,
        expected: Station,
        actual: Station,
    },

    #[error("排队票已完成: {0}")]
    AlreadyDone(String),

    #[error("患者已有进行中的排队票: {0}")]
    DuplicateActiveTicket(String),

    #[error("权限错误: {0}")]
    Unauthorized(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl FlowError {
    /// 构造带字段名的输入错误
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 错误类别的稳定名称，供 API 响应使用
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::NotFound(_) => "not_found",
            FlowError::NoActiveTicket(_) => "no_active_ticket",
            FlowError::InvalidInput { .. } => "invalid_input",
            FlowError::InvalidDestination(_) => "invalid_destination",
            FlowError::StationMismatch { .. } => "station_mismatch",
            FlowError::AlreadyDone(_) => "already_done",
            FlowError::DuplicateActiveTicket(_) => "duplicate_active_ticket",
            FlowError::Unauthorized(_) => "unauthorized",
            FlowError::Database(_) => "database",
            FlowError::Config(_) => "config",
            FlowError::Io(_) => "io",
            FlowError::Serialization(_) => "serialization",
            FlowError::Internal(_) => "internal",
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::Database(err.to_string())
    }
}

/// 排队系统统一结果类型
pub type Result<T> = std::result::Result<T, FlowError>;
