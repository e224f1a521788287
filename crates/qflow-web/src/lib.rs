//! # QFlow Web模块
//!
//! 面向自助机、各站点终端和候诊大屏的 HTTP API。

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

use qflow_workflow::FlowEngine;
use std::sync::Arc;

/// 路由共享状态
pub type AppState = Arc<FlowEngine>;

pub use error::{ApiError, ApiResult};
pub use server::{create_app, WebServer};
