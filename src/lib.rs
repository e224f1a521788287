//! # QFlow
//!
//! 医院患者流转排队系统。各层实现位于 `crates/` 下的独立 crate，这里统一导出。

pub use qflow_core;
pub use qflow_database;
pub use qflow_workflow;
