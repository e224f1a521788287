//! # QFlow数据库模块
//!
//! 负责患者与排队票的持久化，提供 SQLite 连接池、建表以及事务内的 CRUD 操作。

pub mod connection;
pub mod models;
pub mod queries;
pub mod schema;

// 重新导出主要类型
pub use connection::{Database, DatabaseOptions};
pub use models::*;
pub use queries::Queries;
