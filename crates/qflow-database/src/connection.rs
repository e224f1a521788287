//! 数据库连接管理

use qflow_core::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::schema;

/// 连接参数
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            url: "sqlite://qflow.db".to_string(),
            max_connections: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// 数据库句柄
///
/// 进程启动时显式打开，并传递给各个组件；关闭后不可再用。
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// 打开数据库并建表
    pub async fn connect(options: &DatabaseOptions) -> Result<Self> {
        if options.url.contains(":memory:") {
            info!("Using in-memory database");
            return Self::in_memory().await;
        }

        let connect_options = SqliteConnectOptions::from_str(&options.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .connect_with(connect_options)
            .await?;

        let db = Self { pool };
        schema::create_tables(&db.pool).await?;

        info!("Database opened at {}", options.url);
        Ok(db)
    }

    /// 内存数据库，用于测试和演示
    ///
    /// 内存库随连接销毁，因此只保留一个永不回收的连接。
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        let db = Self { pool };
        schema::create_tables(&db.pool).await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 开启事务，每个对外操作都在单个事务内完成
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        assert!(!db.is_closed());

        let tx = db.begin().await.unwrap();
        tx.commit().await.unwrap();

        db.close().await;
        assert!(db.is_closed());
        assert!(db.begin().await.is_err());
    }
}
