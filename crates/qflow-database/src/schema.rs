//! 表结构

use qflow_core::Result;
use sqlx::SqlitePool;

/// 创建数据库表
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // 患者表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            surname TEXT,
            age INTEGER NOT NULL CHECK (age BETWEEN 0 AND 120),
            gender TEXT,
            weight REAL,
            height REAL,
            bp TEXT,
            condition TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await?;

    // 排队票表，完成时间与 DONE 状态同时存在
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL REFERENCES patients(id),
            code TEXT UNIQUE,
            priority INTEGER NOT NULL DEFAULT 0,
            location TEXT NOT NULL,
            destination TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            CHECK ((status = 'DONE') = (completed_at IS NOT NULL))
        )
    "#,
    )
    .execute(pool)
    .await?;

    create_indexes(pool).await?;

    tracing::debug!("Database tables ensured");
    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        // 每位患者最多一张等待中的票
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_one_waiting ON tickets(patient_id) WHERE status = 'WAITING'",
        "CREATE INDEX IF NOT EXISTS idx_tickets_status_destination ON tickets(status, destination)",
        "CREATE INDEX IF NOT EXISTS idx_patients_names ON patients(first_name, surname, age)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}
