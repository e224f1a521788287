//! 患者流转演示程序
//!
//! 在内存数据库上走完一次就诊：自助机登记、分诊、医生分派、药房办结，并展示大屏与统计。

use qflow_core::{NewPatient, PatientName, Priority, Station, Vitals};
use qflow_database::Database;
use qflow_workflow::{FlowEngine, LogAnnouncer, WorkflowSettings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let engine = FlowEngine::new(Database::in_memory().await?, WorkflowSettings::default());
    let feed = engine.display_feed(Arc::new(LogAnnouncer));

    println!("🏥 QFlow 患者流转演示\n");

    // 1. 自助机登记
    let (jane, ticket) = engine
        .check_in(
            NewPatient::new(PatientName::from_full_name("Jane Wanjiku Doe")?, 30, None)?,
            Priority::Normal,
        )
        .await?;
    let (_, urgent) = engine
        .check_in(
            NewPatient::new(PatientName::from_full_name("John Kamau")?, 58, None)?,
            Priority::Emergency,
        )
        .await?;
    println!("✅ {} 取号 {}", jane.name, ticket.code);
    println!("✅ 急诊患者取号 {}", urgent.code);

    if let Some(now) = feed.poll().await? {
        println!("📢 {}", now.text());
    }

    // 2. 各站点登录
    let access = engine.access();
    let triage = access.login(Station::Triage, "triage123").await?;
    let doctor = access.login(Station::Doctor, "doctor123").await?;
    let pharmacy = access.login(Station::Pharmacy, "pharmacy123").await?;

    // 3. 分诊 → 医生 → 药房
    let queue = engine.queue();
    let t = queue
        .record_triage(&triage, jane.id, &Vitals::new(60.0, 165.0, "120/80")?)
        .await?;
    println!("🩺 分诊完成，去向 {}", t.destination.display_name());

    let t = queue
        .record_doctor_decision(&doctor, jane.id, "flu", Station::Pharmacy)
        .await?;
    println!("👩‍⚕️ 医生诊断完成，去向 {}", t.destination.display_name());

    let done = queue.complete_station(&pharmacy, ticket.id, Station::Pharmacy).await?;
    println!("💊 药房办结 {}，状态 {:?}", done.code, done.status);

    match queue.complete_station(&pharmacy, ticket.id, Station::Pharmacy).await {
        Ok(_) => println!("⚠️ 重复办结竟然成功了"),
        Err(e) => println!("🚫 重复办结被拒绝: {}", e),
    }

    // 4. 统计
    let overview = engine.overview().await?;
    println!("\n📊 队列概览:");
    println!("   总票数: {}", overview.stats.total_tickets);
    println!("   等待中: {}", overview.stats.waiting);
    println!("   已办结: {}", overview.stats.completed);
    if let Some(avg) = overview.stats.average_wait_minutes {
        println!("   平均等待: {:.1} 分钟", avg);
    }

    Ok(())
}
