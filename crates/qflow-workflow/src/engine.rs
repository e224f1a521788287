//! 流程引擎
//!
//! 把登记、排队、站点访问和大屏组合在一起，供 Web 层和服务端使用。

use crate::{
    access::StationAccess,
    analytics::QueueStats,
    display::{Announcer, DisplayFeed},
    queue::TicketQueue,
    registry::PatientRegistry,
};
use chrono::Utc;
use qflow_core::{NewPatient, Patient, Priority, Result, Station, Ticket};
use qflow_database::{Database, Queries};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 引擎参数
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub ticket_prefix: String,
    pub credentials: HashMap<Station, String>,
    pub search_limit: i64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            ticket_prefix: "T".to_string(),
            credentials: StationAccess::default_credentials(),
            search_limit: 50,
        }
    }
}

/// 流程引擎
#[derive(Debug, Clone)]
pub struct FlowEngine {
    db: Database,
    registry: PatientRegistry,
    queue: TicketQueue,
    access: Arc<StationAccess>,
}

impl FlowEngine {
    pub fn new(db: Database, settings: WorkflowSettings) -> Self {
        let access = Arc::new(StationAccess::new(settings.credentials));

        Self {
            registry: PatientRegistry::new(db.clone(), settings.search_limit),
            queue: TicketQueue::new(db.clone(), access.clone(), settings.ticket_prefix),
            access,
            db,
        }
    }

    /// 自助机登记：建档并发票，两步在同一事务内，发票失败不会留下无票患者
    pub async fn check_in(&self, patient: NewPatient, priority: Priority) -> Result<(Patient, Ticket)> {
        patient.validate()?;

        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);
        let patient = queries.insert_patient(&patient, Utc::now()).await?;
        let ticket = self.queue.issue_within(&mut queries, patient.id, priority).await?;
        tx.commit().await?;

        tracing::info!("Patient {} checked in with ticket {}", patient.id, ticket.code);
        Ok((patient, ticket))
    }

    /// 系统概览
    pub async fn overview(&self) -> Result<FlowOverview> {
        let tickets = self.queue.all_tickets().await?;
        let stats = QueueStats::from_tickets(&tickets);

        let mut waiting_by_station = HashMap::new();
        for ticket in tickets.iter().filter(|t| t.is_active()) {
            *waiting_by_station.entry(ticket.destination).or_insert(0) += 1;
        }

        Ok(FlowOverview {
            waiting_by_station,
            stats,
        })
    }

    pub fn display_feed(&self, announcer: Arc<dyn Announcer>) -> DisplayFeed {
        DisplayFeed::new(self.queue.clone(), self.registry.clone(), announcer)
    }

    pub fn registry(&self) -> &PatientRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &TicketQueue {
        &self.queue
    }

    pub fn access(&self) -> &StationAccess {
        &self.access
    }
}

/// 系统概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOverview {
    /// 各站点当前等待人数（按去向）
    pub waiting_by_station: HashMap<Station, usize>,
    pub stats: QueueStats,
}
