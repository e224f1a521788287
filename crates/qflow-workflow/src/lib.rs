//! # QFlow流程模块
//!
//! 门诊患者流转的核心，包括：
//! - 排队票状态机：Entry → Triage → Doctor → {Pharmacy | Lab | Payment} → Done
//! - 排队队列：发票、分诊、医生分派、站点办结，以及急诊优先的叫号顺序
//! - 患者登记与批量导入
//! - 站点通行证：各站点的变更操作必须出示
//! - 候诊大屏与队列统计

pub mod access;
pub mod analytics;
pub mod display;
pub mod engine;
pub mod import;
pub mod queue;
pub mod registry;
pub mod state_machine;

// 重新导出主要类型
pub use access::{StationAccess, StationPass};
pub use analytics::QueueStats;
pub use display::{Announcement, Announcer, DisplayFeed, LogAnnouncer};
pub use engine::{FlowEngine, FlowOverview, WorkflowSettings};
pub use import::{ImportReport, ImportRow, ParsedRow, RejectedRow};
pub use queue::TicketQueue;
pub use registry::PatientRegistry;
pub use state_machine::{TicketEvent, TicketState, TicketStateMachine};
