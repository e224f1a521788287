//! 队列统计

use chrono::Timelike;
use qflow_core::{Station, Ticket, TicketStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 队列统计数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_tickets: usize,
    pub waiting: usize,
    pub completed: usize,
    /// 已办结票从发票到办结的平均分钟数
    pub average_wait_minutes: Option<f64>,
    pub completed_by_station: BTreeMap<Station, usize>,
    /// 按发票小时（UTC）统计到达数
    pub arrivals_by_hour: BTreeMap<u32, usize>,
}

impl QueueStats {
    pub fn from_tickets(tickets: &[Ticket]) -> Self {
        let mut stats = QueueStats {
            total_tickets: tickets.len(),
            ..Default::default()
        };

        let mut total_wait = 0.0;

        for ticket in tickets {
            *stats
                .arrivals_by_hour
                .entry(ticket.created_at.hour())
                .or_insert(0) += 1;

            match ticket.status {
                TicketStatus::Waiting => stats.waiting += 1,
                TicketStatus::Done => {
                    stats.completed += 1;
                    *stats.completed_by_station.entry(ticket.location).or_insert(0) += 1;
                    total_wait += ticket.wait_minutes().unwrap_or(0.0);
                }
            }
        }

        if stats.completed > 0 {
            stats.average_wait_minutes = Some(total_wait / stats.completed as f64);
        }

        stats
    }
}
