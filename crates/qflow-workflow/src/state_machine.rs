//! 排队票状态机
//!
//! Entry → Triage → Doctor → {Pharmacy | Lab | Payment} → Done

use qflow_core::{FlowError, Result, Station, Ticket, TicketStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TicketEvent {
    /// 分诊记录体征
    Triaged,
    /// 医生决定去向
    Routed(Station),
    /// 去向站点办结
    Completed(Station),
}

impl TicketEvent {
    fn kind(&self) -> EventKind {
        match self {
            TicketEvent::Triaged => EventKind::Triaged,
            TicketEvent::Routed(_) => EventKind::Routed,
            TicketEvent::Completed(_) => EventKind::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
    Triaged,
    Routed,
    Completed,
}

/// 转换后的票状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketState {
    pub location: Station,
    pub destination: Station,
    pub status: TicketStatus,
}

impl From<&Ticket> for TicketState {
    fn from(ticket: &Ticket) -> Self {
        Self {
            location: ticket.location,
            destination: ticket.destination,
            status: ticket.status,
        }
    }
}

/// 排队票状态机
#[derive(Debug)]
pub struct TicketStateMachine {
    /// (当前位置, 事件) -> 新位置
    transitions: HashMap<(Station, EventKind), Station>,
}

impl TicketStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((Station::Entry, EventKind::Triaged), Station::Triage);
        // 允许重新分诊
        transitions.insert((Station::Triage, EventKind::Triaged), Station::Triage);
        transitions.insert((Station::Triage, EventKind::Routed), Station::Doctor);
        // 医生在目的站办结前可修改去向
        transitions.insert((Station::Doctor, EventKind::Routed), Station::Doctor);
        // 办结后位置即办结站点，由事件携带
        transitions.insert((Station::Doctor, EventKind::Completed), Station::Doctor);

        Self { transitions }
    }

    /// 检查状态转换是否有效（不检查去向）
    pub fn can_transition(&self, location: Station, event: &TicketEvent) -> bool {
        self.transitions.contains_key(&(location, event.kind()))
    }

    /// 某事件允许的起始位置
    pub fn eligible_locations(&self, event: &TicketEvent) -> Vec<Station> {
        let kind = event.kind();
        let mut locations: Vec<Station> = self
            .transitions
            .keys()
            .filter(|(_, k)| *k == kind)
            .map(|(location, _)| *location)
            .collect();
        locations.sort();
        locations.dedup();
        locations
    }

    /// 执行状态转换，返回新状态或分类后的错误
    pub fn transition(&self, ticket: &Ticket, event: &TicketEvent) -> Result<TicketState> {
        if ticket.status == TicketStatus::Done {
            return Err(FlowError::AlreadyDone(ticket.code.clone()));
        }

        match *event {
            TicketEvent::Triaged => {
                self.next_location(ticket, event)?;
                Ok(TicketState {
                    location: Station::Triage,
                    destination: Station::Doctor,
                    status: TicketStatus::Waiting,
                })
            }
            TicketEvent::Routed(destination) => {
                Self::validate_destination(destination)?;
                let location = self.next_location(ticket, event)?;
                Ok(TicketState {
                    location,
                    destination,
                    status: TicketStatus::Waiting,
                })
            }
            TicketEvent::Completed(station) => {
                Self::validate_destination(station)?;
                if ticket.destination != station {
                    return Err(FlowError::StationMismatch {
                        ticket: ticket.code.clone(),
                        expected: ticket.destination,
                        actual: station,
                    });
                }
                self.next_location(ticket, event)?;
                Ok(TicketState {
                    location: station,
                    destination: station,
                    status: TicketStatus::Done,
                })
            }
        }
    }

    /// 医生只能分派到药房、化验或收费
    pub fn validate_destination(destination: Station) -> Result<()> {
        if destination.is_terminal() {
            Ok(())
        } else {
            Err(FlowError::InvalidDestination(destination.to_string()))
        }
    }

    /// 获取某位置上可能的事件
    pub fn get_possible_events(&self, location: Station) -> Vec<TicketEvent> {
        let mut events = Vec::new();
        if self.can_transition(location, &TicketEvent::Triaged) {
            events.push(TicketEvent::Triaged);
        }
        for station in Station::TERMINAL {
            if self.can_transition(location, &TicketEvent::Routed(station)) {
                events.push(TicketEvent::Routed(station));
            }
            if self.can_transition(location, &TicketEvent::Completed(station)) {
                events.push(TicketEvent::Completed(station));
            }
        }
        events
    }

    fn next_location(&self, ticket: &Ticket, event: &TicketEvent) -> Result<Station> {
        self.transitions
            .get(&(ticket.location, event.kind()))
            .copied()
            .ok_or_else(|| {
                FlowError::NoActiveTicket(format!(
                    "ticket {} at {} cannot accept {:?}",
                    ticket.code, ticket.location, event
                ))
            })
    }
}

impl Default for TicketStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qflow_core::Priority;

    fn ticket(location: Station, destination: Station, status: TicketStatus) -> Ticket {
        Ticket {
            id: 1,
            patient_id: 1,
            code: "T00001".to_string(),
            priority: Priority::Normal,
            location,
            destination,
            status,
            created_at: Utc::now(),
            completed_at: (status == TicketStatus::Done).then(Utc::now),
        }
    }

    #[test]
    fn test_valid_transitions() {
        let sm = TicketStateMachine::new();

        assert!(sm.can_transition(Station::Entry, &TicketEvent::Triaged));
        assert!(sm.can_transition(Station::Triage, &TicketEvent::Routed(Station::Lab)));
        assert!(sm.can_transition(Station::Doctor, &TicketEvent::Completed(Station::Payment)));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = TicketStateMachine::new();

        assert!(!sm.can_transition(Station::Entry, &TicketEvent::Routed(Station::Lab)));
        assert!(!sm.can_transition(Station::Doctor, &TicketEvent::Triaged));
        assert!(!sm.can_transition(Station::Entry, &TicketEvent::Completed(Station::Lab)));
    }

    #[test]
    fn test_eligible_locations() {
        let sm = TicketStateMachine::new();

        assert_eq!(
            sm.eligible_locations(&TicketEvent::Triaged),
            vec![Station::Entry, Station::Triage]
        );
        assert_eq!(
            sm.eligible_locations(&TicketEvent::Routed(Station::Pharmacy)),
            vec![Station::Triage, Station::Doctor]
        );
        assert_eq!(
            sm.eligible_locations(&TicketEvent::Completed(Station::Lab)),
            vec![Station::Doctor]
        );
    }

    #[test]
    fn test_state_execution() {
        let sm = TicketStateMachine::new();

        let t = ticket(Station::Entry, Station::Triage, TicketStatus::Waiting);
        let state = sm.transition(&t, &TicketEvent::Triaged).unwrap();
        assert_eq!(state.location, Station::Triage);
        assert_eq!(state.destination, Station::Doctor);

        let t = ticket(Station::Triage, Station::Doctor, TicketStatus::Waiting);
        let state = sm.transition(&t, &TicketEvent::Routed(Station::Pharmacy)).unwrap();
        assert_eq!(state.location, Station::Doctor);
        assert_eq!(state.destination, Station::Pharmacy);

        let t = ticket(Station::Doctor, Station::Pharmacy, TicketStatus::Waiting);
        let state = sm.transition(&t, &TicketEvent::Completed(Station::Pharmacy)).unwrap();
        assert_eq!(state.status, TicketStatus::Done);
    }

    #[test]
    fn test_error_classification() {
        let sm = TicketStateMachine::new();

        let t = ticket(Station::Triage, Station::Doctor, TicketStatus::Waiting);
        assert!(matches!(
            sm.transition(&t, &TicketEvent::Routed(Station::Triage)),
            Err(FlowError::InvalidDestination(_))
        ));

        let t = ticket(Station::Doctor, Station::Lab, TicketStatus::Waiting);
        assert!(matches!(
            sm.transition(&t, &TicketEvent::Completed(Station::Pharmacy)),
            Err(FlowError::StationMismatch { expected: Station::Lab, actual: Station::Pharmacy, .. })
        ));

        let t = ticket(Station::Lab, Station::Lab, TicketStatus::Done);
        assert!(matches!(
            sm.transition(&t, &TicketEvent::Completed(Station::Lab)),
            Err(FlowError::AlreadyDone(_))
        ));

        let t = ticket(Station::Entry, Station::Triage, TicketStatus::Waiting);
        assert!(matches!(
            sm.transition(&t, &TicketEvent::Routed(Station::Lab)),
            Err(FlowError::NoActiveTicket(_))
        ));
    }
}
