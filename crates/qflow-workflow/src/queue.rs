//! 排队票队列
//!
//! 负责发票、按站点推进、办结，以及大屏和各站点看板所用的排序。
//! 每个对外操作都在单个事务中完成；状态变更使用带条件的更新，
//! 条件不满足时再读取当前票，由状态机给出具体错误。

use crate::access::{StationAccess, StationPass};
use crate::registry::validate_condition;
use crate::state_machine::{TicketEvent, TicketStateMachine};
use chrono::Utc;
use qflow_core::utils::format_ticket_code;
use qflow_core::{
    FlowError, PatientId, Priority, Result, Station, Ticket, TicketId, Vitals,
};
use qflow_database::{Database, Queries};
use std::sync::Arc;
use tracing::{info, warn};

/// 排队票队列
#[derive(Debug, Clone)]
pub struct TicketQueue {
    db: Database,
    access: Arc<StationAccess>,
    state_machine: Arc<TicketStateMachine>,
    code_prefix: String,
}

impl TicketQueue {
    pub fn new(db: Database, access: Arc<StationAccess>, code_prefix: impl Into<String>) -> Self {
        Self {
            db,
            access,
            state_machine: Arc::new(TicketStateMachine::new()),
            code_prefix: code_prefix.into(),
        }
    }

    pub fn state_machine(&self) -> &TicketStateMachine {
        &self.state_machine
    }

    /// 为患者发放入口排队票
    pub async fn issue_ticket(&self, patient_id: PatientId, priority: Priority) -> Result<Ticket> {
        let mut tx = self.db.begin().await?;
        let ticket = self
            .issue_within(&mut Queries::new(&mut tx), patient_id, priority)
            .await?;
        tx.commit().await?;

        info!(
            "Issued ticket {} to patient {} with priority {:?}",
            ticket.code, patient_id, priority
        );
        Ok(ticket)
    }

    /// 在调用方的事务内发票
    pub(crate) async fn issue_within(
        &self,
        queries: &mut Queries<'_>,
        patient_id: PatientId,
        priority: Priority,
    ) -> Result<Ticket> {
        let id = queries
            .insert_ticket(patient_id, priority, Utc::now())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("patient {}", patient_id)))?;
        queries
            .assign_ticket_code(id, &format_ticket_code(&self.code_prefix, id))
            .await
    }

    /// 分诊：写入体征并转到医生
    pub async fn record_triage(
        &self,
        pass: &StationPass,
        patient_id: PatientId,
        vitals: &Vitals,
    ) -> Result<Ticket> {
        self.access.authorize(pass, Station::Triage).await?;
        vitals.validate()?;

        let event = TicketEvent::Triaged;
        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);

        let ticket = match queries
            .advance_active_ticket(
                patient_id,
                &self.state_machine.eligible_locations(&event),
                Station::Triage,
                Station::Doctor,
            )
            .await?
        {
            Some(ticket) => ticket,
            None => return Err(self.explain_patient_rejection(&mut queries, patient_id, &event).await),
        };

        queries
            .update_vitals(patient_id, vitals, Utc::now())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("patient {}", patient_id)))?;

        tx.commit().await?;

        info!("Ticket {} triaged, forwarded to {}", ticket.code, ticket.destination);
        Ok(ticket)
    }

    /// 医生诊断并分派去向，票仍为等待状态
    pub async fn record_doctor_decision(
        &self,
        pass: &StationPass,
        patient_id: PatientId,
        condition: &str,
        destination: Station,
    ) -> Result<Ticket> {
        self.access.authorize(pass, Station::Doctor).await?;
        TicketStateMachine::validate_destination(destination)?;
        let condition = validate_condition(condition)?;

        let event = TicketEvent::Routed(destination);
        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);

        let ticket = match queries
            .advance_active_ticket(
                patient_id,
                &self.state_machine.eligible_locations(&event),
                Station::Doctor,
                destination,
            )
            .await?
        {
            Some(ticket) => ticket,
            None => return Err(self.explain_patient_rejection(&mut queries, patient_id, &event).await),
        };

        queries
            .update_condition(patient_id, condition, Utc::now())
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("patient {}", patient_id)))?;

        tx.commit().await?;

        info!("Ticket {} routed to {}", ticket.code, destination);
        Ok(ticket)
    }

    /// 去向站点办结排队票
    ///
    /// 两个站点同时办结同一张票时，只有一方成功，另一方得到 AlreadyDone。
    pub async fn complete_station(
        &self,
        pass: &StationPass,
        ticket_id: TicketId,
        station: Station,
    ) -> Result<Ticket> {
        self.access.authorize(pass, station).await?;
        TicketStateMachine::validate_destination(station)?;

        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);

        if let Some(ticket) = queries.complete_ticket(ticket_id, station, Utc::now()).await? {
            tx.commit().await?;
            info!("Ticket {} completed at {}", ticket.code, station);
            return Ok(ticket);
        }

        let current = queries
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("ticket {}", ticket_id)))?;

        let err = match self
            .state_machine
            .transition(&current, &TicketEvent::Completed(station))
        {
            Err(e) => e,
            Ok(_) => FlowError::Internal(format!(
                "ticket {} eligible for {} but not updated",
                current.code, station
            )),
        };
        warn!("Rejected completion of ticket {} at {}: {}", current.code, station, err);
        Err(err)
    }

    /// 调整等待中票的优先级
    pub async fn set_priority(
        &self,
        pass: &StationPass,
        ticket_id: TicketId,
        priority: Priority,
    ) -> Result<Ticket> {
        self.access.authorize_any(pass).await?;

        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);

        match queries.set_ticket_priority(ticket_id, priority).await? {
            Some(ticket) => {
                tx.commit().await?;
                info!("Ticket {} priority set to {:?} by {}", ticket.code, priority, pass.station());
                Ok(ticket)
            }
            None => match queries.get_ticket(ticket_id).await? {
                Some(ticket) => Err(FlowError::AlreadyDone(ticket.code)),
                None => Err(FlowError::NotFound(format!("ticket {}", ticket_id))),
            },
        }
    }

    /// 下一位：急诊优先，同优先级先到先得
    pub async fn next_waiting(&self) -> Result<Option<Ticket>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).next_waiting().await
    }

    /// 去向为指定站点的未完成票，按创建顺序
    pub async fn list_by_station(&self, station: Station) -> Result<Vec<Ticket>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).tickets_for_destination(station).await
    }

    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn)
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("ticket {}", ticket_id)))
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Ticket> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn)
            .get_ticket_by_code(code)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("ticket {}", code)))
    }

    pub async fn active_ticket_for(&self, patient_id: PatientId) -> Result<Option<Ticket>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).active_ticket_for_patient(patient_id).await
    }

    pub async fn last_completed(&self) -> Result<Option<Ticket>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).last_completed().await
    }

    pub async fn all_tickets(&self) -> Result<Vec<Ticket>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).all_tickets().await
    }

    /// 条件更新未命中时，区分患者不存在、没有等待票和位置不符
    async fn explain_patient_rejection(
        &self,
        queries: &mut Queries<'_>,
        patient_id: PatientId,
        event: &TicketEvent,
    ) -> FlowError {
        let err = match queries.get_patient(patient_id).await {
            Err(e) => e,
            Ok(None) => FlowError::NotFound(format!("patient {}", patient_id)),
            Ok(Some(_)) => match queries.active_ticket_for_patient(patient_id).await {
                Err(e) => e,
                Ok(None) => FlowError::NoActiveTicket(format!("patient {}", patient_id)),
                Ok(Some(ticket)) => match self.state_machine.transition(&ticket, event) {
                    Err(e) => e,
                    Ok(_) => FlowError::Internal(format!(
                        "ticket {} eligible for {:?} but not updated",
                        ticket.code, event
                    )),
                },
            },
        };

        warn!("Rejected {:?} for patient {}: {}", event, patient_id, err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PatientRegistry;
    use qflow_core::{NewPatient, PatientName, TicketStatus};
    use std::collections::HashSet;

    struct Fixture {
        registry: PatientRegistry,
        queue: TicketQueue,
        access: Arc<StationAccess>,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let access = Arc::new(StationAccess::default());
        Fixture {
            registry: PatientRegistry::new(db.clone(), 50),
            queue: TicketQueue::new(db, access.clone(), "T"),
            access,
        }
    }

    async fn patient(f: &Fixture, first: &str) -> PatientId {
        let name = PatientName::new(first, None, Some("Test")).unwrap();
        f.registry
            .register(NewPatient::new(name, 30, None).unwrap())
            .await
            .unwrap()
            .id
    }

    async fn pass(f: &Fixture, station: Station) -> StationPass {
        let password = StationAccess::default_credentials()[&station].clone();
        f.access.login(station, &password).await.unwrap()
    }

    fn vitals() -> Vitals {
        Vitals::new(60.0, 165.0, "120/80").unwrap()
    }

    #[tokio::test]
    async fn test_issue_ticket_defaults() {
        let f = fixture().await;
        let pid = patient(&f, "Jane").await;

        let ticket = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
        assert_eq!(ticket.location, Station::Entry);
        assert_eq!(ticket.destination, Station::Triage);
        assert_eq!(ticket.status, TicketStatus::Waiting);
        assert!(ticket.completed_at.is_none());
        assert!(ticket.code.starts_with('T'));
    }

    #[tokio::test]
    async fn test_issue_ticket_unknown_patient() {
        let f = fixture().await;
        assert!(matches!(
            f.queue.issue_ticket(404, Priority::Normal).await,
            Err(FlowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_one_active_ticket_per_patient() {
        let f = fixture().await;
        let pid = patient(&f, "Jane").await;

        f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
        assert!(matches!(
            f.queue.issue_ticket(pid, Priority::Normal).await,
            Err(FlowError::DuplicateActiveTicket(_))
        ));
    }

    #[tokio::test]
    async fn test_rapid_issue_yields_distinct_codes() {
        let f = fixture().await;
        let mut codes = HashSet::new();

        for i in 0..40 {
            let pid = patient(&f, &format!("P{}", i)).await;
            let ticket = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
            codes.insert(ticket.code);
        }

        assert_eq!(codes.len(), 40);
    }

    #[tokio::test]
    async fn test_triage_requires_active_ticket() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;
        let pid = patient(&f, "Jane").await;

        assert!(matches!(
            f.queue.record_triage(&triage, pid, &vitals()).await,
            Err(FlowError::NoActiveTicket(_))
        ));
        assert!(matches!(
            f.queue.record_triage(&triage, 999, &vitals()).await,
            Err(FlowError::NotFound(_))
        ));
        // 体征未写入
        assert!(f.registry.get(pid).await.unwrap().vitals.is_none());
    }

    #[tokio::test]
    async fn test_triage_rejects_malformed_vitals() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;
        let pid = patient(&f, "Jane").await;
        let ticket = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();

        let bad = Vitals {
            weight_kg: 60.0,
            height_cm: 9999.0,
            blood_pressure: "120/80".to_string(),
        };
        match f.queue.record_triage(&triage, pid, &bad).await {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "height"),
            other => panic!("unexpected: {:?}", other),
        }

        // 票仍在入口，体征未写入
        let unchanged = f.queue.get_ticket(ticket.id).await.unwrap();
        assert_eq!(unchanged.location, Station::Entry);
        assert!(f.registry.get(pid).await.unwrap().vitals.is_none());
    }

    #[tokio::test]
    async fn test_station_pass_is_checked() {
        let f = fixture().await;
        let doctor = pass(&f, Station::Doctor).await;
        let pid = patient(&f, "Jane").await;
        f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();

        assert!(matches!(
            f.queue.record_triage(&doctor, pid, &vitals()).await,
            Err(FlowError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_doctor_rejects_invalid_destination() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;
        let doctor = pass(&f, Station::Doctor).await;
        let pid = patient(&f, "Jane").await;
        let issued = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
        f.queue.record_triage(&triage, pid, &vitals()).await.unwrap();

        for bad in [Station::Triage, Station::Entry, Station::Doctor] {
            assert!(matches!(
                f.queue.record_doctor_decision(&doctor, pid, "flu", bad).await,
                Err(FlowError::InvalidDestination(_))
            ));
        }

        let ticket = f.queue.get_ticket(issued.id).await.unwrap();
        assert_eq!(ticket.location, Station::Triage);
        assert_eq!(ticket.destination, Station::Doctor);
        assert!(f.registry.get(pid).await.unwrap().condition.is_none());
    }

    #[tokio::test]
    async fn test_doctor_before_triage_is_rejected() {
        let f = fixture().await;
        let doctor = pass(&f, Station::Doctor).await;
        let pid = patient(&f, "Jane").await;
        f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();

        assert!(matches!(
            f.queue.record_doctor_decision(&doctor, pid, "flu", Station::Lab).await,
            Err(FlowError::NoActiveTicket(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_station_cannot_complete() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;
        let doctor = pass(&f, Station::Doctor).await;
        let lab = pass(&f, Station::Lab).await;
        let pid = patient(&f, "Jane").await;
        let ticket = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
        f.queue.record_triage(&triage, pid, &vitals()).await.unwrap();
        f.queue
            .record_doctor_decision(&doctor, pid, "flu", Station::Pharmacy)
            .await
            .unwrap();

        assert!(matches!(
            f.queue.complete_station(&lab, ticket.id, Station::Lab).await,
            Err(FlowError::StationMismatch { expected: Station::Pharmacy, actual: Station::Lab, .. })
        ));
        assert!(f.queue.get_ticket(ticket.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_concurrent_completion_has_one_winner() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;
        let doctor = pass(&f, Station::Doctor).await;
        let payment_a = pass(&f, Station::Payment).await;
        let payment_b = pass(&f, Station::Payment).await;
        let pid = patient(&f, "Jane").await;
        let ticket = f.queue.issue_ticket(pid, Priority::Normal).await.unwrap();
        f.queue.record_triage(&triage, pid, &vitals()).await.unwrap();
        f.queue
            .record_doctor_decision(&doctor, pid, "fracture", Station::Payment)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            f.queue.complete_station(&payment_a, ticket.id, Station::Payment),
            f.queue.complete_station(&payment_b, ticket.id, Station::Payment),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(FlowError::AlreadyDone(_))))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let f = fixture().await;
        let triage = pass(&f, Station::Triage).await;

        let a = f.queue.issue_ticket(patient(&f, "A").await, Priority::Normal).await.unwrap();
        let b = f.queue.issue_ticket(patient(&f, "B").await, Priority::Normal).await.unwrap();
        let c = f.queue.issue_ticket(patient(&f, "C").await, Priority::Normal).await.unwrap();

        assert_eq!(f.queue.next_waiting().await.unwrap().unwrap().id, a.id);

        f.queue.set_priority(&triage, b.id, Priority::Emergency).await.unwrap();
        assert_eq!(f.queue.next_waiting().await.unwrap().unwrap().id, b.id);

        let station = f.queue.list_by_station(Station::Triage).await.unwrap();
        let ids: Vec<_> = station.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[tokio::test]
    async fn test_find_by_code_and_active_ticket() {
        let f = fixture().await;
        let pid = patient(&f, "Jane").await;
        let ticket = f.queue.issue_ticket(pid, Priority::Emergency).await.unwrap();

        let found = f.queue.find_by_code(&ticket.code.to_lowercase()).await.unwrap();
        assert_eq!(found.id, ticket.id);
        assert_eq!(found.priority, Priority::Emergency);

        let active = f.queue.active_ticket_for(pid).await.unwrap().unwrap();
        assert_eq!(active.id, ticket.id);
        assert!(matches!(f.queue.find_by_code("T99999").await, Err(FlowError::NotFound(_))));
    }
}
