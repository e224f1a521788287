//! 候诊大屏
//!
//! 只读地轮询队列头部，队首变化时播报一次。语音合成不在此实现，
//! 默认的 [`LogAnnouncer`] 只写日志。

use crate::queue::TicketQueue;
use crate::registry::PatientRegistry;
use async_trait::async_trait;
use qflow_core::{Result, Station, Ticket, TicketId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// 大屏显示与播报内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub ticket_id: TicketId,
    pub ticket_code: String,
    pub patient_name: String,
    pub destination: Station,
}

impl Announcement {
    /// 播报文本
    pub fn text(&self) -> String {
        format!(
            "Now serving ticket number {}, {}. Please proceed to {}.",
            self.ticket_code,
            self.patient_name,
            self.destination.display_name()
        )
    }
}

/// 播报器
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, announcement: &Announcement) -> Result<()>;
}

/// 写日志的播报器
#[derive(Debug, Default)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn announce(&self, announcement: &Announcement) -> Result<()> {
        info!("{}", announcement.text());
        Ok(())
    }
}

/// 候诊大屏数据源
pub struct DisplayFeed {
    queue: TicketQueue,
    registry: PatientRegistry,
    announcer: Arc<dyn Announcer>,
    last_announced: Mutex<Option<TicketId>>,
}

impl DisplayFeed {
    pub fn new(queue: TicketQueue, registry: PatientRegistry, announcer: Arc<dyn Announcer>) -> Self {
        Self {
            queue,
            registry,
            announcer,
            last_announced: Mutex::new(None),
        }
    }

    /// 当前叫号：下一张等待票
    pub async fn now_serving(&self) -> Result<Option<Announcement>> {
        match self.queue.next_waiting().await? {
            Some(ticket) => self.describe(ticket).await.map(Some),
            None => Ok(None),
        }
    }

    /// 最近办结的票
    pub async fn last_completed(&self) -> Result<Option<Announcement>> {
        match self.queue.last_completed().await? {
            Some(ticket) => self.describe(ticket).await.map(Some),
            None => Ok(None),
        }
    }

    /// 轮询一次，队首变化时播报并返回播报内容
    pub async fn poll(&self) -> Result<Option<Announcement>> {
        let current = self.now_serving().await?;
        let mut last = self.last_announced.lock().await;

        match current {
            Some(announcement) if *last != Some(announcement.ticket_id) => {
                self.announcer.announce(&announcement).await?;
                *last = Some(announcement.ticket_id);
                Ok(Some(announcement))
            }
            Some(_) => Ok(None),
            None => {
                *last = None;
                Ok(None)
            }
        }
    }

    /// 按固定间隔轮询，直到收到关闭信号
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Display feed polling every {:?}", period);
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!("Display feed poll failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Display feed stopped");
    }

    async fn describe(&self, ticket: Ticket) -> Result<Announcement> {
        let patient = self.registry.get(ticket.patient_id).await?;
        debug!("Display resolved ticket {} to patient {}", ticket.code, patient.id);

        Ok(Announcement {
            ticket_id: ticket.id,
            ticket_code: ticket.code,
            patient_name: patient.name.full_name(),
            destination: ticket.destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StationAccess;
    use qflow_core::{NewPatient, PatientName, Priority, Vitals};
    use qflow_database::Database;

    #[derive(Default)]
    struct RecordingAnnouncer {
        texts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Announcer for RecordingAnnouncer {
        async fn announce(&self, announcement: &Announcement) -> Result<()> {
            self.texts.lock().unwrap().push(announcement.text());
            Ok(())
        }
    }

    struct Fixture {
        registry: PatientRegistry,
        queue: TicketQueue,
        access: Arc<StationAccess>,
        announcer: Arc<RecordingAnnouncer>,
        feed: DisplayFeed,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let access = Arc::new(StationAccess::default());
        let registry = PatientRegistry::new(db.clone(), 50);
        let queue = TicketQueue::new(db, access.clone(), "T");
        let announcer = Arc::new(RecordingAnnouncer::default());
        let feed = DisplayFeed::new(queue.clone(), registry.clone(), announcer.clone());
        Fixture { registry, queue, access, announcer, feed }
    }

    async fn check_in(f: &Fixture, first: &str, surname: &str) -> Ticket {
        let name = PatientName::new(first, None, Some(surname)).unwrap();
        let patient = f
            .registry
            .register(NewPatient::new(name, 30, None).unwrap())
            .await
            .unwrap();
        f.queue.issue_ticket(patient.id, Priority::Normal).await.unwrap()
    }

    #[test]
    fn test_announcement_text() {
        let announcement = Announcement {
            ticket_id: 1,
            ticket_code: "T00001".to_string(),
            patient_name: "Jane Doe".to_string(),
            destination: Station::Triage,
        };
        assert_eq!(
            announcement.text(),
            "Now serving ticket number T00001, Jane Doe. Please proceed to Triage."
        );
    }

    #[tokio::test]
    async fn test_now_serving_empty_queue() {
        let f = fixture().await;
        assert!(f.feed.now_serving().await.unwrap().is_none());
        assert!(f.feed.last_completed().await.unwrap().is_none());
        assert!(f.feed.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_announces_only_on_change() {
        let f = fixture().await;
        let first = check_in(&f, "Jane", "Doe").await;
        check_in(&f, "John", "Kamau").await;

        let announced = f.feed.poll().await.unwrap().unwrap();
        assert_eq!(announced.ticket_code, first.code);
        assert_eq!(announced.patient_name, "Jane Doe");
        assert!(f.feed.poll().await.unwrap().is_none());

        // 队首被急诊插队后再次播报
        let emergency = check_in(&f, "Akinyi", "Otieno").await;
        let pass = f.access.login(Station::Triage, "triage123").await.unwrap();
        f.queue.set_priority(&pass, emergency.id, Priority::Emergency).await.unwrap();

        let announced = f.feed.poll().await.unwrap().unwrap();
        assert_eq!(announced.ticket_id, emergency.id);
        assert_eq!(f.announcer.texts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_completed() {
        let f = fixture().await;
        let ticket = check_in(&f, "Jane", "Doe").await;
        let triage = f.access.login(Station::Triage, "triage123").await.unwrap();
        let doctor = f.access.login(Station::Doctor, "doctor123").await.unwrap();
        let lab = f.access.login(Station::Lab, "lab123").await.unwrap();

        let vitals = Vitals::new(60.0, 165.0, "120/80").unwrap();
        f.queue.record_triage(&triage, ticket.patient_id, &vitals).await.unwrap();
        f.queue
            .record_doctor_decision(&doctor, ticket.patient_id, "anaemia", Station::Lab)
            .await
            .unwrap();
        f.queue.complete_station(&lab, ticket.id, Station::Lab).await.unwrap();

        let done = f.feed.last_completed().await.unwrap().unwrap();
        assert_eq!(done.ticket_code, ticket.code);
        assert_eq!(done.destination, Station::Lab);
        assert!(f.feed.now_serving().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture().await;
        check_in(&f, "Jane", "Doe").await;
        let (tx, rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(f.feed.run(Duration::from_millis(10), rx), stopper);

        assert_eq!(f.announcer.texts.lock().unwrap().len(), 1);
    }
}
