//! 数据库查询操作

use crate::models::{DbPatient, DbTicket};
use chrono::{DateTime, Utc};
use qflow_core::{
    FlowError, NewPatient, Patient, PatientId, PatientUpdate, Priority, Result, Station, Ticket,
    TicketId, TicketStatus, Vitals,
};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

/// 数据库查询操作接口
///
/// 绑定到一个连接或已开启的事务上，调用方负责提交。
pub struct Queries<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> Queries<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    // ========== 患者相关操作 ==========

    /// 创建新患者
    pub async fn insert_patient(&mut self, patient: &NewPatient, now: DateTime<Utc>) -> Result<Patient> {
        let row = sqlx::query_as::<_, DbPatient>(
            r#"
            INSERT INTO patients (first_name, middle_name, surname, age, gender, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
        "#,
        )
        .bind(&patient.name.first)
        .bind(patient.name.middle.as_deref())
        .bind(patient.name.surname.as_deref())
        .bind(i64::from(patient.age))
        .bind(patient.gender.map(|g| g.as_str()))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.conn)
        .await?;

        Patient::try_from(row)
    }

    /// 根据ID查找患者
    pub async fn get_patient(&mut self, id: PatientId) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    /// 全量更新患者，返回更新后的记录；患者不存在时返回 None
    pub async fn update_patient(
        &mut self,
        id: PatientId,
        update: &PatientUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Patient>> {
        let vitals = update.vitals.as_ref();

        sqlx::query_as::<_, DbPatient>(
            r#"
            UPDATE patients
            SET first_name = ?, middle_name = ?, surname = ?, age = ?, gender = ?,
                weight = ?, height = ?, bp = ?, condition = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
        "#,
        )
        .bind(&update.name.first)
        .bind(update.name.middle.as_deref())
        .bind(update.name.surname.as_deref())
        .bind(i64::from(update.age))
        .bind(update.gender.map(|g| g.as_str()))
        .bind(vitals.map(|v| v.weight_kg))
        .bind(vitals.map(|v| v.height_cm))
        .bind(vitals.map(|v| v.blood_pressure.as_str()))
        .bind(update.condition.as_deref())
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    /// 写入分诊体征
    pub async fn update_vitals(
        &mut self,
        id: PatientId,
        vitals: &Vitals,
        now: DateTime<Utc>,
    ) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>(
            "UPDATE patients SET weight = ?, height = ?, bp = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(vitals.weight_kg)
        .bind(vitals.height_cm)
        .bind(&vitals.blood_pressure)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    /// 写入诊断
    pub async fn update_condition(
        &mut self,
        id: PatientId,
        condition: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>(
            "UPDATE patients SET condition = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(condition)
        .bind(now)
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    /// 按名和姓精确查找（忽略大小写），取最早登记的一位
    pub async fn find_patient_by_name(
        &mut self,
        first: &str,
        surname: &str,
    ) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT * FROM patients
            WHERE lower(first_name) = lower(?) AND lower(COALESCE(surname, '')) = lower(?)
            ORDER BY id
            LIMIT 1
        "#,
        )
        .bind(first.trim())
        .bind(surname.trim())
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    /// 批量导入时按 (名, 姓, 年龄) 匹配已有患者
    pub async fn find_patient_by_identity(
        &mut self,
        first: &str,
        surname: Option<&str>,
        age: u8,
    ) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT * FROM patients
            WHERE lower(first_name) = lower(?)
              AND lower(COALESCE(surname, '')) = lower(?)
              AND age = ?
            ORDER BY id
            LIMIT 1
        "#,
        )
        .bind(first)
        .bind(surname.unwrap_or(""))
        .bind(i64::from(age))
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Patient::try_from)
        .transpose()
    }

    /// 按姓名片段或票号搜索患者（忽略大小写）
    pub async fn search_patients(&mut self, term: &str, limit: i64) -> Result<Vec<Patient>> {
        let pattern = format!("%{}%", escape_like(&term.trim().to_lowercase()));

        let rows = sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT * FROM patients p
            WHERE lower(p.first_name) LIKE ? ESCAPE '\'
               OR lower(COALESCE(p.middle_name, '')) LIKE ? ESCAPE '\'
               OR lower(COALESCE(p.surname, '')) LIKE ? ESCAPE '\'
               OR EXISTS (
                   SELECT 1 FROM tickets t
                   WHERE t.patient_id = p.id AND lower(COALESCE(t.code, '')) LIKE ? ESCAPE '\'
               )
            ORDER BY p.id
            LIMIT ?
        "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Patient::try_from).collect()
    }

    pub async fn list_patients(&mut self, limit: i64, offset: i64) -> Result<Vec<Patient>> {
        let rows = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Patient::try_from).collect()
    }

    // ========== 排队票相关操作 ==========

    /// 为已存在的患者插入一张入口排队票，返回新票序号
    ///
    /// 患者不存在时返回 None；患者已有等待中的票时返回 DuplicateActiveTicket。
    pub async fn insert_ticket(
        &mut self,
        patient_id: PatientId,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Option<TicketId>> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO tickets (patient_id, priority, location, destination, status, created_at)
            SELECT ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM patients WHERE id = ?)
            RETURNING id
        "#,
        )
        .bind(patient_id)
        .bind(priority.as_i64())
        .bind(Station::Entry.as_str())
        .bind(Station::Triage.as_str())
        .bind(TicketStatus::Waiting.as_str())
        .bind(now)
        .bind(patient_id)
        .fetch_optional(&mut *self.conn)
        .await;

        match inserted {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                FlowError::DuplicateActiveTicket(format!("patient {}", patient_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入票号
    pub async fn assign_ticket_code(&mut self, id: TicketId, code: &str) -> Result<Ticket> {
        let row = sqlx::query_as::<_, DbTicket>("UPDATE tickets SET code = ? WHERE id = ? RETURNING *")
            .bind(code)
            .bind(id)
            .fetch_one(&mut *self.conn)
            .await?;

        Ticket::try_from(row)
    }

    pub async fn get_ticket(&mut self, id: TicketId) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>("SELECT * FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    pub async fn get_ticket_by_code(&mut self, code: &str) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>("SELECT * FROM tickets WHERE lower(code) = lower(?)")
            .bind(code.trim())
            .fetch_optional(&mut *self.conn)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    /// 患者当前等待中的票
    pub async fn active_ticket_for_patient(&mut self, patient_id: PatientId) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>("SELECT * FROM tickets WHERE patient_id = ? AND status = ?")
            .bind(patient_id)
            .bind(TicketStatus::Waiting.as_str())
            .fetch_optional(&mut *self.conn)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    /// 条件推进：仅当患者的等待票位于 `from` 之一时更新位置和去向
    ///
    /// 先写后读，条件不满足时返回 None，不做任何修改。
    pub async fn advance_active_ticket(
        &mut self,
        patient_id: PatientId,
        from: &[Station],
        location: Station,
        destination: Station,
    ) -> Result<Option<Ticket>> {
        if from.is_empty() {
            return Ok(None);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE tickets SET location = ");
        builder
            .push_bind(location.as_str())
            .push(", destination = ")
            .push_bind(destination.as_str())
            .push(" WHERE patient_id = ")
            .push_bind(patient_id)
            .push(" AND status = ")
            .push_bind(TicketStatus::Waiting.as_str())
            .push(" AND location IN (");

        let mut stations = builder.separated(", ");
        for station in from {
            stations.push_bind(station.as_str());
        }
        stations.push_unseparated(") RETURNING *");

        builder
            .build_query_as::<DbTicket>()
            .fetch_optional(&mut *self.conn)
            .await?
            .map(Ticket::try_from)
            .transpose()
    }

    /// 比较并交换式完成：仅当票仍在等待且去向为 `station` 时结束
    pub async fn complete_ticket(
        &mut self,
        id: TicketId,
        station: Station,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>(
            r#"
            UPDATE tickets
            SET location = ?, status = ?, completed_at = ?
            WHERE id = ? AND status = ? AND destination = ?
            RETURNING *
        "#,
        )
        .bind(station.as_str())
        .bind(TicketStatus::Done.as_str())
        .bind(now)
        .bind(id)
        .bind(TicketStatus::Waiting.as_str())
        .bind(station.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    /// 调整等待中票的优先级
    pub async fn set_ticket_priority(&mut self, id: TicketId, priority: Priority) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>(
            "UPDATE tickets SET priority = ? WHERE id = ? AND status = ? RETURNING *",
        )
        .bind(priority.as_i64())
        .bind(id)
        .bind(TicketStatus::Waiting.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    /// 下一张等待票：急诊优先，同优先级按序号
    pub async fn next_waiting(&mut self) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>(
            "SELECT * FROM tickets WHERE status = ? ORDER BY priority DESC, id ASC LIMIT 1",
        )
        .bind(TicketStatus::Waiting.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    /// 去向为某站点的全部未完成票，按序号升序
    pub async fn tickets_for_destination(&mut self, station: Station) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, DbTicket>(
            "SELECT * FROM tickets WHERE destination = ? AND status <> ? ORDER BY id ASC",
        )
        .bind(station.as_str())
        .bind(TicketStatus::Done.as_str())
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }

    /// 最近完成的票
    pub async fn last_completed(&mut self) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, DbTicket>(
            "SELECT * FROM tickets WHERE status = ? ORDER BY completed_at DESC, id DESC LIMIT 1",
        )
        .bind(TicketStatus::Done.as_str())
        .fetch_optional(&mut *self.conn)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    pub async fn all_tickets(&mut self) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, DbTicket>("SELECT * FROM tickets ORDER BY id ASC")
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use qflow_core::PatientName;

    fn jane() -> NewPatient {
        NewPatient::new(PatientName::new("Jane", None, Some("Doe")).unwrap(), 30, None).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_fetch_patient() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut queries = Queries::new(&mut conn);

        let patient = queries.insert_patient(&jane(), Utc::now()).await.unwrap();
        let fetched = queries.get_patient(patient.id).await.unwrap().unwrap();
        assert_eq!(fetched.name.full_name(), "Jane Doe");
        assert!(queries.get_patient(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ticket_for_unknown_patient() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut queries = Queries::new(&mut conn);

        let id = queries.insert_ticket(42, Priority::Normal, Utc::now()).await.unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_second_waiting_ticket_rejected() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut queries = Queries::new(&mut conn);

        let patient = queries.insert_patient(&jane(), Utc::now()).await.unwrap();
        queries
            .insert_ticket(patient.id, Priority::Normal, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let second = queries.insert_ticket(patient.id, Priority::Normal, Utc::now()).await;
        assert!(matches!(second, Err(FlowError::DuplicateActiveTicket(_))));
    }

    #[tokio::test]
    async fn test_complete_ticket_is_compare_and_swap() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut queries = Queries::new(&mut conn);

        let patient = queries.insert_patient(&jane(), Utc::now()).await.unwrap();
        let id = queries
            .insert_ticket(patient.id, Priority::Normal, Utc::now())
            .await
            .unwrap()
            .unwrap();
        queries.assign_ticket_code(id, "T00001").await.unwrap();

        // 去向仍是分诊，药房无法结束
        assert!(queries
            .complete_ticket(id, Station::Pharmacy, Utc::now())
            .await
            .unwrap()
            .is_none());

        let routed = queries
            .advance_active_ticket(patient.id, &[Station::Entry], Station::Doctor, Station::Pharmacy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.destination, Station::Pharmacy);

        let done = queries
            .complete_ticket(id, Station::Pharmacy, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TicketStatus::Done);
        assert!(done.completed_at.is_some());

        assert!(queries
            .complete_ticket(id, Station::Pharmacy, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
