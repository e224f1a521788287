//! 患者登记
//!
//! 患者身份与人口学、体征、诊断字段的唯一来源。

use crate::import::{ImportReport, ImportRow, ParsedRow};
use chrono::Utc;
use qflow_core::{
    FlowError, NewPatient, Patient, PatientId, PatientUpdate, Result, Vitals,
};
use qflow_database::{Database, Queries};
use tracing::{info, warn};

/// 患者登记服务
#[derive(Debug, Clone)]
pub struct PatientRegistry {
    db: Database,
    search_limit: i64,
}

impl PatientRegistry {
    pub fn new(db: Database, search_limit: i64) -> Self {
        Self { db, search_limit }
    }

    /// 登记新患者
    pub async fn register(&self, patient: NewPatient) -> Result<Patient> {
        // 反序列化得到的输入同样要校验
        patient.validate()?;

        let mut tx = self.db.begin().await?;
        let created = Queries::new(&mut tx).insert_patient(&patient, Utc::now()).await?;
        tx.commit().await?;

        info!("Registered patient {} ({})", created.id, created.name);
        Ok(created)
    }

    pub async fn get(&self, id: PatientId) -> Result<Patient> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn)
            .get_patient(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn update_vitals(&self, id: PatientId, vitals: &Vitals) -> Result<Patient> {
        vitals.validate()?;

        let mut tx = self.db.begin().await?;
        let updated = Queries::new(&mut tx)
            .update_vitals(id, vitals, Utc::now())
            .await?
            .ok_or_else(|| not_found(id))?;
        tx.commit().await?;

        info!("Updated vitals for patient {}", id);
        Ok(updated)
    }

    pub async fn update_condition(&self, id: PatientId, condition: &str) -> Result<Patient> {
        let condition = validate_condition(condition)?;

        let mut tx = self.db.begin().await?;
        let updated = Queries::new(&mut tx)
            .update_condition(id, condition, Utc::now())
            .await?
            .ok_or_else(|| not_found(id))?;
        tx.commit().await?;

        info!("Updated condition for patient {}", id);
        Ok(updated)
    }

    /// 全量更新
    pub async fn update(&self, id: PatientId, update: &PatientUpdate) -> Result<Patient> {
        update.validate()?;

        let mut tx = self.db.begin().await?;
        let updated = Queries::new(&mut tx)
            .update_patient(id, update, Utc::now())
            .await?
            .ok_or_else(|| not_found(id))?;
        tx.commit().await?;

        info!("Updated patient {}", id);
        Ok(updated)
    }

    pub async fn find_by_name(&self, first: &str, surname: &str) -> Result<Option<Patient>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).find_patient_by_name(first, surname).await
    }

    /// 按姓名片段或票号模糊搜索
    pub async fn search(&self, term: &str) -> Result<Vec<Patient>> {
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).search_patients(term, self.search_limit).await
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Patient>> {
        let mut conn = self.db.pool().acquire().await?;
        Queries::new(&mut conn).list_patients(limit, offset).await
    }

    /// 批量导入：逐行独立事务，单行失败只记入报告
    pub async fn bulk_import(&self, rows: &[ImportRow]) -> ImportReport {
        let mut report = ImportReport::default();

        for (index, row) in rows.iter().enumerate() {
            let line = index + 1;
            let outcome = match row.parse() {
                Ok(parsed) => self.import_row(&parsed).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(ImportOutcome::Created) => report.created += 1,
                Ok(ImportOutcome::Updated) => report.updated += 1,
                Err(e) => {
                    warn!("Import row {} rejected: {}", line, e);
                    report.reject(line, &e);
                }
            }
        }

        info!(
            "Import finished: {} created, {} updated, {} rejected",
            report.created,
            report.updated,
            report.rejected.len()
        );
        report
    }

    async fn import_row(&self, row: &ParsedRow) -> Result<ImportOutcome> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut queries = Queries::new(&mut tx);

        let existing = queries
            .find_patient_by_identity(&row.name.first, row.name.surname.as_deref(), row.age)
            .await?;

        let outcome = match existing {
            Some(patient) => {
                queries
                    .update_patient(patient.id, &row.merge_into(&patient), now)
                    .await?
                    .ok_or_else(|| not_found(patient.id))?;
                ImportOutcome::Updated
            }
            None => {
                let created = queries.insert_patient(&row.new_patient()?, now).await?;
                if row.has_clinical_fields() {
                    queries
                        .update_patient(created.id, &row.merge_into(&created), now)
                        .await?;
                }
                ImportOutcome::Created
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

enum ImportOutcome {
    Created,
    Updated,
}

fn not_found(id: PatientId) -> FlowError {
    FlowError::NotFound(format!("patient {}", id))
}

pub(crate) fn validate_condition(condition: &str) -> Result<&str> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err(FlowError::invalid("condition", "condition is required"));
    }
    Ok(condition)
}
