//! 数据库模型

use chrono::{DateTime, Utc};
use qflow_core::{
    FlowError, Gender, Patient, PatientName, Priority, Result, Station, Ticket, TicketStatus,
    Vitals,
};
use sqlx::FromRow;

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: i64,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub surname: Option<String>,
    pub age: i64,
    pub gender: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub bp: Option<String>,
    pub condition: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPatient> for Patient {
    type Error = FlowError;

    fn try_from(row: DbPatient) -> Result<Self> {
        let age = u8::try_from(row.age)
            .map_err(|_| FlowError::Database(format!("patient {} has age {}", row.id, row.age)))?;

        let gender = row
            .gender
            .as_deref()
            .filter(|g| !g.is_empty())
            .map(str::parse::<Gender>)
            .transpose()
            .map_err(|e| FlowError::Database(format!("patient {}: {}", row.id, e)))?;

        // 体征三项齐全才视为已分诊
        let vitals = match (row.weight, row.height, row.bp) {
            (Some(weight_kg), Some(height_cm), Some(blood_pressure)) => Some(Vitals {
                weight_kg,
                height_cm,
                blood_pressure,
            }),
            _ => None,
        };

        Ok(Patient {
            id: row.id,
            name: PatientName {
                first: row.first_name,
                middle: row.middle_name,
                surname: row.surname,
            },
            age,
            gender,
            vitals,
            condition: row.condition,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 数据库排队票表
#[derive(Debug, FromRow)]
pub struct DbTicket {
    pub id: i64,
    pub patient_id: i64,
    pub code: Option<String>,
    pub priority: i64,
    pub location: String,
    pub destination: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTicket> for Ticket {
    type Error = FlowError;

    fn try_from(row: DbTicket) -> Result<Self> {
        let corrupt = |e: FlowError| FlowError::Database(format!("ticket {}: {}", row.id, e));

        let code = row
            .code
            .clone()
            .ok_or_else(|| FlowError::Database(format!("ticket {} has no code", row.id)))?;
        let status: TicketStatus = row.status.parse().map_err(corrupt)?;
        let location: Station = row.location.parse().map_err(corrupt)?;
        let destination: Station = row.destination.parse().map_err(corrupt)?;
        let priority = Priority::from_i64(row.priority).map_err(corrupt)?;

        Ok(Ticket {
            id: row.id,
            patient_id: row.patient_id,
            code,
            priority,
            location,
            destination,
            status,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}
