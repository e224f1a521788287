//! 核心数据模型定义

use crate::error::{FlowError, Result};
use crate::utils::{is_valid_blood_pressure, split_full_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PatientId = i64;
pub type TicketId = i64;

/// 年龄上限（含）
pub const MAX_AGE: u8 = 120;

/// 患者姓名：名必填，中间名和姓可选
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientName {
    pub first: String,
    pub middle: Option<String>,
    pub surname: Option<String>,
}

impl PatientName {
    pub fn new(first: &str, middle: Option<&str>, surname: Option<&str>) -> Result<Self> {
        let first = first.trim();
        if first.is_empty() {
            return Err(FlowError::invalid("first_name", "first name is required"));
        }

        Ok(Self {
            first: first.to_string(),
            middle: non_blank(middle),
            surname: non_blank(surname),
        })
    }

    /// 校验名非空；反序列化得到的姓名不经过 `new`
    pub fn validate(&self) -> Result<()> {
        if self.first.trim().is_empty() {
            return Err(FlowError::invalid("first_name", "first name is required"));
        }
        Ok(())
    }

    /// 按空白拆分完整姓名
    pub fn from_full_name(full: &str) -> Result<Self> {
        let (first, middle, surname) = split_full_name(full);
        Self::new(&first, Some(&middle), Some(&surname))
            .map_err(|_| FlowError::invalid("name", "name is empty"))
    }

    pub fn full_name(&self) -> String {
        [Some(self.first.as_str()), self.middle.as_deref(), self.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PatientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 性别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl FromStr for Gender {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "other" | "o" => Ok(Gender::Other),
            other => Err(FlowError::invalid(
                "gender",
                format!("unrecognised gender '{}'", other),
            )),
        }
    }
}

/// 分诊体征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub blood_pressure: String,
}

impl Vitals {
    pub fn new(weight_kg: f64, height_cm: f64, blood_pressure: &str) -> Result<Self> {
        let vitals = Self {
            weight_kg,
            height_cm,
            blood_pressure: blood_pressure.trim().to_string(),
        };
        vitals.validate()?;
        Ok(vitals)
    }

    /// 体重 (0, 500] kg，身高 (0, 300] cm，血压形如 120/80
    pub fn validate(&self) -> Result<()> {
        if !(self.weight_kg > 0.0 && self.weight_kg <= 500.0) {
            return Err(FlowError::invalid(
                "weight",
                format!("weight {} kg out of range", self.weight_kg),
            ));
        }
        if !(self.height_cm > 0.0 && self.height_cm <= 300.0) {
            return Err(FlowError::invalid(
                "height",
                format!("height {} cm out of range", self.height_cm),
            ));
        }
        if !is_valid_blood_pressure(&self.blood_pressure) {
            return Err(FlowError::invalid(
                "bp",
                format!(
                    "blood pressure '{}' is not systolic/diastolic",
                    self.blood_pressure
                ),
            ));
        }
        Ok(())
    }
}

/// 患者记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: PatientName,
    pub age: u8,
    pub gender: Option<Gender>,
    /// 分诊后填写
    pub vitals: Option<Vitals>,
    /// 医生诊断后填写
    pub condition: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 挂号登记信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: PatientName,
    pub age: u8,
    pub gender: Option<Gender>,
}

impl NewPatient {
    pub fn new(name: PatientName, age: u8, gender: Option<Gender>) -> Result<Self> {
        let patient = Self { name, age, gender };
        patient.validate()?;
        Ok(patient)
    }

    pub fn validate(&self) -> Result<()> {
        self.name.validate()?;
        validate_age(self.age)
    }
}

/// 患者全量更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub name: PatientName,
    pub age: u8,
    pub gender: Option<Gender>,
    pub vitals: Option<Vitals>,
    pub condition: Option<String>,
}

impl PatientUpdate {
    pub fn validate(&self) -> Result<()> {
        self.name.validate()?;
        validate_age(self.age)?;
        if let Some(vitals) = &self.vitals {
            vitals.validate()?;
        }
        Ok(())
    }
}

impl From<&Patient> for PatientUpdate {
    fn from(patient: &Patient) -> Self {
        Self {
            name: patient.name.clone(),
            age: patient.age,
            gender: patient.gender,
            vitals: patient.vitals.clone(),
            condition: patient.condition.clone(),
        }
    }
}

/// 外部输入的整数年龄，负数或超出上限都按年龄字段报错
pub fn age_from_i64(value: i64) -> Result<u8> {
    let age = u8::try_from(value).map_err(|_| {
        FlowError::invalid("age", format!("age {} outside 0..={}", value, MAX_AGE))
    })?;
    validate_age(age)?;
    Ok(age)
}

pub fn validate_age(age: u8) -> Result<()> {
    if age > MAX_AGE {
        return Err(FlowError::invalid(
            "age",
            format!("age {} outside 0..={}", age, MAX_AGE),
        ));
    }
    Ok(())
}

/// 流程站点
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Station {
    Entry,
    Triage,
    Doctor,
    Pharmacy,
    Lab,
    Payment,
}

impl Station {
    pub const ALL: [Station; 6] = [
        Station::Entry,
        Station::Triage,
        Station::Doctor,
        Station::Pharmacy,
        Station::Lab,
        Station::Payment,
    ];

    /// 医生可分派、且可结束排队票的站点
    pub const TERMINAL: [Station; 3] = [Station::Pharmacy, Station::Lab, Station::Payment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Station::Entry => "ENTRY",
            Station::Triage => "TRIAGE",
            Station::Doctor => "DOCTOR",
            Station::Pharmacy => "PHARMACY",
            Station::Lab => "LAB",
            Station::Payment => "PAYMENT",
        }
    }

    /// 候诊大屏上显示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Station::Entry => "Entry",
            Station::Triage => "Triage",
            Station::Doctor => "Consultation",
            Station::Pharmacy => "Pharmacy",
            Station::Lab => "Lab",
            Station::Payment => "Payment",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Station {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTRY" => Ok(Station::Entry),
            "TRIAGE" => Ok(Station::Triage),
            "DOCTOR" | "CONSULTATION" => Ok(Station::Doctor),
            "PHARMACY" => Ok(Station::Pharmacy),
            "LAB" => Ok(Station::Lab),
            "PAYMENT" => Ok(Station::Payment),
            other => Err(FlowError::invalid(
                "station",
                format!("unknown station '{}'", other),
            )),
        }
    }
}

/// 排队票状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    Waiting,
    Done,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "WAITING",
            TicketStatus::Done => "DONE",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" => Ok(TicketStatus::Waiting),
            "DONE" => Ok(TicketStatus::Done),
            other => Err(FlowError::invalid(
                "status",
                format!("unknown ticket status '{}'", other),
            )),
        }
    }
}

/// 排队优先级，急诊排在普通之前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    #[default]
    Normal,
    Emergency,
}

impl Priority {
    pub fn as_i64(&self) -> i64 {
        match self {
            Priority::Normal => 0,
            Priority::Emergency => 1,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::Emergency),
            other => Err(FlowError::invalid(
                "priority",
                format!("unknown priority {}", other),
            )),
        }
    }
}

/// 排队票：患者一次就诊在流程中的实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub patient_id: PatientId,
    pub code: String,
    pub priority: Priority,
    pub location: Station,
    pub destination: Station,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    /// 仅在 status = Done 时存在
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_active(&self) -> bool {
        self.status == TicketStatus::Waiting
    }

    /// 等待时长（分钟），仅对已完成的票有意义
    pub fn wait_minutes(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_seconds() as f64 / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_name_requires_first() {
        assert!(PatientName::new("  ", None, Some("Doe")).is_err());

        let name = PatientName::new(" Jane ", Some(""), Some("Doe")).unwrap();
        assert_eq!(name.first, "Jane");
        assert_eq!(name.middle, None);
        assert_eq!(name.full_name(), "Jane Doe");
    }

    #[test]
    fn test_patient_name_from_full_name() {
        let name = PatientName::from_full_name("Mary Ann Wanjiru Kamau").unwrap();
        assert_eq!(name.first, "Mary");
        assert_eq!(name.middle.as_deref(), Some("Ann Wanjiru"));
        assert_eq!(name.surname.as_deref(), Some("Kamau"));

        match PatientName::from_full_name("   ") {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "name"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_age_range() {
        let name = PatientName::new("Jane", None, None).unwrap();
        assert!(NewPatient::new(name.clone(), 0, None).is_ok());
        assert!(NewPatient::new(name.clone(), 120, None).is_ok());
        assert!(NewPatient::new(name, 121, None).is_err());

        assert_eq!(age_from_i64(42).unwrap(), 42);
        for value in [-1, 121, 300] {
            match age_from_i64(value) {
                Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "age"),
                other => panic!("unexpected for {}: {:?}", value, other),
            }
        }
    }

    #[test]
    fn test_vitals_validation() {
        assert!(Vitals::new(60.0, 165.0, "120/80").is_ok());
        assert!(Vitals::new(0.0, 165.0, "120/80").is_err());
        assert!(Vitals::new(60.0, 165.0, "high").is_err());

        match Vitals::new(60.0, 0.0, "120/80") {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "height"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_deserialized_values_are_revalidated() {
        let blank = NewPatient {
            name: PatientName {
                first: "   ".to_string(),
                middle: None,
                surname: Some("Doe".to_string()),
            },
            age: 30,
            gender: None,
        };
        match blank.validate() {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "first_name"),
            other => panic!("unexpected: {:?}", other),
        }

        let vitals: Vitals = serde_json::from_str(
            r#"{"weight_kg": -5.0, "height_cm": 170.0, "blood_pressure": "120/80"}"#,
        )
        .unwrap();
        match vitals.validate() {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "weight"),
            other => panic!("unexpected: {:?}", other),
        }

        let update = PatientUpdate {
            name: PatientName::new("Jane", None, None).unwrap(),
            age: 30,
            gender: None,
            vitals: Some(Vitals {
                weight_kg: 60.0,
                height_cm: 165.0,
                blood_pressure: "high".to_string(),
            }),
            condition: None,
        };
        match update.validate() {
            Err(FlowError::InvalidInput { field, .. }) => assert_eq!(field, "bp"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_station_parsing() {
        assert_eq!("pharmacy".parse::<Station>().unwrap(), Station::Pharmacy);
        assert_eq!("Consultation".parse::<Station>().unwrap(), Station::Doctor);
        assert!("radiology".parse::<Station>().is_err());
        assert!(Station::Lab.is_terminal());
        assert!(!Station::Doctor.is_terminal());
    }

    #[test]
    fn test_gender_parsing() {
        assert_eq!("F".parse::<Gender>().unwrap(), Gender::Female);
        assert!("unknown".parse::<Gender>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Emergency > Priority::Normal);
        assert_eq!(Priority::from_i64(1).unwrap(), Priority::Emergency);
        assert!(Priority::from_i64(7).is_err());
    }
}
