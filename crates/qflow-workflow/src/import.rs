//! 批量导入行解析与报告

use qflow_core::{
    age_from_i64, FlowError, Gender, NewPatient, Patient, PatientName, PatientUpdate, Result,
    Vitals,
};
use serde::{Deserialize, Serialize};

/// 表格中的一行，所有列均为原始文本
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRow {
    /// 完整姓名，未提供 first_name 时拆分使用
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub surname: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub bp: Option<String>,
    pub condition: Option<String>,
}

/// 解析校验后的行
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub name: PatientName,
    pub age: u8,
    pub gender: Option<Gender>,
    pub vitals: Option<Vitals>,
    pub condition: Option<String>,
}

impl ImportRow {
    pub fn parse(&self) -> Result<ParsedRow> {
        let name = match cell(&self.first_name) {
            Some(first) => PatientName::new(
                first,
                cell(&self.middle_name),
                cell(&self.surname),
            )?,
            None => match cell(&self.name) {
                Some(full) => PatientName::from_full_name(full)?,
                None => return Err(FlowError::invalid("first_name", "missing")),
            },
        };

        let age = parse_age(cell(&self.age))?;
        let gender = cell(&self.gender).map(str::parse::<Gender>).transpose()?;

        let vitals = match (cell(&self.weight), cell(&self.height), cell(&self.bp)) {
            (None, None, None) => None,
            (Some(weight), Some(height), Some(bp)) => Some(Vitals::new(
                parse_number("weight", weight)?,
                parse_number("height", height)?,
                bp,
            )?),
            (weight, height, _) => {
                let field = if weight.is_none() {
                    "weight"
                } else if height.is_none() {
                    "height"
                } else {
                    "bp"
                };
                return Err(FlowError::invalid(field, "vitals need weight, height and bp together"));
            }
        };

        Ok(ParsedRow {
            name,
            age,
            gender,
            vitals,
            condition: cell(&self.condition).map(str::to_string),
        })
    }
}

impl ParsedRow {
    pub fn new_patient(&self) -> Result<NewPatient> {
        NewPatient::new(self.name.clone(), self.age, self.gender)
    }

    /// 合并到已有患者：仅覆盖本行提供的字段
    pub fn merge_into(&self, existing: &Patient) -> PatientUpdate {
        let mut update = PatientUpdate::from(existing);
        update.name.middle = self.name.middle.clone().or(update.name.middle);
        if self.gender.is_some() {
            update.gender = self.gender;
        }
        if self.vitals.is_some() {
            update.vitals = self.vitals.clone();
        }
        if self.condition.is_some() {
            update.condition = self.condition.clone();
        }
        update
    }

    /// 新建后还需补写的字段
    pub fn has_clinical_fields(&self) -> bool {
        self.vitals.is_some() || self.condition.is_some()
    }
}

fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// 表格软件常把整数导出为 "30.0"，这里一并接受
fn parse_age(value: Option<&str>) -> Result<u8> {
    let raw = value.ok_or_else(|| FlowError::invalid("age", "missing"))?;

    let whole = match raw.parse::<i64>() {
        Ok(n) => n,
        Err(_) => match raw.parse::<f64>() {
            Ok(f) if f.is_finite() && f.fract() == 0.0 => f as i64,
            _ => return Err(FlowError::invalid("age", format!("'{}' is not a whole number", raw))),
        },
    };

    age_from_i64(whole)
}

fn parse_number(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| FlowError::invalid(field, format!("'{}' is not a number", raw)))
}

/// 被拒绝的行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 从 1 开始的行号
    pub row: usize,
    pub field: String,
    pub reason: String,
}

/// 批量导入报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub rejected: Vec<RejectedRow>,
}

impl ImportReport {
    pub fn reject(&mut self, row: usize, err: &FlowError) {
        let (field, reason) = match err {
            FlowError::InvalidInput { field, reason } => (field.clone(), reason.clone()),
            other => ("row".to_string(), other.to_string()),
        };
        self.rejected.push(RejectedRow { row, field, reason });
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.rejected.len()
    }
}
