//! HTTP处理器

use crate::auth::StationSession;
use crate::error::ApiResult;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use qflow_core::{
    age_from_i64, Gender, NewPatient, Patient, PatientId, PatientName, PatientUpdate, Priority,
    Station, Ticket, TicketId, Vitals,
};
use qflow_workflow::{Announcement, FlowOverview, ImportReport, ImportRow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "QFlow Patient Flow API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ========== 患者 ==========

/// 登记请求，姓名可拆分提供，也可只给完整姓名
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub surname: Option<String>,
    /// 按整数接收，越界时返回字段错误而不是反序列化失败
    pub age: i64,
    pub gender: Option<String>,
}

impl RegisterRequest {
    fn into_new_patient(self) -> qflow_core::Result<NewPatient> {
        let name = match (self.first_name.as_deref(), self.name.as_deref()) {
            (Some(first), _) => {
                PatientName::new(first, self.middle_name.as_deref(), self.surname.as_deref())?
            }
            (None, Some(full)) => PatientName::from_full_name(full)?,
            (None, None) => {
                return Err(qflow_core::FlowError::invalid("first_name", "first name is required"))
            }
        };
        let gender = self
            .gender
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .map(str::parse::<Gender>)
            .transpose()?;

        NewPatient::new(name, age_from_i64(self.age)?, gender)
    }
}

pub async fn register_patient(
    State(engine): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let patient = engine.registry().register(request.into_new_patient()?).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_patients(
    State(engine): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Patient>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);
    Ok(Json(engine.registry().list(limit, offset).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search_patients(
    State(engine): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Patient>>> {
    Ok(Json(engine.registry().search(&params.q).await?))
}

pub async fn get_patient(
    State(engine): State<AppState>,
    Path(id): Path<PatientId>,
) -> ApiResult<Json<Patient>> {
    Ok(Json(engine.registry().get(id).await?))
}

/// 患者档案全量更新，体征三项须同时提供或同时省略
#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub surname: Option<String>,
    pub age: i64,
    pub gender: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub blood_pressure: Option<String>,
    pub condition: Option<String>,
}

impl UpdatePatientRequest {
    fn into_update(self) -> qflow_core::Result<PatientUpdate> {
        let name = PatientName::new(
            &self.first_name,
            self.middle_name.as_deref(),
            self.surname.as_deref(),
        )?;
        let gender = self
            .gender
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .map(str::parse::<Gender>)
            .transpose()?;
        let vitals = match (self.weight_kg, self.height_cm, self.blood_pressure.as_deref()) {
            (Some(weight), Some(height), Some(bp)) => Some(Vitals::new(weight, height, bp)?),
            (None, None, None) => None,
            _ => {
                return Err(qflow_core::FlowError::invalid(
                    "vitals",
                    "weight, height and blood pressure go together",
                ))
            }
        };
        let condition = self
            .condition
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(PatientUpdate {
            name,
            age: age_from_i64(self.age)?,
            gender,
            vitals,
            condition,
        })
    }
}

pub async fn update_patient(
    State(engine): State<AppState>,
    Path(id): Path<PatientId>,
    Json(request): Json<UpdatePatientRequest>,
) -> ApiResult<Json<Patient>> {
    let patient = engine.registry().update(id, &request.into_update()?).await?;
    Ok(Json(patient))
}

pub async fn import_patients(
    State(engine): State<AppState>,
    Json(rows): Json<Vec<ImportRow>>,
) -> Json<ImportReport> {
    info!("Importing {} patient rows", rows.len());
    Json(engine.registry().bulk_import(&rows).await)
}

// ========== 自助机 ==========

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    #[serde(flatten)]
    pub patient: RegisterRequest,
    #[serde(default)]
    pub emergency: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub patient: Patient,
    pub ticket: Ticket,
}

pub async fn check_in(
    State(engine): State<AppState>,
    Json(request): Json<CheckInRequest>,
) -> ApiResult<impl IntoResponse> {
    let priority = priority_of(request.emergency);
    let (patient, ticket) = engine
        .check_in(request.patient.into_new_patient()?, priority)
        .await?;
    Ok((StatusCode::CREATED, Json(CheckInResponse { patient, ticket })))
}

// ========== 排队票 ==========

#[derive(Debug, Deserialize)]
pub struct IssueTicketRequest {
    pub patient_id: PatientId,
    #[serde(default)]
    pub emergency: bool,
}

pub async fn issue_ticket(
    State(engine): State<AppState>,
    Json(request): Json<IssueTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    let ticket = engine
        .queue()
        .issue_ticket(request.patient_id, priority_of(request.emergency))
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn get_ticket(
    State(engine): State<AppState>,
    Path(id): Path<TicketId>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(engine.queue().get_ticket(id).await?))
}

pub async fn get_ticket_by_code(
    State(engine): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(engine.queue().find_by_code(&code).await?))
}

pub async fn next_waiting(State(engine): State<AppState>) -> ApiResult<Json<Option<Ticket>>> {
    Ok(Json(engine.queue().next_waiting().await?))
}

pub async fn station_tickets(
    State(engine): State<AppState>,
    Path(station): Path<String>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let station: Station = station.parse()?;
    Ok(Json(engine.queue().list_by_station(station).await?))
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub emergency: bool,
}

pub async fn set_priority(
    State(engine): State<AppState>,
    StationSession(pass): StationSession,
    Path(id): Path<TicketId>,
    Json(request): Json<PriorityRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = engine
        .queue()
        .set_priority(&pass, id, priority_of(request.emergency))
        .await?;
    Ok(Json(ticket))
}

/// 当前登录站点办结排队票
pub async fn complete_ticket(
    State(engine): State<AppState>,
    StationSession(pass): StationSession,
    Path(id): Path<TicketId>,
) -> ApiResult<Json<Ticket>> {
    let ticket = engine
        .queue()
        .complete_station(&pass, id, pass.station())
        .await?;
    Ok(Json(ticket))
}

// ========== 分诊与医生 ==========

#[derive(Debug, Deserialize)]
pub struct TriageRequest {
    pub patient_id: PatientId,
    pub weight_kg: f64,
    pub height_cm: f64,
    pub blood_pressure: String,
}

pub async fn record_triage(
    State(engine): State<AppState>,
    StationSession(pass): StationSession,
    Json(request): Json<TriageRequest>,
) -> ApiResult<Json<Ticket>> {
    let vitals = Vitals::new(request.weight_kg, request.height_cm, &request.blood_pressure)?;
    let ticket = engine
        .queue()
        .record_triage(&pass, request.patient_id, &vitals)
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
pub struct DoctorDecisionRequest {
    pub patient_id: PatientId,
    pub condition: String,
    pub destination: String,
}

pub async fn record_doctor_decision(
    State(engine): State<AppState>,
    StationSession(pass): StationSession,
    Json(request): Json<DoctorDecisionRequest>,
) -> ApiResult<Json<Ticket>> {
    let destination: Station = request.destination.parse()?;
    let ticket = engine
        .queue()
        .record_doctor_decision(&pass, request.patient_id, &request.condition, destination)
        .await?;
    Ok(Json(ticket))
}

// ========== 候诊大屏与统计 ==========

#[derive(Debug, Serialize)]
pub struct DisplayView {
    #[serde(flatten)]
    pub announcement: Announcement,
    pub text: String,
}

impl From<Announcement> for DisplayView {
    fn from(announcement: Announcement) -> Self {
        Self {
            text: announcement.text(),
            announcement,
        }
    }
}

pub async fn now_serving(State(engine): State<AppState>) -> ApiResult<Json<Option<DisplayView>>> {
    let feed = engine.display_feed(silent());
    Ok(Json(feed.now_serving().await?.map(DisplayView::from)))
}

pub async fn last_completed(
    State(engine): State<AppState>,
) -> ApiResult<Json<Option<DisplayView>>> {
    let feed = engine.display_feed(silent());
    Ok(Json(feed.last_completed().await?.map(DisplayView::from)))
}

pub async fn overview(State(engine): State<AppState>) -> ApiResult<Json<FlowOverview>> {
    Ok(Json(engine.overview().await?))
}

fn priority_of(emergency: bool) -> Priority {
    if emergency {
        Priority::Emergency
    } else {
        Priority::Normal
    }
}

/// 只读查询不播报
fn silent() -> std::sync::Arc<dyn qflow_workflow::Announcer> {
    std::sync::Arc::new(qflow_workflow::LogAnnouncer)
}
