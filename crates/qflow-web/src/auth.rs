//! 站点登录与通行证提取

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use qflow_core::{FlowError, Station};
use qflow_workflow::StationPass;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// 备用的令牌请求头，`Authorization: Bearer` 优先
pub const STATION_TOKEN_HEADER: &str = "x-station-token";

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub station: String,
    pub password: String,
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: Uuid,
    pub station: Station,
    pub issued_at: DateTime<Utc>,
}

impl From<&StationPass> for LoginResponse {
    fn from(pass: &StationPass) -> Self {
        Self {
            token: pass.token(),
            station: pass.station(),
            issued_at: pass.issued_at(),
        }
    }
}

/// 已登录站点的通行证
#[derive(Debug, Clone)]
pub struct StationSession(pub StationPass);

#[axum::async_trait]
impl FromRequestParts<AppState> for StationSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let raw = token_from_headers(&parts.headers)
            .ok_or_else(|| FlowError::Unauthorized("missing station token".to_string()))?;
        let token = Uuid::parse_str(raw)
            .map_err(|_| FlowError::Unauthorized("malformed station token".to_string()))?;

        match state.access().resolve(token).await {
            Some(pass) => Ok(StationSession(pass)),
            None => Err(FlowError::Unauthorized("unknown or revoked station token".to_string()).into()),
        }
    }
}

fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    bearer
        .or_else(|| headers.get(STATION_TOKEN_HEADER).and_then(|h| h.to_str().ok()))
        .map(str::trim)
}

/// 登录处理器
pub async fn login_handler(
    State(engine): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let station: Station = request.station.parse()?;
    info!("Login attempt for station: {}", station);

    match engine.access().login(station, &request.password).await {
        Ok(pass) => Ok(Json(LoginResponse::from(&pass))),
        Err(e) => {
            warn!("Login failed: {}", e);
            Err(e.into())
        }
    }
}

/// 注销当前通行证
pub async fn logout_handler(
    State(engine): State<AppState>,
    StationSession(pass): StationSession,
) -> impl IntoResponse {
    engine.access().logout(&pass).await;
    Json(serde_json::json!({ "logged_out": true, "station": pass.station() }))
}

/// 当前通行证信息
pub async fn current_station(StationSession(pass): StationSession) -> impl IntoResponse {
    Json(LoginResponse::from(&pass))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_header_precedence() {
        let mut headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());

        headers.insert(STATION_TOKEN_HEADER, HeaderValue::from_static("fallback"));
        assert_eq!(token_from_headers(&headers), Some("fallback"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer primary"));
        assert_eq!(token_from_headers(&headers), Some("primary"));
    }
}
