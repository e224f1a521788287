//! 站点访问凭证
//!
//! 各站点登录后获得 [`StationPass`]，每次变更操作都需出示，由核心在写入前校验。

use chrono::{DateTime, Utc};
use qflow_core::{FlowError, Result, Station};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// 站点通行证，只能由 [`StationAccess::login`] 签发
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationPass {
    token: Uuid,
    station: Station,
    issued_at: DateTime<Utc>,
}

impl StationPass {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn station(&self) -> Station {
        self.station
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// 站点访问控制
#[derive(Debug)]
pub struct StationAccess {
    credentials: HashMap<Station, String>,
    sessions: RwLock<HashMap<Uuid, StationPass>>,
}

impl StationAccess {
    pub fn new(credentials: HashMap<Station, String>) -> Self {
        Self {
            credentials,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 默认站点口令
    pub fn default_credentials() -> HashMap<Station, String> {
        [
            (Station::Triage, "triage123"),
            (Station::Doctor, "doctor123"),
            (Station::Pharmacy, "pharmacy123"),
            (Station::Lab, "lab123"),
            (Station::Payment, "payment123"),
        ]
        .into_iter()
        .map(|(station, password)| (station, password.to_string()))
        .collect()
    }

    /// 站点登录
    pub async fn login(&self, station: Station, password: &str) -> Result<StationPass> {
        match self.credentials.get(&station) {
            Some(expected) if expected == password => {
                let pass = StationPass {
                    token: Uuid::new_v4(),
                    station,
                    issued_at: Utc::now(),
                };
                self.sessions.write().await.insert(pass.token, pass.clone());

                info!("Station {} logged in", station);
                Ok(pass)
            }
            Some(_) => {
                warn!("Rejected login for station {}", station);
                Err(FlowError::Unauthorized(format!("wrong password for {}", station)))
            }
            None => Err(FlowError::Unauthorized(format!(
                "station {} does not accept logins",
                station
            ))),
        }
    }

    pub async fn logout(&self, pass: &StationPass) {
        if self.sessions.write().await.remove(&pass.token).is_some() {
            info!("Station {} logged out", pass.station);
        }
    }

    /// 根据令牌找回通行证
    pub async fn resolve(&self, token: Uuid) -> Option<StationPass> {
        self.sessions.read().await.get(&token).cloned()
    }

    /// 校验通行证仍有效且属于指定站点
    pub async fn authorize(&self, pass: &StationPass, station: Station) -> Result<()> {
        if pass.station != station {
            return Err(FlowError::Unauthorized(format!(
                "{} pass cannot act for {}",
                pass.station, station
            )));
        }

        if !self.sessions.read().await.contains_key(&pass.token) {
            return Err(FlowError::Unauthorized(format!(
                "{} session expired",
                pass.station
            )));
        }

        Ok(())
    }

    /// 任一站点的有效通行证
    pub async fn authorize_any(&self, pass: &StationPass) -> Result<()> {
        self.authorize(pass, pass.station).await
    }
}

impl Default for StationAccess {
    fn default() -> Self {
        Self::new(Self::default_credentials())
    }
}
