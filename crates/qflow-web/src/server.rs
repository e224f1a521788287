//! Web服务器

use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{current_station, login_handler, logout_handler};
use crate::handlers::{
    api_root, check_in, complete_ticket, get_patient, get_ticket, get_ticket_by_code, health,
    import_patients, issue_ticket, last_completed, list_patients, next_waiting, now_serving,
    overview, record_doctor_decision, record_triage, register_patient, search_patients,
    set_priority, station_tickets, update_patient,
};
use crate::AppState;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    /// 运行直到 `shutdown` 完成，处理中的请求会先结束
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Web server failed: {}", e))?;

        info!("Web server stopped");
        Ok(())
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // 根路径
        .route("/", get(api_root))
        // 健康检查
        .route("/health", get(health))
        // API路由
        .nest("/api/v1", api_routes())
        .with_state(state)
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api_root))
        // 站点登录
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(current_station))
        // 患者登记
        .route("/patients", get(list_patients).post(register_patient))
        .route("/patients/search", get(search_patients))
        .route("/patients/import", post(import_patients))
        .route("/patients/:id", get(get_patient).put(update_patient))
        .route("/check-in", post(check_in))
        // 排队票
        .route("/tickets", post(issue_ticket))
        .route("/tickets/next", get(next_waiting))
        .route("/tickets/by-code/:code", get(get_ticket_by_code))
        .route("/tickets/:id", get(get_ticket))
        .route("/tickets/:id/priority", put(set_priority))
        .route("/tickets/:id/complete", post(complete_ticket))
        .route("/stations/:station/tickets", get(station_tickets))
        // 站点操作
        .route("/triage", post(record_triage))
        .route("/doctor", post(record_doctor_decision))
        // 候诊大屏
        .route("/display/now-serving", get(now_serving))
        .route("/display/last-completed", get(last_completed))
        .route("/stats", get(overview))
}
