//! QFlow服务器主程序

use anyhow::Context;
use clap::Parser;
use qflow_admin::{init_logging, ConfigManager, ConfigOverrides};
use qflow_database::{Database, DatabaseOptions};
use qflow_web::WebServer;
use qflow_workflow::{FlowEngine, LogAnnouncer, WorkflowSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// QFlow服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "qflow-server", version)]
#[command(about = "医院患者流转排队服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 数据库连接字符串
    #[arg(long)]
    database_url: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 打印生效配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::load(args.config.as_deref())?;
    manager.apply_overrides(ConfigOverrides {
        host: args.host,
        port: args.port,
        database_url: args.database_url,
        log_level: args.log_level,
    })?;

    if args.print_config {
        print!("{}", manager.to_toml()?);
        return Ok(());
    }

    let config = manager.config().clone();

    // 初始化日志
    init_logging(&config.logging)?;
    info!("Starting {}", config.server.name);

    let db = Database::connect(&DatabaseOptions {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        connect_timeout: Duration::from_secs(config.database.connect_timeout_secs),
    })
    .await
    .context("Failed to open database")?;

    let engine = Arc::new(FlowEngine::new(
        db.clone(),
        WorkflowSettings {
            ticket_prefix: config.tickets.prefix.clone(),
            credentials: config.stations.credentials(),
            search_limit: config.registry.search_limit,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 候诊大屏轮询
    let display_task = if config.display.enabled {
        let feed = engine.display_feed(Arc::new(LogAnnouncer));
        let period = Duration::from_secs(config.display.poll_interval_secs);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move { feed.run(period, shutdown).await }))
    } else {
        info!("Display feed disabled");
        None
    };

    let server = WebServer::new(config.server.socket_addr()?, engine);
    let mut web_shutdown = shutdown_rx;
    let mut server_task = tokio::spawn(server.run(async move {
        let _ = web_shutdown.changed().await;
    }));

    let finished_early = tokio::select! {
        result = &mut server_task => Some(result),
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
    };

    let _ = shutdown_tx.send(true);
    let server_result = match finished_early {
        Some(result) => result,
        None => server_task.await,
    };

    if let Some(task) = display_task {
        if let Err(e) = task.await {
            warn!("Display feed task ended abnormally: {}", e);
        }
    }

    db.close().await;

    let outcome = server_result.context("Web server task panicked").and_then(|r| r);
    if let Err(e) = &outcome {
        error!("Server stopped with error: {:#}", e);
    }
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
