//! regimen: routine scheduling and task rollup service.
//! task rows → per-key rollups + date schedule, kept in step by the engine.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regimen::{analytics, api, db, engine, planner, retry, AppState, SharedDB};

#[derive(Parser)]
#[command(name = "regimen", version, about = "Routine scheduling and task rollup service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3920", env = "REGIMEN_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "regimen.db", env = "REGIMEN_DB")]
    db: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let rdb = db::RegimenDB::open(&args.db).expect("failed to open database");
    let shared: SharedDB = Arc::new(rdb);

    let planner_cfg = planner::PlannerConfig::from_env();
    let planner_status = planner_cfg.as_ref().map_or_else(|| "disabled".to_string(), |c| c.model.clone());

    let api_key = std::env::var("REGIMEN_API_KEY").ok();
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let mut state = AppState::new(shared.clone());
    state.api_key = api_key;
    state.planner = planner_cfg;
    state.analytics = analytics::sink_from_env();
    state.retry = retry::RetryPolicy::from_env();
    let app = api::router(state);

    // background expire + reconcile: runs every REGIMEN_MAINTENANCE_MINS (default 30)
    let maintenance_mins: u64 = std::env::var("REGIMEN_MAINTENANCE_MINS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    if maintenance_mins > 0 {
        let bg_db = shared.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(maintenance_mins.saturating_mul(60));
            // wait a bit before first run so startup isn't slowed
            tokio::time::sleep(Duration::from_secs(60)).await;
            loop {
                run_maintenance(&bg_db).await;
                tokio::time::sleep(interval).await;
            }
        });
        info!(every_mins = maintenance_mins, "background maintenance enabled");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        planner = %planner_status,
        auth = auth_status,
        "regimen starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn run_maintenance(db: &SharedDB) {
    let now = db::now();
    let result = regimen::db_call(db, move |d| {
        let expired = engine::expire_overdue(d, now)?;
        let reconciled = engine::reconcile_all(d)?;
        d.set_meta("last_maintenance_ms", &now.timestamp_millis().to_string())?;
        Ok::<_, regimen::error::RegimenError>((expired, reconciled))
    })
    .await;
    match result {
        Ok(Ok((expired, reconciled))) => {
            if expired.tasks_expired > 0 || !reconciled.fixed.is_empty() {
                info!(
                    tasks_expired = expired.tasks_expired,
                    routines_expired = expired.routines_expired,
                    reconciled = reconciled.fixed.len(),
                    "maintenance"
                );
            }
        }
        Ok(Err(e)) | Err(e) => warn!(error = %e, "maintenance failed"),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
