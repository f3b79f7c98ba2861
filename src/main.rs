use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use labreserve::clock::SystemClock;
use labreserve::directory::{InMemoryDirectory, Laboratory, User};
use labreserve::engine::Engine;
use labreserve::notify::InMemoryGateway;
use labreserve::reminder::ReminderScheduler;
use labreserve::scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("LABRESERVE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    labreserve::observability::init(metrics_port);

    let data_dir = std::env::var("LABRESERVE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("LABRESERVE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let directory = Arc::new(InMemoryDirectory::new());
    match std::env::var("LABRESERVE_USERS_FILE") {
        Ok(path) => {
            let users: Vec<User> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            let n = users.len();
            for user in users {
                directory.insert_user(user);
            }
            info!("seeded {n} users from {path}");
        }
        Err(_) => tracing::warn!("LABRESERVE_USERS_FILE not set, user directory is empty"),
    }
    match std::env::var("LABRESERVE_LABS_FILE") {
        Ok(path) => {
            let labs: Vec<Laboratory> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            let n = labs.len();
            for lab in labs {
                directory.insert_lab(lab);
            }
            info!("seeded {n} labs from {path}");
        }
        Err(_) => tracing::warn!("LABRESERVE_LABS_FILE not set, lab directory is empty"),
    }

    let gateway = Arc::new(InMemoryGateway::new());
    let wal_path = PathBuf::from(&data_dir).join("reservations.wal");
    let engine = Arc::new(Engine::new(
        wal_path,
        directory.clone(),
        directory,
        gateway,
        Arc::new(SystemClock),
    )?);

    let reminders = Arc::new(ReminderScheduler::new(engine.clone()));
    let tasks = vec![
        tokio::spawn(scheduler::run_day_ahead_scan(reminders.clone())),
        tokio::spawn(scheduler::run_hour_ahead_scan(reminders.clone())),
        tokio::spawn(scheduler::run_imminent_scan(reminders.clone())),
        tokio::spawn(scheduler::run_same_day_scan(reminders)),
        tokio::spawn(scheduler::run_expiry_sweep(engine.clone())),
        tokio::spawn(scheduler::run_compactor(engine, compact_threshold)),
    ];

    info!("labreserve running");
    info!("  data_dir: {data_dir}");
    info!("  compact_threshold: {compact_threshold}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");

    for task in &tasks {
        task.abort();
    }
    info!("labreserve stopped");
    Ok(())
}
