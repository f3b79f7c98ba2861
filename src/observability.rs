use std::net::SocketAddr;

use crate::model::ReminderKind;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "labreserve_reservations_created_total";

/// Counter: lifecycle transitions applied. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "labreserve_transitions_total";

// ── Background jobs ─────────────────────────────────────────────

/// Counter: reminders delivered. Labels: kind.
pub const REMINDERS_SENT_TOTAL: &str = "labreserve_reminders_sent_total";

/// Counter: malformed time slots skipped during reminder scans.
pub const REMINDERS_SKIPPED_MALFORMED_TOTAL: &str =
    "labreserve_reminders_skipped_malformed_total";

/// Counter: pending reservations auto-cancelled by the expiry sweep.
pub const SWEEP_EXPIRED_TOTAL: &str = "labreserve_sweep_expired_total";

/// Counter: notification dispatch failures (swallowed).
pub const NOTIFY_FAILURES_TOTAL: &str = "labreserve_notify_failures_total";

/// Histogram: reminder scan duration in seconds. Labels: kind.
pub const SCAN_DURATION_SECONDS: &str = "labreserve_scan_duration_seconds";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labreserve_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labreserve_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a reminder kind to a short label for metrics.
pub fn reminder_label(kind: ReminderKind) -> &'static str {
    match kind {
        ReminderKind::DayAhead => "day_ahead",
        ReminderKind::HourAhead => "hour_ahead",
        ReminderKind::Imminent => "imminent",
        ReminderKind::SameDay => "same_day",
    }
}
