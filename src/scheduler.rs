//! Background task loops: reminder scans, the expiry sweep and WAL
//! compaction. Each loop awaits its job inline, so runs never overlap.
//! Aligned loops take "now" from the engine's clock, never from a global
//! time source.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::info;

use crate::engine::Engine;
use crate::model::ReminderKind;
use crate::reminder::ReminderScheduler;

/// Hour of day the same-day reminder scan runs.
const SAME_DAY_HOUR: u32 = 1;
/// Hour of day the expiry sweep runs.
const SWEEP_HOUR: u32 = 2;

/// Day-ahead scan: hourly, aligned to the top of the hour.
pub async fn run_day_ahead_scan(scheduler: Arc<ReminderScheduler>) {
    loop {
        let now = scheduler.now();
        tokio::time::sleep(wait_until(now, next_top_of_hour(now))).await;
        scheduler.scan(ReminderKind::DayAhead).await;
    }
}

/// Hour-ahead scan: every 10 minutes.
pub async fn run_hour_ahead_scan(scheduler: Arc<ReminderScheduler>) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(600));
    loop {
        interval.tick().await;
        scheduler.scan(ReminderKind::HourAhead).await;
    }
}

/// Imminent scan: every 5 minutes.
pub async fn run_imminent_scan(scheduler: Arc<ReminderScheduler>) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(300));
    loop {
        interval.tick().await;
        scheduler.scan(ReminderKind::Imminent).await;
    }
}

/// Same-day scan: daily at 01:00.
pub async fn run_same_day_scan(scheduler: Arc<ReminderScheduler>) {
    loop {
        let now = scheduler.now();
        tokio::time::sleep(wait_until(now, next_daily_at(now, SAME_DAY_HOUR))).await;
        scheduler.scan(ReminderKind::SameDay).await;
    }
}

/// Expiry sweep: daily at 02:00, auto-cancels stale pending reservations.
pub async fn run_expiry_sweep(engine: Arc<Engine>) {
    loop {
        let now = engine.clock.now();
        tokio::time::sleep(wait_until(now, next_daily_at(now, SWEEP_HOUR))).await;
        let expired = engine.expire_overdue().await;
        if expired > 0 {
            info!("expiry sweep auto-cancelled {expired} reservations");
        }
    }
}

/// WAL compactor: checks the append counter once a minute and compacts once
/// it crosses the threshold.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(StdDuration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

/// Time left until `next`; zero when `next` is already behind `now`.
fn wait_until(now: NaiveDateTime, next: NaiveDateTime) -> StdDuration {
    (next - now).to_std().unwrap_or_default()
}

fn next_top_of_hour(now: NaiveDateTime) -> NaiveDateTime {
    let truncated = now
        .date()
        .and_hms_opt(now.hour(), 0, 0)
        .expect("valid truncated hour");
    truncated + Duration::hours(1)
}

fn next_daily_at(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let today_at = now.date().and_hms_opt(hour, 0, 0).expect("valid daily hour");
    if now < today_at {
        today_at
    } else {
        today_at + Duration::days(1)
    }
}
