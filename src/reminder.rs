//! Reminder scans over upcoming approved reservations.
//!
//! Each reservation carries a `reminders_sent` marker set; a delivered lead
//! class is persisted to the WAL *before* dispatch, so a crash between the
//! two drops at most one reminder and never duplicates one.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, NaiveDateTime};

use crate::engine::{DomainError, Engine};
use crate::model::{Reservation, ReminderKind};
use crate::notify::{EmailTemplate, MessageDraft, MessageKind, Priority, Related};
use crate::observability::{
    REMINDERS_SENT_TOTAL, REMINDERS_SKIPPED_MALFORMED_TOTAL, SCAN_DURATION_SECONDS,
    reminder_label,
};

/// Delivery window half-width for the hour-ahead scan (runs every 10 min).
const HOUR_AHEAD_TOLERANCE: Duration = Duration::seconds(300);
/// Delivery window half-width for the imminent scan (runs every 5 min).
const IMMINENT_TOLERANCE: Duration = Duration::seconds(150);

/// Target lead and tolerance for the time-windowed kinds; the date-matched
/// kinds have no window.
fn window(kind: ReminderKind) -> Option<(Duration, Duration)> {
    match kind {
        ReminderKind::HourAhead => Some((Duration::hours(1), HOUR_AHEAD_TOLERANCE)),
        ReminderKind::Imminent => Some((Duration::minutes(30), IMMINENT_TOLERANCE)),
        ReminderKind::DayAhead | ReminderKind::SameDay => None,
    }
}

pub struct ReminderScheduler {
    engine: Arc<Engine>,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Run one scan for the given lead class. Returns how many reminders
    /// were delivered.
    pub async fn scan(&self, kind: ReminderKind) -> usize {
        let started = Instant::now();
        let sent = self.scan_inner(kind).await;
        metrics::histogram!(SCAN_DURATION_SECONDS, "kind" => reminder_label(kind))
            .record(started.elapsed().as_secs_f64());
        if sent > 0 {
            tracing::info!(kind = reminder_label(kind), sent, "reminder scan done");
        }
        sent
    }

    async fn scan_inner(&self, kind: ReminderKind) -> usize {
        let candidates = match window(kind) {
            // Time-windowed kinds select by the target instant's date — near
            // the end of the day that can already be tomorrow.
            Some((lead, _)) => {
                let target = self.engine.clock.now() + lead;
                self.engine.approved_on(target.date()).await
            }
            None => {
                let today = self.engine.clock.today();
                let date = match kind {
                    ReminderKind::DayAhead => today + Duration::days(1),
                    _ => today,
                };
                self.engine.approved_on(date).await
            }
        };

        let mut sent = 0;
        for r in candidates {
            if r.reminders_sent.contains(&kind) {
                continue;
            }
            if !self.in_window(&r, kind) {
                continue;
            }
            match self.deliver(&r, kind).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                // One failed delivery must not abort the rest of the batch.
                Err(e) => tracing::error!("reminder delivery failed for {}: {e}", r.id),
            }
        }
        sent
    }

    /// Date-matched kinds always fire; time-windowed kinds fire when the slot
    /// start falls within tolerance of the target lead. Malformed slots are
    /// counted and skipped.
    fn in_window(&self, r: &Reservation, kind: ReminderKind) -> bool {
        let Some((target, tolerance)) = window(kind) else {
            return true;
        };
        let start = match r.slot_start() {
            Ok(start) => start,
            Err(e) => {
                metrics::counter!(REMINDERS_SKIPPED_MALFORMED_TOTAL).increment(1);
                tracing::warn!("skipping reservation {}: {e}", r.id);
                return false;
            }
        };
        let lead = r.reserve_date.and_time(start) - self.engine.clock.now();
        (lead - target).abs() <= tolerance
    }

    /// Returns Ok(true) when the reminder was dispatched, Ok(false) when the
    /// marker was persisted but the user no longer resolves.
    async fn deliver(&self, r: &Reservation, kind: ReminderKind) -> Result<bool, DomainError> {
        // Marker first: better to lose one reminder on a crash than to ever
        // send the same one twice.
        self.engine.mark_reminder_sent(r.id, kind).await?;

        let Some(user) = self.engine.users.find_user(r.user_id).await else {
            tracing::warn!(
                "user {} gone, reminder marker for {} persisted with nothing delivered",
                r.user_id,
                r.id
            );
            return Ok(false);
        };
        let lab_name = self.engine.lab_display_name(r.lab_id).await;

        let (title, lead_text, priority) = match kind {
            ReminderKind::DayAhead => ("Reservation tomorrow", "tomorrow", Priority::Normal),
            ReminderKind::HourAhead => {
                ("Reservation in one hour", "in about an hour", Priority::Important)
            }
            ReminderKind::Imminent => {
                ("Reservation starting soon", "in about 30 minutes", Priority::Urgent)
            }
            ReminderKind::SameDay => ("Reservation today", "today", Priority::Normal),
        };
        let content = format!(
            "Reminder: your reservation [{lab_name} - {} {}] starts {lead_text}.",
            r.reserve_date, r.time_slot
        );
        self.engine
            .dispatch_message(MessageDraft {
                receiver_id: user.id,
                kind: MessageKind::Reminder,
                title: title.to_string(),
                content,
                related: Some(Related::Reservation(r.id)),
                priority,
            })
            .await;

        // Reminder mail requires a verified address, unlike outcome mail.
        if let Some(addr) = user.verified_email() {
            let email = EmailTemplate::Reminder {
                recipient: user.display_name().to_string(),
                lab_name,
                reserve_date: r.reserve_date,
                time_slot: r.time_slot.clone(),
            };
            self.engine.dispatch_email(addr, email).await;
        }

        metrics::counter!(REMINDERS_SENT_TOTAL, "kind" => reminder_label(kind)).increment(1);
        Ok(true)
    }

    /// Scheduler loops align their wake-ups to the engine's clock.
    pub(crate) fn now(&self) -> NaiveDateTime {
        self.engine.clock.now()
    }
}
