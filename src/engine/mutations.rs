use chrono::{Duration, NaiveDate};
use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;
use crate::notify::{EmailTemplate, MessageDraft, MessageKind, Priority, Related};

use super::conflict::check_no_conflict;
use super::{DomainError, Engine, SharedLabBook, WalCommand};

/// Cancel reason stamped by the expiry sweep.
pub const EXPIRE_REASON: &str = "timed out, auto-cancelled by system";

/// Creation request as received from the API layer.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub user_id: UserId,
    pub lab_id: LabId,
    pub reserve_date: NaiveDate,
    pub time_slot: String,
    pub people_num: u32,
    pub purpose: Option<String>,
}

/// Editable fields of a pending reservation.
#[derive(Debug, Clone)]
pub struct UpdateReservation {
    pub reserve_date: NaiveDate,
    pub time_slot: String,
    pub people_num: u32,
    pub purpose: Option<String>,
}

impl Engine {
    /// Create a new reservation in Pending state. All preconditions are
    /// validated before anything is persisted; the conflict check and the
    /// insert share the lab's write lock.
    pub async fn create_reservation(
        &self,
        req: CreateReservation,
    ) -> Result<Reservation, DomainError> {
        if req.time_slot.len() > MAX_SLOT_LEN {
            return Err(DomainError::LimitExceeded("time slot too long"));
        }
        if let Some(ref p) = req.purpose
            && p.len() > MAX_TEXT_LEN {
                return Err(DomainError::LimitExceeded("purpose too long"));
            }

        if self.users.find_user(req.user_id).await.is_none() {
            return Err(DomainError::UserNotFound(req.user_id));
        }
        let lab = self
            .labs
            .find_lab(req.lab_id)
            .await
            .ok_or(DomainError::LabNotFound(req.lab_id))?;
        if !lab.is_bookable() {
            return Err(DomainError::LabUnavailable(req.lab_id));
        }

        let today = self.clock.today();
        if req.reserve_date < today {
            return Err(DomainError::PastDate(req.reserve_date));
        }
        if req.reserve_date > today + Duration::days(MAX_ADVANCE_DAYS) {
            return Err(DomainError::LimitExceeded("reservation date too far ahead"));
        }

        let book = self.book(req.lab_id);
        let mut guard = book.write_owned().await;
        if guard.len() >= MAX_RESERVATIONS_PER_LAB {
            return Err(DomainError::LimitExceeded("too many reservations for lab"));
        }
        check_no_conflict(&guard, req.lab_id, req.reserve_date, &req.time_slot)?;
        if req.people_num > lab.capacity {
            return Err(DomainError::CapacityExceeded {
                requested: req.people_num,
                capacity: lab.capacity,
            });
        }

        let now = self.clock.now();
        let reservation = Reservation {
            id: ReservationId::new(),
            user_id: req.user_id,
            lab_id: req.lab_id,
            reserve_date: req.reserve_date,
            time_slot: req.time_slot,
            people_num: req.people_num,
            purpose: req.purpose,
            status: ReservationStatus::Pending,
            approver: None,
            approve_comment: None,
            approve_time: None,
            cancel_reason: None,
            rating: None,
            comment: None,
            create_time: now,
            update_time: now,
            reminders_sent: Default::default(),
        };

        let event = Event::Created {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.lab_of.insert(reservation.id, reservation.lab_id);
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Pending → Approved. Records approver, comment and approve time, then
    /// notifies the reserving user.
    pub async fn approve(
        &self,
        id: ReservationId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<(), DomainError> {
        check_review_inputs(approver, comment.as_deref())?;
        let (_, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(DomainError::NotFound(id))?;
        if current.status != ReservationStatus::Pending {
            return Err(DomainError::InvalidState {
                current: current.status,
            });
        }

        let event = Event::Approved {
            id,
            approver: approver.to_string(),
            comment: comment.clone(),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let snapshot = guard.get(&id).cloned();
        drop(guard);

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "approve")
            .increment(1);
        if let Some(r) = snapshot {
            self.notify_outcome(
                &r,
                "approved",
                comment.as_deref(),
                MessageKind::Approval,
                Priority::Important,
                "Reservation review result",
            )
            .await;
        }
        Ok(())
    }

    /// Pending → Rejected.
    pub async fn reject(
        &self,
        id: ReservationId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<(), DomainError> {
        check_review_inputs(approver, comment.as_deref())?;
        let (_, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(DomainError::NotFound(id))?;
        if current.status != ReservationStatus::Pending {
            return Err(DomainError::InvalidState {
                current: current.status,
            });
        }

        let event = Event::Rejected {
            id,
            approver: approver.to_string(),
            comment: comment.clone(),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let snapshot = guard.get(&id).cloned();
        drop(guard);

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "reject")
            .increment(1);
        if let Some(r) = snapshot {
            self.notify_outcome(
                &r,
                "rejected",
                comment.as_deref(),
                MessageKind::Approval,
                Priority::Important,
                "Reservation review result",
            )
            .await;
        }
        Ok(())
    }

    /// Cancel from any non-terminal-cancel state: allowed unless the
    /// reservation is already Cancelled or Completed.
    pub async fn cancel(
        &self,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<(), DomainError> {
        if let Some(ref r) = reason
            && r.len() > MAX_TEXT_LEN {
                return Err(DomainError::LimitExceeded("cancel reason too long"));
            }
        let (_, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(DomainError::NotFound(id))?;
        if matches!(
            current.status,
            ReservationStatus::Cancelled | ReservationStatus::Completed
        ) {
            return Err(DomainError::InvalidState {
                current: current.status,
            });
        }

        let event = Event::Cancelled {
            id,
            reason: reason.clone(),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let snapshot = guard.get(&id).cloned();
        drop(guard);

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "cancel")
            .increment(1);
        if let Some(r) = snapshot {
            self.notify_outcome(
                &r,
                "cancelled",
                reason.as_deref(),
                MessageKind::System,
                Priority::Important,
                "Reservation cancelled",
            )
            .await;
        }
        Ok(())
    }

    /// Approved → Completed with a 1–5 rating.
    pub async fn complete(
        &self,
        id: ReservationId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), DomainError> {
        if let Some(ref c) = comment
            && c.len() > MAX_TEXT_LEN {
                return Err(DomainError::LimitExceeded("comment too long"));
            }
        let (_, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(DomainError::NotFound(id))?;
        if current.status != ReservationStatus::Approved {
            return Err(DomainError::InvalidState {
                current: current.status,
            });
        }
        if !(1..=5).contains(&rating) {
            return Err(DomainError::InvalidRating(rating));
        }

        let event = Event::Completed {
            id,
            rating,
            comment,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let snapshot = guard.get(&id).cloned();
        drop(guard);

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "complete")
            .increment(1);
        if let Some(r) = snapshot {
            self.notify_completed(&r, rating).await;
        }
        Ok(())
    }

    /// Edit a pending reservation. The conflict check re-runs only when the
    /// scheduling key (date or slot) actually changed; capacity is not
    /// re-checked (creation-time semantics).
    pub async fn update(
        &self,
        id: ReservationId,
        req: UpdateReservation,
    ) -> Result<(), DomainError> {
        if req.time_slot.len() > MAX_SLOT_LEN {
            return Err(DomainError::LimitExceeded("time slot too long"));
        }
        if let Some(ref p) = req.purpose
            && p.len() > MAX_TEXT_LEN {
                return Err(DomainError::LimitExceeded("purpose too long"));
            }
        let (lab_id, mut guard) = self.resolve_write(&id).await?;
        let current = guard.get(&id).ok_or(DomainError::NotFound(id))?;
        if current.status != ReservationStatus::Pending {
            return Err(DomainError::InvalidState {
                current: current.status,
            });
        }
        let key_changed = current.reserve_date != req.reserve_date
            || current.time_slot != req.time_slot;
        if key_changed {
            check_no_conflict(&guard, lab_id, req.reserve_date, &req.time_slot)?;
        }

        let event = Event::Updated {
            id,
            reserve_date: req.reserve_date,
            time_slot: req.time_slot,
            people_num: req.people_num,
            purpose: req.purpose,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "update")
            .increment(1);
        Ok(())
    }

    /// Admin hard delete — bypasses the state machine entirely.
    pub async fn delete(&self, id: ReservationId) -> Result<(), DomainError> {
        let (_, mut guard) = self.resolve_write(&id).await?;
        if guard.get(&id).is_none() {
            return Err(DomainError::NotFound(id));
        }
        let event = Event::Deleted { id };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        self.lab_of.remove(&id);
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => "delete")
            .increment(1);
        Ok(())
    }

    /// Daily sweep: auto-cancel Pending reservations whose date has passed.
    /// Idempotent — a second run on the same day finds nothing left to do.
    /// Returns the number of reservations expired.
    pub async fn expire_overdue(&self) -> usize {
        let today = self.clock.today();
        let mut overdue = Vec::new();
        let books: Vec<SharedLabBook> = self.books.iter().map(|e| e.value().clone()).collect();
        for book in books {
            let guard = book.read().await;
            for r in guard.iter() {
                if r.status == ReservationStatus::Pending && r.reserve_date < today {
                    overdue.push(r.id);
                }
            }
        }

        let mut expired = 0usize;
        for id in overdue {
            match self.expire_one(id, today).await {
                Ok(true) => expired += 1,
                Ok(false) => {} // raced with a user action — fine
                Err(e) => tracing::error!("expiry sweep failed for {id}: {e}"),
            }
        }
        if expired > 0 {
            metrics::counter!(crate::observability::SWEEP_EXPIRED_TOTAL)
                .increment(expired as u64);
        }
        expired
    }

    async fn expire_one(&self, id: ReservationId, today: NaiveDate) -> Result<bool, DomainError> {
        let (_, mut guard) = self.resolve_write(&id).await?;
        let Some(current) = guard.get(&id) else {
            return Ok(false);
        };
        // Re-check under the write lock: a concurrent approve/cancel wins.
        if current.status != ReservationStatus::Pending || current.reserve_date >= today {
            return Ok(false);
        }

        let event = Event::Cancelled {
            id,
            reason: Some(EXPIRE_REASON.to_string()),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let snapshot = guard.get(&id).cloned();
        drop(guard);

        if let Some(r) = snapshot {
            self.notify_expired(&r).await;
        }
        Ok(true)
    }

    /// Persist a delivered-reminder marker for a reservation.
    pub(crate) async fn mark_reminder_sent(
        &self,
        id: ReservationId,
        kind: ReminderKind,
    ) -> Result<(), DomainError> {
        let (_, mut guard) = self.resolve_write(&id).await?;
        if guard.get(&id).is_none() {
            return Err(DomainError::NotFound(id));
        }
        let event = Event::ReminderSent { id, kind };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Notification dispatch (always log-and-swallow) ───────────

    pub(crate) async fn lab_display_name(&self, lab_id: LabId) -> String {
        match self.labs.find_lab(lab_id).await {
            Some(lab) => lab.name,
            None => format!("lab {lab_id}"),
        }
    }

    pub(crate) async fn dispatch_message(&self, draft: MessageDraft) {
        if let Err(e) = self.gateway.create_message(draft).await {
            metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
            tracing::error!("message dispatch failed: {e}");
        }
    }

    pub(crate) async fn dispatch_email(&self, address: &str, email: EmailTemplate) {
        if let Err(e) = self.gateway.send_email(address, email).await {
            metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
            tracing::error!("email dispatch failed for {address}: {e}");
        }
    }

    /// Approve/reject/cancel notice: in-app message plus email when the user
    /// has any address on file (outcome mail does not require verification;
    /// reminders do).
    async fn notify_outcome(
        &self,
        r: &Reservation,
        outcome: &str,
        note: Option<&str>,
        kind: MessageKind,
        priority: Priority,
        title: &str,
    ) {
        let Some(user) = self.users.find_user(r.user_id).await else {
            tracing::warn!("user {} not found, skipping notice for {}", r.user_id, r.id);
            return;
        };
        let lab_name = self.lab_display_name(r.lab_id).await;

        let mut content = format!(
            "Your reservation [{} - {} {}] has been {}.",
            lab_name, r.reserve_date, r.time_slot, outcome
        );
        if let Some(note) = note
            && !note.is_empty() {
                content.push_str(&format!(" Note: {note}"));
            }

        self.dispatch_message(MessageDraft {
            receiver_id: user.id,
            kind,
            title: title.to_string(),
            content,
            related: Some(Related::Reservation(r.id)),
            priority,
        })
        .await;

        if let Some(addr) = user.email.as_deref().filter(|a| !a.is_empty()) {
            let email = EmailTemplate::Approval {
                recipient: user.display_name().to_string(),
                lab_name,
                reserve_date: r.reserve_date,
                time_slot: r.time_slot.clone(),
                outcome: outcome.to_string(),
                note: note.unwrap_or("").to_string(),
            };
            self.dispatch_email(addr, email).await;
        }
    }

    /// Completion notice: in-app message only.
    async fn notify_completed(&self, r: &Reservation, rating: u8) {
        let Some(user) = self.users.find_user(r.user_id).await else {
            tracing::warn!("user {} not found, skipping notice for {}", r.user_id, r.id);
            return;
        };
        let lab_name = self.lab_display_name(r.lab_id).await;
        let content = format!(
            "Your reservation [{} - {} {}] is completed. Rating: {rating}/5.",
            lab_name, r.reserve_date, r.time_slot
        );
        self.dispatch_message(MessageDraft {
            receiver_id: user.id,
            kind: MessageKind::System,
            title: "Reservation completed".to_string(),
            content,
            related: Some(Related::Reservation(r.id)),
            priority: Priority::Normal,
        })
        .await;
    }

    /// Expiry notice: in-app message only.
    async fn notify_expired(&self, r: &Reservation) {
        let Some(user) = self.users.find_user(r.user_id).await else {
            tracing::warn!("user {} not found, skipping notice for {}", r.user_id, r.id);
            return;
        };
        let lab_name = self.lab_display_name(r.lab_id).await;
        let content = format!(
            "Your reservation ({}, {} {}) sat unreviewed past its date and was automatically cancelled.",
            lab_name, r.reserve_date, r.time_slot
        );
        self.dispatch_message(MessageDraft {
            receiver_id: user.id,
            kind: MessageKind::System,
            title: "Reservation expired".to_string(),
            content,
            related: Some(Related::Reservation(r.id)),
            priority: Priority::Normal,
        })
        .await;
    }

    // ── WAL maintenance ──────────────────────────────────────────

    /// Compact the WAL down to one `Created` event per surviving reservation
    /// (the record carries its full current state).
    pub async fn compact_wal(&self) -> Result<(), DomainError> {
        let mut events = Vec::new();
        let books: Vec<SharedLabBook> = self.books.iter().map(|e| e.value().clone()).collect();
        for book in books {
            let guard = book.read().await;
            for r in guard.iter() {
                events.push(Event::Created {
                    reservation: r.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| DomainError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| DomainError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| DomainError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_review_inputs(approver: &str, comment: Option<&str>) -> Result<(), DomainError> {
    if approver.len() > MAX_NAME_LEN {
        return Err(DomainError::LimitExceeded("approver name too long"));
    }
    if let Some(c) = comment
        && c.len() > MAX_TEXT_LEN {
            return Err(DomainError::LimitExceeded("comment too long"));
        }
    Ok(())
}
