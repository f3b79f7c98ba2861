use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type UserId = i64;
pub type LabId = i64;
pub type ReservationId = Ulid;

/// Reservation lifecycle states. Wire codes 0–4 are the external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn code(&self) -> u8 {
        match self {
            ReservationStatus::Pending => 0,
            ReservationStatus::Approved => 1,
            ReservationStatus::Rejected => 2,
            ReservationStatus::Cancelled => 3,
            ReservationStatus::Completed => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReservationStatus::Pending),
            1 => Some(ReservationStatus::Approved),
            2 => Some(ReservationStatus::Rejected),
            3 => Some(ReservationStatus::Cancelled),
            4 => Some(ReservationStatus::Completed),
            _ => None,
        }
    }

    /// Active reservations are the only ones that occupy a scheduling key.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Rejected | ReservationStatus::Cancelled | ReservationStatus::Completed
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// The four reminder lead-time classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    DayAhead,
    HourAhead,
    Imminent,
    SameDay,
}

/// A single lab reservation. The scheduling key is `(lab_id, reserve_date,
/// time_slot)`; at most one *active* reservation may hold a given key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub lab_id: LabId,
    pub reserve_date: NaiveDate,
    /// Literal slot string, e.g. "08:00-10:00". Conflict detection compares
    /// this string verbatim; overlap of non-identical slots is not detected.
    pub time_slot: String,
    pub people_num: u32,
    pub purpose: Option<String>,
    pub status: ReservationStatus,
    pub approver: Option<String>,
    pub approve_comment: Option<String>,
    pub approve_time: Option<NaiveDateTime>,
    pub cancel_reason: Option<String>,
    /// 1–5, set on completion only.
    pub rating: Option<u8>,
    pub comment: Option<String>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
    /// Lead-time classes already delivered — the exactly-once marker.
    pub reminders_sent: BTreeSet<ReminderKind>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Parsed start of the slot, if the slot string is well formed.
    pub fn slot_start(&self) -> Result<NaiveTime, SlotParseError> {
        parse_slot(&self.time_slot).map(|(start, _)| start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotParseError {
    pub slot: String,
}

impl std::fmt::Display for SlotParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed time slot: {:?}", self.slot)
    }
}

impl std::error::Error for SlotParseError {}

/// Parse a `"HH:MM-HH:MM"` slot string into (start, end).
pub fn parse_slot(slot: &str) -> Result<(NaiveTime, NaiveTime), SlotParseError> {
    let err = || SlotParseError { slot: slot.to_string() };
    let (start_s, end_s) = slot.split_once('-').ok_or_else(err)?;
    let start = NaiveTime::parse_from_str(start_s.trim(), "%H:%M").map_err(|_| err())?;
    let end = NaiveTime::parse_from_str(end_s.trim(), "%H:%M").map_err(|_| err())?;
    Ok((start, end))
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// `Created` carries the full record so compaction can re-emit current state
/// as a single event per reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created {
        reservation: Reservation,
    },
    Approved {
        id: ReservationId,
        approver: String,
        comment: Option<String>,
        at: NaiveDateTime,
    },
    Rejected {
        id: ReservationId,
        approver: String,
        comment: Option<String>,
        at: NaiveDateTime,
    },
    Cancelled {
        id: ReservationId,
        reason: Option<String>,
        at: NaiveDateTime,
    },
    Completed {
        id: ReservationId,
        rating: u8,
        comment: Option<String>,
        at: NaiveDateTime,
    },
    Updated {
        id: ReservationId,
        reserve_date: NaiveDate,
        time_slot: String,
        people_num: u32,
        purpose: Option<String>,
        at: NaiveDateTime,
    },
    Deleted {
        id: ReservationId,
    },
    ReminderSent {
        id: ReservationId,
        kind: ReminderKind,
    },
}

impl Event {
    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Event::Created { reservation } => reservation.id,
            Event::Approved { id, .. }
            | Event::Rejected { id, .. }
            | Event::Cancelled { id, .. }
            | Event::Completed { id, .. }
            | Event::Updated { id, .. }
            | Event::Deleted { id }
            | Event::ReminderSent { id, .. } => *id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Per-user reservation counters. `total` counts only Approved+Completed
/// (the original reporting convention); the per-status fields count all five
/// statuses separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UserStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub cancelled: usize,
    pub completed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample(status: ReservationStatus) -> Reservation {
        let t = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Reservation {
            id: Ulid::new(),
            user_id: 1,
            lab_id: 1,
            reserve_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            time_slot: "08:00-10:00".into(),
            people_num: 4,
            purpose: Some("optics".into()),
            status,
            approver: None,
            approve_comment: None,
            approve_time: None,
            cancel_reason: None,
            rating: None,
            comment: None,
            create_time: t,
            update_time: t,
            reminders_sent: BTreeSet::new(),
        }
    }

    #[test]
    fn status_codes_roundtrip() {
        for code in 0..=4u8 {
            let status = ReservationStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(ReservationStatus::from_code(5).is_none());
    }

    #[test]
    fn active_and_terminal_partition() {
        use ReservationStatus::*;
        for status in [Pending, Approved, Rejected, Cancelled, Completed] {
            assert_ne!(status.is_active(), status.is_terminal());
        }
        assert!(Pending.is_active());
        assert!(Approved.is_active());
        assert!(Rejected.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(Completed.is_terminal());
    }

    #[test]
    fn parse_slot_well_formed() {
        let (start, end) = parse_slot("08:00-10:00").unwrap();
        assert_eq!(start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(end, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn parse_slot_tolerates_spaces() {
        let (start, _) = parse_slot("14:30 - 16:00").unwrap();
        assert_eq!(start, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    }

    #[test]
    fn parse_slot_malformed() {
        assert!(parse_slot("morning").is_err());
        assert!(parse_slot("08:00").is_err());
        assert!(parse_slot("8am-10am").is_err());
        assert!(parse_slot("25:00-26:00").is_err());
        assert!(parse_slot("").is_err());
    }

    #[test]
    fn slot_start_from_reservation() {
        let r = sample(ReservationStatus::Approved);
        assert_eq!(r.slot_start().unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::Created {
            reservation: sample(ReservationStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn reminder_marker_event_roundtrip() {
        let event = Event::ReminderSent {
            id: Ulid::new(),
            kind: ReminderKind::HourAhead,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_reservation_id_extraction() {
        let r = sample(ReservationStatus::Pending);
        let id = r.id;
        assert_eq!(Event::Created { reservation: r }.reservation_id(), id);
        assert_eq!(Event::Deleted { id }.reservation_id(), id);
    }
}
