use chrono::NaiveDate;

use crate::model::LabId;

use super::{DomainError, LabBook};

/// True iff an active reservation already holds `(date, slot)` in this book.
///
/// The slot string is compared verbatim — "08:00-10:00" and "09:00-11:00"
/// do not conflict even though the intervals overlap. This mirrors the
/// documented scheduling-key semantics; interval-overlap detection would be
/// an observable behavior change.
pub(crate) fn slot_taken(book: &LabBook, date: NaiveDate, slot: &str) -> bool {
    book.on_date(date)
        .any(|r| r.is_active() && r.time_slot == slot)
}

/// Guard form: raises SlotConflict. Caller must hold the book's write lock
/// for the check to extend atomically over the subsequent insert.
pub(crate) fn check_no_conflict(
    book: &LabBook,
    lab_id: LabId,
    date: NaiveDate,
    slot: &str,
) -> Result<(), DomainError> {
    if slot_taken(book, date, slot) {
        return Err(DomainError::SlotConflict {
            lab_id,
            date,
            time_slot: slot.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Reservation, ReservationStatus};
    use std::collections::BTreeSet;
    use ulid::Ulid;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn entry(d: u32, slot: &str, status: ReservationStatus) -> Reservation {
        let t = date(1).and_hms_opt(9, 0, 0).unwrap();
        Reservation {
            id: Ulid::new(),
            user_id: 1,
            lab_id: 1,
            reserve_date: date(d),
            time_slot: slot.into(),
            people_num: 2,
            purpose: None,
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
    fn identical_key_conflicts() {
        let mut book = LabBook::new(1);
        book.insert(entry(2, "08:00-10:00", ReservationStatus::Pending));
        assert!(slot_taken(&book, date(2), "08:00-10:00"));
        assert!(check_no_conflict(&book, 1, date(2), "08:00-10:00").is_err());
    }

    #[test]
    fn overlapping_but_different_string_does_not_conflict() {
        let mut book = LabBook::new(1);
        book.insert(entry(2, "08:00-10:00", ReservationStatus::Approved));
        // Interval overlap, different literal string: not detected.
        assert!(!slot_taken(&book, date(2), "09:00-11:00"));
    }

    #[test]
    fn other_date_or_slot_is_free() {
        let mut book = LabBook::new(1);
        book.insert(entry(2, "08:00-10:00", ReservationStatus::Approved));
        assert!(!slot_taken(&book, date(3), "08:00-10:00"));
        assert!(!slot_taken(&book, date(2), "10:00-12:00"));
    }

    #[test]
    fn inactive_statuses_release_the_slot() {
        for status in [
            ReservationStatus::Rejected,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            let mut book = LabBook::new(1);
            book.insert(entry(2, "08:00-10:00", status));
            assert!(!slot_taken(&book, date(2), "08:00-10:00"), "{status}");
        }
    }

    #[test]
    fn both_active_statuses_occupy() {
        for status in [ReservationStatus::Pending, ReservationStatus::Approved] {
            let mut book = LabBook::new(1);
            book.insert(entry(2, "08:00-10:00", status));
            assert!(slot_taken(&book, date(2), "08:00-10:00"), "{status}");
        }
    }
}
