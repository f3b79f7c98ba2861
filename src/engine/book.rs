use chrono::NaiveDate;

use crate::model::{LabId, Reservation, ReservationId};

/// All reservations for one lab, sorted by `(reserve_date, time_slot)`.
/// The engine serializes every mutation of a book behind its RwLock, which is
/// what makes the conflict check-then-insert atomic per lab.
#[derive(Debug)]
pub struct LabBook {
    pub lab_id: LabId,
    entries: Vec<Reservation>,
}

impl LabBook {
    pub fn new(lab_id: LabId) -> Self {
        Self {
            lab_id,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert maintaining sort order by (date, slot).
    pub fn insert(&mut self, reservation: Reservation) {
        let key = (reservation.reserve_date, reservation.time_slot.clone());
        let pos = self
            .entries
            .partition_point(|r| (r.reserve_date, r.time_slot.as_str()) < (key.0, key.1.as_str()));
        self.entries.insert(pos, reservation);
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut Reservation> {
        self.entries.iter_mut().find(|r| r.id == *id)
    }

    pub fn remove(&mut self, id: &ReservationId) -> Option<Reservation> {
        let pos = self.entries.iter().position(|r| r.id == *id)?;
        Some(self.entries.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.entries.iter()
    }

    /// Reservations on `date`, in slot order. Binary search skips the rest of
    /// the book.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        let lo = self.entries.partition_point(|r| r.reserve_date < date);
        let hi = self.entries.partition_point(|r| r.reserve_date <= date);
        self.entries[lo..hi].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationStatus;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use ulid::Ulid;

    fn entry(date: (i32, u32, u32), slot: &str) -> Reservation {
        let t = NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Reservation {
            id: Ulid::new(),
            user_id: 1,
            lab_id: 1,
            reserve_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            time_slot: slot.into(),
            people_num: 2,
            purpose: None,
            status: ReservationStatus::Pending,
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
    fn insert_keeps_date_then_slot_order() {
        let mut book = LabBook::new(1);
        book.insert(entry((2025, 6, 2), "10:00-12:00"));
        book.insert(entry((2025, 6, 1), "14:00-16:00"));
        book.insert(entry((2025, 6, 2), "08:00-10:00"));
        book.insert(entry((2025, 6, 1), "08:00-10:00"));

        let keys: Vec<_> = book
            .iter()
            .map(|r| (r.reserve_date, r.time_slot.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn on_date_selects_only_that_date() {
        let mut book = LabBook::new(1);
        book.insert(entry((2025, 6, 1), "08:00-10:00"));
        book.insert(entry((2025, 6, 2), "08:00-10:00"));
        book.insert(entry((2025, 6, 2), "10:00-12:00"));
        book.insert(entry((2025, 6, 3), "08:00-10:00"));

        let hits: Vec<_> = book
            .on_date(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
            .collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.reserve_date
            == NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()));
    }

    #[test]
    fn on_date_empty_for_unbooked_date() {
        let mut book = LabBook::new(1);
        book.insert(entry((2025, 6, 1), "08:00-10:00"));
        assert_eq!(
            book.on_date(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()).count(),
            0
        );
    }

    #[test]
    fn remove_and_get() {
        let mut book = LabBook::new(1);
        let r = entry((2025, 6, 1), "08:00-10:00");
        let id = r.id;
        book.insert(r);

        assert!(book.get(&id).is_some());
        let removed = book.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(book.get(&id).is_none());
        assert!(book.remove(&id).is_none());
    }
}
