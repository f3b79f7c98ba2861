use chrono::NaiveDate;

use crate::model::*;

use super::conflict::slot_taken;
use super::{Engine, SharedLabBook};

impl Engine {
    async fn snapshot_books(&self) -> Vec<SharedLabBook> {
        self.books.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn find(&self, id: ReservationId) -> Option<Reservation> {
        let lab_id = self.lab_for(&id)?;
        let book = self.books.get(&lab_id)?.value().clone();
        let guard = book.read().await;
        guard.get(&id).cloned()
    }

    pub async fn find_by_user(&self, user_id: UserId) -> Vec<Reservation> {
        let mut out = Vec::new();
        for book in self.snapshot_books().await {
            let guard = book.read().await;
            out.extend(guard.iter().filter(|r| r.user_id == user_id).cloned());
        }
        out.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        out
    }

    /// All reservations for a lab, in (date, slot) order.
    pub async fn find_by_lab(&self, lab_id: LabId) -> Vec<Reservation> {
        let Some(entry) = self.books.get(&lab_id) else {
            return Vec::new();
        };
        let book = entry.value().clone();
        drop(entry);
        let guard = book.read().await;
        guard.iter().cloned().collect()
    }

    pub async fn find_by_lab_and_date(
        &self,
        lab_id: LabId,
        date: NaiveDate,
    ) -> Vec<Reservation> {
        let Some(entry) = self.books.get(&lab_id) else {
            return Vec::new();
        };
        let book = entry.value().clone();
        drop(entry);
        let guard = book.read().await;
        guard.on_date(date).cloned().collect()
    }

    pub async fn find_by_status(&self, status: ReservationStatus) -> Vec<Reservation> {
        let mut out = Vec::new();
        for book in self.snapshot_books().await {
            let guard = book.read().await;
            out.extend(guard.iter().filter(|r| r.status == status).cloned());
        }
        out
    }

    /// The review queue: Pending reservations, oldest first.
    pub async fn pending_reservations(&self) -> Vec<Reservation> {
        let mut out = self.find_by_status(ReservationStatus::Pending).await;
        out.sort_by(|a, b| a.create_time.cmp(&b.create_time));
        out
    }

    /// Approved reservations on a given date, across all labs. This is what
    /// the reminder scans iterate.
    pub async fn approved_on(&self, date: NaiveDate) -> Vec<Reservation> {
        let mut out = Vec::new();
        for book in self.snapshot_books().await {
            let guard = book.read().await;
            out.extend(
                guard
                    .on_date(date)
                    .filter(|r| r.status == ReservationStatus::Approved)
                    .cloned(),
            );
        }
        out
    }

    /// Availability probe: true iff the slot is already held by an active
    /// reservation. Advisory only — creation re-checks under the write lock.
    pub async fn check_conflict(&self, lab_id: LabId, date: NaiveDate, slot: &str) -> bool {
        let Some(entry) = self.books.get(&lab_id) else {
            return false;
        };
        let book = entry.value().clone();
        drop(entry);
        let guard = book.read().await;
        slot_taken(&guard, date, slot)
    }

    /// A user's usage count: Approved and Completed reservations only —
    /// pending and rejected attempts don't count against usage.
    pub async fn count_by_user(&self, user_id: UserId) -> usize {
        let mut n = 0;
        for book in self.snapshot_books().await {
            let guard = book.read().await;
            n += guard
                .iter()
                .filter(|r| {
                    r.user_id == user_id
                        && matches!(
                            r.status,
                            ReservationStatus::Approved | ReservationStatus::Completed
                        )
                })
                .count();
        }
        n
    }

    /// A lab's usage count, same Approved+Completed rule as `count_by_user`.
    pub async fn count_by_lab(&self, lab_id: LabId) -> usize {
        let Some(entry) = self.books.get(&lab_id) else {
            return 0;
        };
        let book = entry.value().clone();
        drop(entry);
        let guard = book.read().await;
        guard
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    ReservationStatus::Approved | ReservationStatus::Completed
                )
            })
            .count()
    }

    /// Per-status breakdown for a user. `total` deliberately uses the usage
    /// rule (Approved + Completed), so it is NOT the sum of the other fields.
    pub async fn user_stats(&self, user_id: UserId) -> UserStats {
        let mut stats = UserStats::default();
        for book in self.snapshot_books().await {
            let guard = book.read().await;
            for r in guard.iter().filter(|r| r.user_id == user_id) {
                match r.status {
                    ReservationStatus::Pending => stats.pending += 1,
                    ReservationStatus::Approved => stats.approved += 1,
                    ReservationStatus::Rejected => stats.rejected += 1,
                    ReservationStatus::Cancelled => stats.cancelled += 1,
                    ReservationStatus::Completed => stats.completed += 1,
                }
            }
        }
        stats.total = stats.approved + stats.completed;
        stats
    }
}
