use chrono::NaiveDate;

use crate::model::{LabId, ReservationId, ReservationStatus, UserId};

/// Domain errors surfaced by lifecycle operations. Each variant maps to one
/// stable external signal at the API boundary.
#[derive(Debug)]
pub enum DomainError {
    UserNotFound(UserId),
    LabNotFound(LabId),
    /// Lab exists but is not open for booking (disabled or under maintenance).
    LabUnavailable(LabId),
    PastDate(NaiveDate),
    /// An active reservation already holds the scheduling key.
    SlotConflict {
        lab_id: LabId,
        date: NaiveDate,
        time_slot: String,
    },
    CapacityExceeded {
        requested: u32,
        capacity: u32,
    },
    NotFound(ReservationId),
    /// Transition not allowed from the reservation's current status. Covers
    /// terminal-state immutability as well.
    InvalidState {
        current: ReservationStatus,
    },
    InvalidRating(u8),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::UserNotFound(id) => write!(f, "user not found: {id}"),
            DomainError::LabNotFound(id) => write!(f, "lab not found: {id}"),
            DomainError::LabUnavailable(id) => write!(f, "lab {id} is not open for booking"),
            DomainError::PastDate(date) => write!(f, "cannot reserve a past date: {date}"),
            DomainError::SlotConflict {
                lab_id,
                date,
                time_slot,
            } => write!(f, "slot {time_slot} on {date} for lab {lab_id} is already taken"),
            DomainError::CapacityExceeded { requested, capacity } => {
                write!(f, "party of {requested} exceeds lab capacity {capacity}")
            }
            DomainError::NotFound(id) => write!(f, "reservation not found: {id}"),
            DomainError::InvalidState { current } => {
                write!(f, "transition not allowed from status: {current}")
            }
            DomainError::InvalidRating(r) => write!(f, "rating {r} outside 1-5"),
            DomainError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            DomainError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for DomainError {}
