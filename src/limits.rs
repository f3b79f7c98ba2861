//! Hard caps on user-supplied input. All checks surface as
//! `DomainError::LimitExceeded` with a static reason.

/// Longest accepted time-slot string ("HH:MM-HH:MM" is 11 bytes; leave slack
/// for spacing variants).
pub const MAX_SLOT_LEN: usize = 32;

/// Longest accepted purpose / comment / reason text.
pub const MAX_TEXT_LEN: usize = 1024;

/// Longest accepted approver name.
pub const MAX_NAME_LEN: usize = 256;

/// Upper bound on reservations held per lab (all statuses). Keeps a single
/// lab's book from growing without bound under abuse.
pub const MAX_RESERVATIONS_PER_LAB: usize = 100_000;

/// How far into the future a reservation date may lie, in days.
pub const MAX_ADVANCE_DAYS: i64 = 365;
