pub mod clock;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reminder;
pub mod scheduler;
pub mod wal;

pub use engine::{CreateReservation, DomainError, Engine, UpdateReservation};
