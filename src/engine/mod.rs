mod book;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use book::LabBook;
pub use error::DomainError;
pub use mutations::{CreateReservation, EXPIRE_REASON, UpdateReservation};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::clock::Clock;
use crate::directory::{LabDirectory, UserDirectory};
use crate::model::*;
use crate::notify::NotificationGateway;
use crate::wal::Wal;

pub type SharedLabBook = Arc<RwLock<LabBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation lifecycle engine. One `LabBook` (behind an RwLock) per
/// lab; the conflict check and the state mutation happen under the same
/// write lock, so no two concurrent creates can both pass the check.
pub struct Engine {
    pub(super) books: DashMap<LabId, SharedLabBook>,
    /// Reverse lookup: reservation id → lab id.
    pub(super) lab_of: DashMap<ReservationId, LabId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) labs: Arc<dyn LabDirectory>,
    pub(crate) gateway: Arc<dyn NotificationGateway>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Apply an event to a LabBook (no locking — caller holds the lock).
fn apply_to_book(book: &mut LabBook, event: &Event) {
    match event {
        Event::Created { reservation } => {
            book.insert(reservation.clone());
        }
        Event::Approved {
            id,
            approver,
            comment,
            at,
        } => {
            if let Some(r) = book.get_mut(id) {
                r.status = ReservationStatus::Approved;
                r.approver = Some(approver.clone());
                r.approve_comment = comment.clone();
                r.approve_time = Some(*at);
                r.update_time = *at;
            }
        }
        Event::Rejected {
            id,
            approver,
            comment,
            at,
        } => {
            if let Some(r) = book.get_mut(id) {
                r.status = ReservationStatus::Rejected;
                r.approver = Some(approver.clone());
                r.approve_comment = comment.clone();
                r.approve_time = Some(*at);
                r.update_time = *at;
            }
        }
        Event::Cancelled { id, reason, at } => {
            if let Some(r) = book.get_mut(id) {
                r.status = ReservationStatus::Cancelled;
                r.cancel_reason = reason.clone();
                r.update_time = *at;
            }
        }
        Event::Completed {
            id,
            rating,
            comment,
            at,
        } => {
            if let Some(r) = book.get_mut(id) {
                r.status = ReservationStatus::Completed;
                r.rating = Some(*rating);
                r.comment = comment.clone();
                r.update_time = *at;
            }
        }
        Event::Updated {
            id,
            reserve_date,
            time_slot,
            people_num,
            purpose,
            at,
        } => {
            // Scheduling key may change — remove and reinsert to keep order.
            if let Some(mut r) = book.remove(id) {
                r.reserve_date = *reserve_date;
                r.time_slot = time_slot.clone();
                r.people_num = *people_num;
                r.purpose = purpose.clone();
                r.update_time = *at;
                book.insert(r);
            }
        }
        Event::Deleted { id } => {
            book.remove(id);
        }
        Event::ReminderSent { id, kind } => {
            if let Some(r) = book.get_mut(id) {
                r.reminders_sent.insert(*kind);
            }
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        users: Arc<dyn UserDirectory>,
        labs: Arc<dyn LabDirectory>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            books: DashMap::new(),
            lab_of: DashMap::new(),
            wal_tx,
            users,
            labs,
            gateway,
            clock,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context.
        for event in &events {
            match event {
                Event::Created { reservation } => {
                    let book = engine.book(reservation.lab_id);
                    let mut guard = book.try_write().expect("replay: uncontended write");
                    engine.lab_of.insert(reservation.id, reservation.lab_id);
                    apply_to_book(&mut guard, event);
                }
                Event::Deleted { id } => {
                    if let Some((_, lab_id)) = engine.lab_of.remove(id)
                        && let Some(entry) = engine.books.get(&lab_id) {
                            let book = entry.value().clone();
                            let mut guard = book.try_write().expect("replay: uncontended write");
                            apply_to_book(&mut guard, event);
                        }
                }
                other => {
                    let id = other.reservation_id();
                    if let Some(lab_id) = engine.lab_for(&id)
                        && let Some(entry) = engine.books.get(&lab_id) {
                            let book = entry.value().clone();
                            let mut guard = book.try_write().expect("replay: uncontended write");
                            apply_to_book(&mut guard, other);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), DomainError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| DomainError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| DomainError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| DomainError::WalError(e.to_string()))
    }

    /// The book for a lab, created lazily on first use.
    pub(super) fn book(&self, lab_id: LabId) -> SharedLabBook {
        self.books
            .entry(lab_id)
            .or_insert_with(|| Arc::new(RwLock::new(LabBook::new(lab_id))))
            .value()
            .clone()
    }

    pub fn lab_for(&self, id: &ReservationId) -> Option<LabId> {
        self.lab_of.get(id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut LabBook,
        event: &Event,
    ) -> Result<(), DomainError> {
        self.wal_append(event).await?;
        apply_to_book(book, event);
        Ok(())
    }

    /// Lookup reservation → lab, acquire the book's write lock.
    pub(super) async fn resolve_write(
        &self,
        id: &ReservationId,
    ) -> Result<(LabId, tokio::sync::OwnedRwLockWriteGuard<LabBook>), DomainError> {
        let lab_id = self.lab_for(id).ok_or(DomainError::NotFound(*id))?;
        let book = self.book(lab_id);
        let guard = book.write_owned().await;
        Ok((lab_id, guard))
    }
}
