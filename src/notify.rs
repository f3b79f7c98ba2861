use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ReservationId, UserId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    Important,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    System,
    Approval,
    Reminder,
}

/// Business entity a message points back at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Related {
    Reservation(ReservationId),
}

/// An in-app message as handed to the dispatch gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub receiver_id: UserId,
    pub kind: MessageKind,
    pub title: String,
    pub content: String,
    pub related: Option<Related>,
    pub priority: Priority,
}

/// Typed email payloads — one variant per template the core sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    /// Lifecycle outcome notice (approve/reject/cancel).
    Approval {
        recipient: String,
        lab_name: String,
        reserve_date: NaiveDate,
        time_slot: String,
        outcome: String,
        note: String,
    },
    /// Upcoming-reservation reminder.
    Reminder {
        recipient: String,
        lab_name: String,
        reserve_date: NaiveDate,
        time_slot: String,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayError(pub String);

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification gateway: {}", self.0)
    }
}

impl std::error::Error for GatewayError {}

/// Dispatch boundary for in-app messages and email. Implemented externally;
/// callers treat every error as non-fatal (log and continue).
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn create_message(&self, draft: MessageDraft) -> Result<(), GatewayError>;
    async fn send_email(&self, address: &str, email: EmailTemplate) -> Result<(), GatewayError>;
}

/// In-memory gateway: stores messages per receiver and fans each one out on a
/// per-receiver broadcast channel. Used by the daemon and by tests.
pub struct InMemoryGateway {
    messages: DashMap<UserId, Vec<MessageDraft>>,
    emails: std::sync::Mutex<Vec<(String, EmailTemplate)>>,
    channels: DashMap<UserId, broadcast::Sender<MessageDraft>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            emails: std::sync::Mutex::new(Vec::new()),
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a receiver's messages. Creates the channel if needed.
    pub fn subscribe(&self, receiver_id: UserId) -> broadcast::Receiver<MessageDraft> {
        let sender = self
            .channels
            .entry(receiver_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn messages_for(&self, receiver_id: UserId) -> Vec<MessageDraft> {
        self.messages
            .get(&receiver_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn sent_emails(&self) -> Vec<(String, EmailTemplate)> {
        self.emails.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationGateway for InMemoryGateway {
    async fn create_message(&self, draft: MessageDraft) -> Result<(), GatewayError> {
        if let Some(sender) = self.channels.get(&draft.receiver_id) {
            let _ = sender.send(draft.clone());
        }
        self.messages
            .entry(draft.receiver_id)
            .or_default()
            .push(draft);
        Ok(())
    }

    async fn send_email(&self, address: &str, email: EmailTemplate) -> Result<(), GatewayError> {
        self.emails
            .lock()
            .unwrap()
            .push((address.to_string(), email));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(receiver_id: UserId) -> MessageDraft {
        MessageDraft {
            receiver_id,
            kind: MessageKind::System,
            title: "t".into(),
            content: "c".into(),
            related: None,
            priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let gw = InMemoryGateway::new();
        let mut rx = gw.subscribe(42);

        gw.create_message(draft(42)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.receiver_id, 42);
        assert_eq!(gw.messages_for(42).len(), 1);
    }

    #[tokio::test]
    async fn message_without_subscriber_still_stored() {
        let gw = InMemoryGateway::new();
        gw.create_message(draft(7)).await.unwrap();
        assert_eq!(gw.messages_for(7).len(), 1);
        assert!(gw.messages_for(8).is_empty());
    }

    #[tokio::test]
    async fn emails_recorded() {
        let gw = InMemoryGateway::new();
        gw.send_email(
            "ada@example.edu",
            EmailTemplate::Reminder {
                recipient: "Ada".into(),
                lab_name: "Optics Lab".into(),
                reserve_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                time_slot: "08:00-10:00".into(),
            },
        )
        .await
        .unwrap();

        let emails = gw.sent_emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].0, "ada@example.edu");
    }
}
