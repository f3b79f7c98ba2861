use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{LabId, UserId};

/// A user as seen by the reservation core. Owned by the external user
/// directory; only the fields the core reads are mirrored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub real_name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl User {
    /// Name used in notification text: real name when known, else username.
    pub fn display_name(&self) -> &str {
        self.real_name.as_deref().unwrap_or(&self.username)
    }

    /// Address reminders/emails may be sent to, if any.
    pub fn verified_email(&self) -> Option<&str> {
        match &self.email {
            Some(addr) if !addr.is_empty() && self.email_verified => Some(addr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabStatus {
    Disabled,
    Available,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Laboratory {
    pub id: LabId,
    pub name: String,
    pub capacity: u32,
    pub status: LabStatus,
}

impl Laboratory {
    pub fn is_bookable(&self) -> bool {
        self.status == LabStatus::Available
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: UserId) -> Option<User>;
}

#[async_trait]
pub trait LabDirectory: Send + Sync {
    async fn find_lab(&self, id: LabId) -> Option<Laboratory>;
}

/// In-memory directory used by the daemon (seeded from a JSON file) and by
/// tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, User>,
    labs: DashMap<LabId, Laboratory>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Directory churn: a user removed upstream stops resolving here.
    pub fn remove_user(&self, id: UserId) {
        self.users.remove(&id);
    }

    pub fn insert_lab(&self, lab: Laboratory) {
        self.labs.insert(lab.id, lab);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl LabDirectory for InMemoryDirectory {
    async fn find_lab(&self, id: LabId) -> Option<Laboratory> {
        self.labs.get(&id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_email_requires_verification_and_presence() {
        let mut u = User {
            id: 1,
            username: "s2021001".into(),
            real_name: Some("Ada".into()),
            email: Some("ada@example.edu".into()),
            email_verified: true,
        };
        assert_eq!(u.verified_email(), Some("ada@example.edu"));

        u.email_verified = false;
        assert_eq!(u.verified_email(), None);

        u.email_verified = true;
        u.email = Some(String::new());
        assert_eq!(u.verified_email(), None);

        u.email = None;
        assert_eq!(u.verified_email(), None);
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let u = User {
            id: 1,
            username: "s2021001".into(),
            real_name: None,
            email: None,
            email_verified: false,
        };
        assert_eq!(u.display_name(), "s2021001");
    }

    #[tokio::test]
    async fn in_memory_directory_lookup() {
        let dir = InMemoryDirectory::new();
        dir.insert_lab(Laboratory {
            id: 7,
            name: "Optics Lab".into(),
            capacity: 20,
            status: LabStatus::Available,
        });

        let lab = dir.find_lab(7).await.unwrap();
        assert!(lab.is_bookable());
        assert!(dir.find_lab(8).await.is_none());
    }
}
