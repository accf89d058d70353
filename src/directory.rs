use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

/// A directory entry: the display name the chain reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: Ulid,
    pub name: String,
}

/// Source of truth for users and teams. The engine stores only ids;
/// names and existence checks go through this seam so a real deployment
/// can back it with LDAP, an HR feed, or another service.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user(&self, id: Ulid) -> Option<Contact>;
    async fn team(&self, id: Ulid) -> Option<Contact>;
}

/// In-memory directory for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users: DashMap<Ulid, Contact>,
    teams: DashMap<Ulid, Contact>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: Ulid, name: &str) {
        self.users.insert(id, Contact { id, name: name.to_string() });
    }

    pub fn add_team(&self, id: Ulid, name: &str) {
        self.teams.insert(id, Contact { id, name: name.to_string() });
    }

    pub fn remove_user(&self, id: Ulid) {
        self.users.remove(&id);
    }

    pub fn remove_team(&self, id: Ulid) {
        self.teams.remove(&id);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn user(&self, id: Ulid) -> Option<Contact> {
        self.users.get(&id).map(|c| c.clone())
    }

    async fn team(&self, id: Ulid) -> Option<Contact> {
        self.teams.get(&id).map(|c| c.clone())
    }
}
