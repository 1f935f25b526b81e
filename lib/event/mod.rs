//! Event lookups consumed by the orchestrator.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::Event;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Read access to the events the orchestrator schedules experiments for.
///
/// Event administration (CRUD) is out of scope; the orchestrator only
/// resolves events and reads their policy.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Resolves an event by its unique name.
    async fn get_event_by_name(&self, name: &str) -> Option<Event>;

    /// Resolves an event by id.
    async fn get_event_by_id(&self, id: i64) -> Option<Event>;

    /// Lists every known event.
    async fn list_events(&self) -> Vec<Event>;

    /// Returns true if the user administers the event. Administrators get
    /// per-template admission instead of per-event admission.
    async fn is_admin(&self, event_id: i64, user_id: &str) -> bool;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    admins: HashSet<(i64, String)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an event.
    pub async fn insert_event(&self, event: Event) {
        let mut inner = self.inner.write().await;
        inner.events.retain(|e| e.id != event.id);
        inner.events.push(event);
    }

    /// Marks a user as an administrator of an event.
    pub async fn add_admin(&self, event_id: i64, user_id: &str) {
        let mut inner = self.inner.write().await;
        inner.admins.insert((event_id, user_id.to_string()));
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_event_by_name(&self, name: &str) -> Option<Event> {
        let inner = self.inner.read().await;
        inner.events.iter().find(|e| e.name == name).cloned()
    }

    async fn get_event_by_id(&self, id: i64) -> Option<Event> {
        let inner = self.inner.read().await;
        inner.events.iter().find(|e| e.id == id).cloned()
    }

    async fn list_events(&self) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner.events.clone()
    }

    async fn is_admin(&self, event_id: i64, user_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.admins.contains(&(event_id, user_id.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
