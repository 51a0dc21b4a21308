// libs/booking-cell/src/session.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::services::wizard::BookingWizard;

/// In-memory wizard sessions, one per in-progress booking. Each session's
/// events are serialized through its own Mutex, so an external payment
/// callback is just another queued event and never interrupts an
/// in-progress transition.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<BookingWizard>>>>,
    by_appointment: RwLock<HashMap<Uuid, Uuid>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(BookingWizard::new())));
        debug!("Created booking session {}", session_id);
        session_id
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<Mutex<BookingWizard>>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if removed {
            self.by_appointment
                .write()
                .await
                .retain(|_, owner| *owner != session_id);
            debug!("Removed booking session {}", session_id);
        }
        removed
    }

    /// Route payment callbacks to the owning session. Called whenever a
    /// snapshot (and with it an appointment code) exists for a session.
    pub async fn register_appointment_code(&self, appointment_code: Uuid, session_id: Uuid) {
        self.by_appointment
            .write()
            .await
            .insert(appointment_code, session_id);
    }

    pub async fn find_by_appointment_code(&self, appointment_code: Uuid) -> Option<Arc<Mutex<BookingWizard>>> {
        let session_id = self
            .by_appointment
            .read()
            .await
            .get(&appointment_code)
            .copied()?;
        self.get(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_created_and_removed() {
        let store = SessionStore::new();
        let id = store.create().await;

        assert!(store.get(id).await.is_some());
        assert!(store.remove(id).await);
        assert!(store.get(id).await.is_none());
        assert!(!store.remove(id).await);
    }

    #[tokio::test]
    async fn appointment_codes_route_to_owning_session() {
        let store = SessionStore::new();
        let session_id = store.create().await;
        let code = Uuid::new_v4();

        store.register_appointment_code(code, session_id).await;
        assert!(store.find_by_appointment_code(code).await.is_some());

        store.remove(session_id).await;
        assert!(store.find_by_appointment_code(code).await.is_none());
    }
}
