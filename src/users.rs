use std::collections::HashMap;
use std::path::PathBuf;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::store;

/// Per-sender flags gating whether free-text handling is suppressed while an
/// admin decision is pending. Created lazily, never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    #[serde(default)]
    pub awaiting_payment_response: bool,
    #[serde(default)]
    pub pending_client_name: String,
    #[serde(default)]
    pub pending_client_number: String,
}

pub struct UserStateTracker {
    states: DashMap<String, UserState>,
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl UserStateTracker {
    pub fn open(path: PathBuf) -> EngineResult<Self> {
        let doc: HashMap<String, UserState> = store::load_document(&path)?;
        let states = DashMap::new();
        for (k, v) in doc {
            states.insert(k, v);
        }
        Ok(Self {
            states,
            path,
            write_gate: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn get(&self, id: &str) -> Option<UserState> {
        self.states.get(id).map(|s| s.clone())
    }

    async fn persist(&self) -> EngineResult<()> {
        let _gate = self.write_gate.lock().await;
        let doc: HashMap<String, UserState> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        store::persist_document(&self.path, &doc).await
    }

    /// First access creates the zero-value record; the entry API keeps
    /// concurrent calls for the same unseen sender from racing into two
    /// records. The fresh record is persisted before returning.
    pub async fn get_or_create(&self, id: &str) -> EngineResult<UserState> {
        let (state, created) = match self.states.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(o) => (o.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                (v.insert(UserState::default()).clone(), true)
            }
        };
        if created {
            self.persist().await?;
        }
        Ok(state)
    }

    pub async fn update<F>(&self, id: &str, apply: F) -> EngineResult<UserState>
    where
        F: FnOnce(&mut UserState),
    {
        let updated = {
            let mut state = self
                .states
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("usuario {id} desconocido")))?;
            apply(&mut state);
            state.clone()
        };
        self.persist().await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn lazy_creation_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = UserStateTracker::open(dir.path().join("usuarios.json")).unwrap();

        let state = tracker.get_or_create("+52100").await.unwrap();
        assert!(!state.awaiting_payment_response);
        assert_eq!(state.pending_client_name, "");

        tracker
            .update("+52100", |s| {
                s.awaiting_payment_response = true;
                s.pending_client_name = "Victoria".into();
            })
            .await
            .unwrap();
        let state = tracker.get("+52100").unwrap();
        assert!(state.awaiting_payment_response);
        assert_eq!(state.pending_client_name, "Victoria");

        assert!(matches!(
            tracker.update("+nadie", |_| {}).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let tracker =
            Arc::new(UserStateTracker::open(dir.path().join("usuarios.json")).unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move {
                t.get_or_create("+52555000").await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), UserState::default());
        }
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usuarios.json");
        {
            let tracker = UserStateTracker::open(path.clone()).unwrap();
            tracker.get_or_create("+52100").await.unwrap();
            tracker
                .update("+52100", |s| s.awaiting_payment_response = true)
                .await
                .unwrap();
        }
        let tracker = UserStateTracker::open(path).unwrap();
        assert!(tracker.get("+52100").unwrap().awaiting_payment_response);
    }
}
