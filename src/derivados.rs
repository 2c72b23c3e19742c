use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::store;

/// Named grouping/escalation reference, independent of billing data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Derivado {
    pub name: String,
    pub created: NaiveDate,
    #[serde(default)]
    pub clients: Vec<String>,
}

pub struct DerivadoStore {
    entries: DashMap<String, Derivado>,
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl DerivadoStore {
    pub fn open(path: PathBuf) -> EngineResult<Self> {
        let doc: HashMap<String, Derivado> = store::load_document(&path)?;
        let entries = DashMap::new();
        for (k, v) in doc {
            entries.insert(k, v);
        }
        Ok(Self {
            entries,
            path,
            write_gate: Mutex::new(()),
        })
    }

    async fn persist(&self) -> EngineResult<()> {
        let _gate = self.write_gate.lock().await;
        let doc: HashMap<String, Derivado> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        store::persist_document(&self.path, &doc).await
    }

    pub async fn add(&self, name: &str) -> EngineResult<()> {
        let key = name.to_lowercase();
        match self.entries.entry(key) {
            Entry::Occupied(_) => {
                return Err(EngineError::Duplicate(format!("el derivado {name} ya existe")))
            }
            Entry::Vacant(v) => {
                v.insert(Derivado {
                    name: name.to_string(),
                    created: chrono::Local::now().date_naive(),
                    clients: Vec::new(),
                });
            }
        }
        self.persist().await
    }

    pub async fn remove(&self, name: &str) -> EngineResult<()> {
        self.entries
            .remove(&name.to_lowercase())
            .ok_or_else(|| EngineError::NotFound(format!("derivado {name} no encontrado")))?;
        self.persist().await
    }

    pub fn list(&self) -> Vec<Derivado> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_remove_list_keyed_by_lowercase() {
        let dir = tempfile::tempdir().unwrap();
        let derivados = DerivadoStore::open(dir.path().join("derivados.json")).unwrap();

        derivados.add("Soporte MX").await.unwrap();
        assert!(matches!(
            derivados.add("soporte mx").await,
            Err(EngineError::Duplicate(_))
        ));

        let listed = derivados.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Soporte MX");
        assert!(listed[0].clients.is_empty());

        assert!(matches!(
            derivados.remove("otro").await,
            Err(EngineError::NotFound(_))
        ));
        derivados.remove("SOPORTE MX").await.unwrap();
        assert!(derivados.list().is_empty());
    }
}
