use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Atomic whole-file replace: write a sibling temp file, then rename over
/// the target. Readers never observe a half-written document.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}{}", path.display(), TEMP_FILE_SUFFIX));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize a keyed document and replace the backing file off the async
/// runtime. Completes before the caller's mutation reports success.
pub async fn persist_document<V: Serialize>(
    path: &Path,
    doc: &HashMap<String, V>,
) -> EngineResult<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| EngineError::Persistence(format!("persist join: {e}")))??;
    Ok(())
}

/// Read a keyed document fully into memory. A missing file is an empty
/// document, not an error; a corrupt one is a persistence failure.
pub fn load_document<V: DeserializeOwned>(path: &Path) -> EngineResult<HashMap<String, V>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&text)?)
}
