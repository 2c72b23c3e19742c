use thiserror::Error;

/// Engine-level failure taxonomy. Workflow boundaries convert these into
/// user-facing replies; none of them may escape the dispatch loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("persistence: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }

    /// Reply shown to the user at the workflow boundary. Domain errors carry
    /// their own wording; infrastructure failures get a generic apology.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(m) | EngineError::NotFound(m) | EngineError::Duplicate(m) => {
                format!("❌ {m}.")
            }
            EngineError::Transport(_) => {
                "❌ Ocurrió un error de envío. Intenta de nuevo más tarde.".to_string()
            }
            EngineError::Persistence(_) => {
                "❌ Ocurrió un error interno al guardar los datos. Por favor, reporta este error."
                    .to_string()
            }
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
