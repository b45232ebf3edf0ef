use thiserror::Error;

/// Taxonomy of errors the sync core can produce.
///
/// `Cancelled` is internal only and must never reach a `StatusSink`.
/// Everything else either short-circuits a retry loop, triggers an
/// `AuthGate` transition, or falls back to a recovery path (see
/// `SyncEngine::download_note_list`).
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("authentication expired")]
    AuthExpired,

    #[error("authentication revoked")]
    AuthRevoked,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("note file not found: {0}")]
    NotFound(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl SyncError {
    /// Classify a raw error string the way `AuthGate` does.
    pub fn classify(message: &str) -> SyncError {
        let lower = message.to_lowercase();
        if lower.contains("invalid_grant")
            || lower.contains("unauthorized")
            || lower.contains("revoked")
            || lower.contains("401")
        {
            return SyncError::AuthRevoked;
        }
        if lower.contains("note file") && lower.contains("not found") {
            return SyncError::NotFound(message.to_string());
        }
        if lower.contains("not found") {
            return SyncError::NotFound(message.to_string());
        }
        SyncError::Transient(message.to_string())
    }

    /// Whether this error's message matches one of a retry profile's
    /// retryable substrings.
    pub fn matches_any(&self, substrings: &[&str]) -> bool {
        let text = self.to_string().to_lowercase();
        substrings.iter().any(|s| text.contains(&s.to_lowercase()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
