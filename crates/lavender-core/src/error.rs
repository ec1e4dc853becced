//! ============================================================================
//! Error Types - Failure taxonomy for the memory core
//! ============================================================================
//! Storage-integrity failures are always surfaced to the caller. Provider
//! failures are absorbed inside the embedding layer and only appear here so
//! status reporting can name them.
//! ============================================================================

/// Errors returned by the storage, encryption and orchestration layers
#[derive(Debug, thiserror::Error)]
pub enum LavenderError {
    /// A required secret or configuration value is absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The backing database file cannot be created, opened, read or written
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Operation attempted before `initialize()` or after `close()`
    #[error("Store not initialized - call initialize() first")]
    NotInitialized,

    /// Encrypted payload is malformed (too short, bad encoding, bad UTF-8)
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// AEAD tag check failed: tampered data or wrong key
    #[error("Authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,

    /// Embedding backend could not be reached or returned garbage
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for LavenderError {
    fn from(e: rusqlite::Error) -> Self {
        LavenderError::StorageUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for LavenderError {
    fn from(e: std::io::Error) -> Self {
        LavenderError::StorageUnavailable(e.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LavenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_map_to_storage_unavailable() {
        let err: LavenderError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, LavenderError::StorageUnavailable(_)));
    }

    #[test]
    fn test_io_errors_map_to_storage_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LavenderError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
