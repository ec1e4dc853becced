//! ============================================================================
//! LAVENDER-CORE: Encrypted local memory
//! ============================================================================
//! This crate handles all backend logic for the Lavender memory store:
//! - SQLite persistence with a full-text index
//! - AES-256-GCM encryption with Argon2id key derivation
//! - Pluggable embedding providers (Gemini, OpenAI)
//! - Session-aware memory manager
//! ============================================================================

pub mod config;
pub mod encryption;
pub mod error;
pub mod memory;

// Re-export main types for convenience
pub use config::{LavenderConfig, ProviderConfig, ProviderKind, StorageConfig};
pub use encryption::{EncryptionLayer, SaltContext, SealedDatabase};
pub use error::{LavenderError, Result};
pub use memory::{MemoryManager, MemoryStore};
