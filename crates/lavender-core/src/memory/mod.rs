//! ============================================================================
//! Memory Module - Persistent, searchable memory for Lavender
//! ============================================================================
//! Stores memories in a local SQLite database with a full-text index and
//! soft-delete semantics. An optional embedding provider is consulted on
//! every write.
//!
//! ## Architecture
//! ```text
//! Caller → MemoryManager → EmbeddingProvider (best effort)
//!                ↓
//!          MemoryStore → SQLite (memories + memories_fts)
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use lavender_core::memory::{MemoryManager, MemoryStore, NewMemory};
//!
//! let store = MemoryStore::open(db_path).await?;
//! let manager = MemoryManager::new(store, None);
//!
//! let id = manager.store(NewMemory::new("Title", "Body").with_tags(["rust"])).await?;
//! let hits = manager.search("body", 20, None).await?;
//! ```
//! ============================================================================

mod embeddings;
pub mod envelope;
mod manager;
mod store;
mod types;

// Re-export public types
pub use embeddings::{
    create_embedding_provider, EmbeddingProvider, GeminiProvider, OpenAiProvider, GEMINI_DIM,
    OPENAI_DIM,
};
pub use manager::MemoryManager;
pub use store::{MemoryStore, DB_FILE_NAME};
pub use types::{
    ImportRecord, ListFilter, ManagerStats, Memory, NewMemory, ProviderHealth, RecentMemory,
    SessionRecord, StoreStats, DEFAULT_CATEGORY, DEFAULT_IMPORTANCE, DEFAULT_LIST_LIMIT,
    DEFAULT_PROJECT, DEFAULT_RECENT_LIMIT, DEFAULT_SEARCH_LIMIT,
};
