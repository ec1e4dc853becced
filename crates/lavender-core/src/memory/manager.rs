//! ============================================================================
//! Memory Manager - Orchestrates memory storage and retrieval
//! ============================================================================
//! High-level API over the store and the optional embedding provider. Owns
//! the session identity and the per-session write counter.
//! ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::embeddings::{create_embedding_provider, EmbeddingProvider};
use super::envelope::summary_line;
use super::store::MemoryStore;
use super::types::{
    new_short_id, ImportRecord, ListFilter, ManagerStats, Memory, NewMemory, ProviderHealth,
    RecentMemory, SessionRecord,
};
use crate::config::LavenderConfig;
use crate::error::Result;

/// Memory manager combining store and embeddings
pub struct MemoryManager {
    store: MemoryStore,
    embeddings: Option<Box<dyn EmbeddingProvider>>,
    session_id: String,
    session_start: DateTime<Utc>,
    session_writes: AtomicU64,
}

impl MemoryManager {
    /// Wrap an initialized store. A fresh session id is generated.
    pub fn new(store: MemoryStore, embeddings: Option<Box<dyn EmbeddingProvider>>) -> Self {
        let session_id = new_short_id();
        debug!(
            "Starting session {} (embeddings: {})",
            session_id,
            embeddings.as_ref().map(|e| e.name()).unwrap_or("none")
        );

        Self {
            store,
            embeddings,
            session_id,
            session_start: Utc::now(),
            session_writes: AtomicU64::new(0),
        }
    }

    /// Open the configured database and pick an embedding provider
    pub async fn from_config(config: &LavenderConfig) -> Result<Self> {
        let store = MemoryStore::open(config.db_path()).await?;
        let embeddings = create_embedding_provider(&config.provider);
        Ok(Self::new(store, embeddings))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    pub fn session_writes(&self) -> u64 {
        self.session_writes.load(Ordering::Relaxed)
    }

    pub fn store_handle(&self) -> &MemoryStore {
        &self.store
    }

    // ========================================================================
    // Memory Operations
    // ========================================================================

    /// Store a new memory and return its id.
    ///
    /// When a provider is configured the text is embedded first. The vector
    /// is not persisted yet; the call only warms the provider and surfaces
    /// its health in the logs.
    pub async fn store(&self, mut memory: NewMemory) -> Result<String> {
        if let Some(embeddings) = &self.embeddings {
            let vector = embeddings
                .embed(&format!("{} {}", memory.title, memory.content))
                .await;
            if vector.iter().all(|v| *v == 0.0) {
                debug!("Embedding for '{}' fell back to zero vector", memory.title);
            } else {
                debug!("Embedded '{}' ({} dims)", memory.title, vector.len());
            }
        }

        if memory.session_id.as_deref().map_or(true, str::is_empty) {
            memory.session_id = Some(self.session_id.clone());
        }

        let id = self.store.store_memory(&memory).await?;
        let writes = self.session_writes.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "Stored memory {} '{}' (session {}, write #{})",
            id, memory.title, self.session_id, writes
        );
        Ok(id)
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<Memory>> {
        debug!("Searching memories: '{}' (limit {})", query, limit);
        self.store.search_memories(query, limit, project).await
    }

    pub async fn recall(&self, id: &str) -> Result<Option<Memory>> {
        self.store.recall_memory(id).await
    }

    pub async fn list_all(&self, filter: &ListFilter) -> Result<Vec<Memory>> {
        self.store.list_memories(filter).await
    }

    pub async fn forget(&self, id: &str) -> Result<bool> {
        let archived = self.store.forget_memory(id).await?;
        if archived {
            info!("Archived memory {}", id);
        }
        Ok(archived)
    }

    pub async fn export_all(&self, project: Option<&str>) -> Result<Vec<Memory>> {
        self.store.export_memories(project).await
    }

    pub async fn import_all(&self, records: &[ImportRecord]) -> Result<usize> {
        self.store.import_memories(records).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<RecentMemory>> {
        self.store.recent_memories(limit).await
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Store stats plus session counters and provider health
    pub async fn stats(&self) -> Result<ManagerStats> {
        let store = self.store.get_stats().await?;
        let embedding_provider = self.provider_health().await;

        Ok(ManagerStats {
            store,
            session_id: self.session_id.clone(),
            session_writes: self.session_writes(),
            embedding_provider,
        })
    }

    async fn provider_health(&self) -> ProviderHealth {
        let Some(embeddings) = &self.embeddings else {
            return ProviderHealth::default();
        };

        let name = embeddings.name().to_string();
        if embeddings.health_check().await {
            ProviderHealth {
                available: true,
                provider: Some(name),
                error: None,
            }
        } else {
            warn!("Embedding provider {} failed its health check", name);
            ProviderHealth {
                available: false,
                error: Some(format!("{} health check failed", name)),
                provider: Some(name),
            }
        }
    }

    /// One-line summary of the store for a host session preamble
    pub async fn session_summary(&self) -> Result<String> {
        let recent = self.store.recent_memories(1).await?;
        let stats = self.store.get_stats().await?;
        Ok(summary_line(
            stats.total_memories,
            recent.first().map(|r| r.title.as_str()),
        ))
    }

    /// Persist this session's counters to the `sessions` table
    pub async fn end_session(&self) -> Result<SessionRecord> {
        let record = SessionRecord {
            id: self.session_id.clone(),
            summary: Some(self.session_summary().await?),
            started_at: self.session_start,
            ended_at: Some(Utc::now()),
            observation_count: i64::try_from(self.session_writes()).unwrap_or(i64::MAX),
            total_tokens: 0,
        };
        self.store.save_session(&record).await?;

        info!(
            "Session {} ended after {} writes",
            record.id, record.observation_count
        );
        Ok(record)
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
