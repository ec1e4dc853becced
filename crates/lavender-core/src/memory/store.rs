//! ============================================================================
//! Memory Store - SQLite + FTS5 persistence
//! ============================================================================
//! Owns the on-disk database: schema, transactional CRUD, the full-text index,
//! soft-delete/archive semantics, import/export and stats.
//!
//! The FTS5 index is an external-content table kept in sync by triggers, so
//! every insert/update/delete on `memories` updates the index inside the same
//! transaction as the row change.
//! ============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{
    format_timestamp, new_short_id, ImportRecord, ListFilter, Memory, NewMemory, RecentMemory,
    SessionRecord, StoreStats, DEFAULT_CATEGORY, DEFAULT_IMPORTANCE, DEFAULT_PROJECT,
};
use crate::error::{LavenderError, Result};

/// Database file name inside the configured directory
pub const DB_FILE_NAME: &str = "lavender.db";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'discovery',
    project TEXT DEFAULT 'violet',
    tags TEXT DEFAULT '[]',
    importance INTEGER DEFAULT 5,
    mind_active TEXT,
    session_id TEXT,
    token_cost INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    archived INTEGER DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    title, content, category, tags,
    content=memories, content_rowid=rowid
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, title, content, category, tags)
    VALUES (new.rowid, new.title, new.content, new.category, new.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, category, tags)
    VALUES ('delete', old.rowid, old.title, old.content, old.category, old.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, title, content, category, tags)
    VALUES ('delete', old.rowid, old.title, old.content, old.category, old.tags);
    INSERT INTO memories_fts(rowid, title, content, category, tags)
    VALUES (new.rowid, new.title, new.content, new.category, new.tags);
END;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    summary TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    observation_count INTEGER DEFAULT 0,
    total_tokens INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS compact_history (
    id TEXT PRIMARY KEY,
    trigger_type TEXT NOT NULL,
    context_before INTEGER,
    context_after INTEGER,
    preserved_keys TEXT,
    created_at TEXT NOT NULL
);
"#;

const MEMORY_COLUMNS: &str = "m.id, m.title, m.content, m.category, m.project, m.tags, \
     m.importance, m.mind_active, m.session_id, m.token_cost, m.created_at, m.updated_at, \
     m.archived";

/// Memory store backed by a single SQLite connection
pub struct MemoryStore {
    conn: Mutex<Option<Connection>>,
    db_path: PathBuf,
}

impl MemoryStore {
    /// Create a store handle for `db_path`. Nothing is opened until
    /// [`MemoryStore::initialize`] is called.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            conn: Mutex::new(None),
            db_path: db_path.into(),
        }
    }

    /// Create and initialize in one step
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(db_path);
        store.initialize().await?;
        Ok(store)
    }

    /// Open the backing file and create the schema. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            debug!("Store at {} already initialized", self.db_path.display());
            return Ok(());
        }

        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LavenderError::StorageUnavailable(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        debug!("Opening database at {}", self.db_path.display());
        let conn = Connection::open(&self.db_path).map_err(|e| {
            LavenderError::StorageUnavailable(format!(
                "Failed to open {}: {}",
                self.db_path.display(),
                e
            ))
        })?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!("Memory store ready at {}", self.db_path.display());
        *guard = Some(conn);
        Ok(())
    }

    /// Release the connection. Later operations fail with `NotInitialized`.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| LavenderError::from(e))?;
            info!("Closed memory store at {}", self.db_path.display());
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn is_initialized(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    // ========================================================================
    // Memory Operations
    // ========================================================================

    /// Insert a new memory and return its id
    pub async fn store_memory(&self, memory: &NewMemory) -> Result<String> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let id = new_short_id();
        let now = format_timestamp(&Utc::now());
        let tags = serde_json::to_string(&memory.tags)?;

        conn.execute(
            "INSERT INTO memories
               (id, title, content, category, project, tags, importance,
                mind_active, session_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                memory.title,
                memory.content,
                memory.category,
                memory.project,
                tags,
                memory.importance,
                memory.mind_active,
                memory.session_id,
                now,
            ],
        )?;

        debug!("Stored memory {} ({})", id, memory.title);
        Ok(id)
    }

    /// Full-text search over title, content, category and tags.
    ///
    /// A blank query returns nothing. Query failures (including FTS syntax
    /// errors) are logged and also return nothing.
    pub async fn search_memories(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<Memory>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories m
             JOIN memories_fts ON m.rowid = memories_fts.rowid
             WHERE memories_fts MATCH ? AND m.archived = 0"
        );
        let mut args = vec![Value::Text(query.to_string())];
        if let Some(project) = project {
            sql.push_str(" AND m.project = ?");
            args.push(Value::Text(project.to_string()));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");
        args.push(Value::Integer(to_sql_int(limit)));

        match query_memories(conn, &sql, args) {
            Ok(memories) => {
                debug!("Search '{}' matched {} memories", query, memories.len());
                Ok(memories)
            }
            Err(e) => {
                debug!("Search '{}' failed, returning no results: {}", query, e);
                Ok(Vec::new())
            }
        }
    }

    /// Look up a single non-archived memory
    pub async fn recall_memory(&self, id: &str) -> Result<Option<Memory>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let memory = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.id = ?1 AND m.archived = 0"),
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// List non-archived memories, newest first
    pub async fn list_memories(&self, filter: &ListFilter) -> Result<Vec<Memory>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.archived = 0");
        let mut args = Vec::new();
        if let Some(project) = &filter.project {
            sql.push_str(" AND m.project = ?");
            args.push(Value::Text(project.clone()));
        }
        if let Some(category) = &filter.category {
            sql.push_str(" AND m.category = ?");
            args.push(Value::Text(category.clone()));
        }
        // Substring match against the serialized tag array, one clause per tag
        for tag in &filter.tags {
            sql.push_str(" AND m.tags LIKE ?");
            args.push(Value::Text(format!("%{}%", tag)));
        }
        sql.push_str(" ORDER BY m.created_at DESC, m.rowid DESC LIMIT ? OFFSET ?");
        args.push(Value::Integer(to_sql_int(filter.limit)));
        args.push(Value::Integer(to_sql_int(filter.offset)));

        Ok(query_memories(conn, &sql, args)?)
    }

    /// Archive (soft-delete) a memory. Matches by id only, so archiving an
    /// already-archived memory still reports `true`.
    pub async fn forget_memory(&self, id: &str) -> Result<bool> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let affected = conn.execute(
            "UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2",
            params![format_timestamp(&Utc::now()), id],
        )?;

        if affected > 0 {
            debug!("Archived memory {}", id);
        }
        Ok(affected > 0)
    }

    /// Most recent non-archived memories in compact form
    pub async fn recent_memories(&self, limit: usize) -> Result<Vec<RecentMemory>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let mut stmt = conn.prepare(
            "SELECT id, title, category, project, created_at FROM memories
             WHERE archived = 0 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![to_sql_int(limit)], |row| {
            Ok(RecentMemory {
                id: row.get(0)?,
                title: row.get(1)?,
                category: row.get(2)?,
                project: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
                created_at: parse_timestamp(row, 4)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let (total, tokens): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(token_cost), 0) FROM memories WHERE archived = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let archived: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE archived = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            total_memories: total.max(0) as u64,
            total_tokens: tokens,
            archived: archived.max(0) as u64,
            db_path: self.db_path.display().to_string(),
        })
    }

    // ========================================================================
    // Import / Export
    // ========================================================================

    /// Full records of every non-archived memory, optionally for one project
    pub async fn export_memories(&self, project: Option<&str>) -> Result<Vec<Memory>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories m WHERE m.archived = 0");
        let mut args = Vec::new();
        if let Some(project) = project {
            sql.push_str(" AND m.project = ?");
            args.push(Value::Text(project.to_string()));
        }
        sql.push_str(" ORDER BY m.created_at ASC, m.rowid ASC");

        let memories = query_memories(conn, &sql, args)?;
        info!("Exported {} memories", memories.len());
        Ok(memories)
    }

    /// Insert records whose id is not already present; existing ids are
    /// skipped untouched. Returns the number of records processed.
    pub async fn import_memories(&self, records: &[ImportRecord]) -> Result<usize> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(LavenderError::NotInitialized)?;

        let tx = conn.transaction()?;
        let mut processed = 0usize;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO memories
                   (id, title, content, category, project, tags, importance,
                    mind_active, session_id, token_cost, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for record in records {
                let now = Utc::now();
                let id = record
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(new_short_id);
                let created_at = record.created_at.unwrap_or(now);

                inserted += stmt.execute(params![
                    id,
                    record.title,
                    record.content,
                    record.category,
                    record.project,
                    serde_json::to_string(&record.tags)?,
                    record.importance,
                    record.mind_active,
                    record.session_id,
                    record.token_cost,
                    format_timestamp(&created_at),
                    format_timestamp(&now),
                ])?;
                processed += 1;
            }
        }
        tx.commit()?;

        info!(
            "Imported {} records ({} new, {} skipped as duplicates)",
            processed,
            inserted,
            processed - inserted
        );
        Ok(processed)
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Write (or overwrite) a durable session summary
    pub async fn save_session(&self, session: &SessionRecord) -> Result<()> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        conn.execute(
            "INSERT OR REPLACE INTO sessions
               (id, summary, started_at, ended_at, observation_count, total_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.summary,
                format_timestamp(&session.started_at),
                session.ended_at.as_ref().map(format_timestamp),
                session.observation_count,
                session.total_tokens,
            ],
        )?;

        debug!("Saved session {}", session.id);
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(LavenderError::NotInitialized)?;

        let session = conn
            .query_row(
                "SELECT id, summary, started_at, ended_at, observation_count, total_tokens
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    let ended_at = match row.get::<_, Option<String>>(3)? {
                        Some(_) => Some(parse_timestamp(row, 3)?),
                        None => None,
                    };
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        summary: row.get(1)?,
                        started_at: parse_timestamp(row, 2)?,
                        ended_at,
                        observation_count: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                        total_tokens: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn query_memories(conn: &Connection, sql: &str, args: Vec<Value>) -> rusqlite::Result<Vec<Memory>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_memory)?;
    rows.collect()
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let tags_raw: Option<String> = row.get(5)?;
    let tags = match tags_raw.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
    };

    Ok(Memory {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        project: row
            .get::<_, Option<String>>(4)?
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
        tags,
        importance: row.get::<_, Option<i64>>(6)?.unwrap_or(DEFAULT_IMPORTANCE),
        mind_active: row.get(7)?,
        session_id: row.get(8)?,
        token_cost: row.get::<_, Option<i64>>(9)?.unwrap_or(0),
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
        archived: row.get::<_, Option<i64>>(12)?.unwrap_or(0) != 0,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            warn!("Unparseable timestamp '{}' in column {}", raw, idx);
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
