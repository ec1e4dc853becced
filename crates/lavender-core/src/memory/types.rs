//! ============================================================================
//! Memory Types - Records, filters and status structures
//! ============================================================================
//! Defines the stored memory record, write/import payloads, list filters and
//! the aggregate stats reported by the store and the manager.
//! ============================================================================

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_CATEGORY: &str = "discovery";
pub const DEFAULT_PROJECT: &str = "violet";
pub const DEFAULT_IMPORTANCE: i64 = 5;
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Length of the short hex ids handed out for memories and sessions
pub const ID_LEN: usize = 12;

/// Fresh short opaque id (first 12 hex chars of a v4 UUID)
pub fn new_short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(ID_LEN);
    id
}

/// Timestamp format written to the database. Fixed-width so that text
/// ordering matches chronological ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A single memory entry stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique, immutable identifier
    pub id: String,
    pub title: String,
    /// Ground-truth payload
    pub content: String,
    /// Free-form tag, e.g. "discovery", "decision"
    pub category: String,
    /// Namespace the memory belongs to
    pub project: String,
    pub tags: Vec<String>,
    /// 1-10 by convention; not enforced
    pub importance: i64,
    /// Which persona/mind was active when the memory was written
    pub mind_active: Option<String>,
    pub session_id: Option<String>,
    pub token_cost: i64,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation, including archive
    pub updated_at: DateTime<Utc>,
    /// Soft-delete flag
    pub archived: bool,
}

/// Payload for a new memory write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub title: String,
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: i64,
    #[serde(default)]
    pub mind_active: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl NewMemory {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: DEFAULT_CATEGORY.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            tags: Vec::new(),
            importance: DEFAULT_IMPORTANCE,
            mind_active: None,
            session_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: i64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_mind_active(mut self, mind: impl Into<String>) -> Self {
        self.mind_active = Some(mind.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One record of an import batch. Accepts the export shape; everything but
/// `title` and `content` is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_project")]
    pub project: String,
    /// Either a JSON array or a JSON-array-encoded string
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: i64,
    #[serde(default)]
    pub mind_active: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub token_cost: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<Memory> for ImportRecord {
    fn from(m: Memory) -> Self {
        Self {
            id: Some(m.id),
            title: m.title,
            content: m.content,
            category: m.category,
            project: m.project,
            tags: m.tags,
            importance: m.importance,
            mind_active: m.mind_active,
            session_id: m.session_id,
            token_cost: m.token_cost,
            created_at: Some(m.created_at),
        }
    }
}

/// Compact projection used by `recent` and the session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentMemory {
    pub id: String,
    pub title: String,
    pub category: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
}

/// Durable session summary row, written explicitly at session end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub observation_count: i64,
    pub total_tokens: i64,
}

/// Filters for listing memories
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter {
    pub project: Option<String>,
    pub category: Option<String>,
    /// Each tag must appear somewhere in the stored tag blob (substring match)
    pub tags: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            project: None,
            category: None,
            tags: Vec::new(),
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

/// Aggregate store statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Non-archived records
    pub total_memories: u64,
    /// Sum of `token_cost` over non-archived records
    pub total_tokens: i64,
    pub archived: u64,
    pub db_path: String,
}

/// Embedding provider status as reported by `stats`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Store stats merged with session and provider status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub session_id: String,
    pub session_writes: u64,
    pub embedding_provider: ProviderHealth,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_importance() -> i64 {
    DEFAULT_IMPORTANCE
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        List(Vec<String>),
        Encoded(String),
        Missing(()),
    }

    match Tags::deserialize(deserializer)? {
        Tags::List(tags) => Ok(tags),
        Tags::Encoded(s) if s.trim().is_empty() => Ok(Vec::new()),
        Tags::Encoded(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        Tags::Missing(()) => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ids_are_hex_and_unique() {
        let a = new_short_id();
        let b = new_short_id();
        assert_eq!(a.len(), ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_memory_defaults() {
        let m = NewMemory::new("Title", "Body");
        assert_eq!(m.category, "discovery");
        assert_eq!(m.project, "violet");
        assert_eq!(m.importance, 5);
        assert!(m.tags.is_empty());
        assert!(m.session_id.is_none());
    }

    #[test]
    fn test_import_record_minimal_json() {
        let rec: ImportRecord =
            serde_json::from_str(r#"{"title": "t", "content": "c"}"#).unwrap();
        assert!(rec.id.is_none());
        assert_eq!(rec.category, DEFAULT_CATEGORY);
        assert_eq!(rec.project, DEFAULT_PROJECT);
        assert_eq!(rec.importance, DEFAULT_IMPORTANCE);
        assert_eq!(rec.token_cost, 0);
        assert!(rec.tags.is_empty());
        assert!(rec.created_at.is_none());
    }

    #[test]
    fn test_import_record_accepts_encoded_tags() {
        let rec: ImportRecord =
            serde_json::from_str(r#"{"title": "t", "content": "c", "tags": "[\"a\", \"b\"]"}"#)
                .unwrap();
        assert_eq!(rec.tags, vec!["a", "b"]);

        let rec: ImportRecord =
            serde_json::from_str(r#"{"title": "t", "content": "c", "tags": ["x"]}"#).unwrap();
        assert_eq!(rec.tags, vec!["x"]);

        let rec: ImportRecord =
            serde_json::from_str(r#"{"title": "t", "content": "c", "tags": null}"#).unwrap();
        assert!(rec.tags.is_empty());
    }

    #[test]
    fn test_import_record_rejects_missing_content() {
        assert!(serde_json::from_str::<ImportRecord>(r#"{"title": "t"}"#).is_err());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.5+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&a), "2026-01-02T03:04:05.000000Z");
        assert!(format_timestamp(&a) < format_timestamp(&b));
    }

    #[test]
    fn test_manager_stats_flattens_store_stats() {
        let stats = ManagerStats {
            store: StoreStats {
                total_memories: 2,
                total_tokens: 0,
                archived: 1,
                db_path: "/tmp/lavender.db".into(),
            },
            session_id: "abc".into(),
            session_writes: 2,
            embedding_provider: ProviderHealth::default(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_memories"], 2);
        assert_eq!(json["archived"], 1);
        assert_eq!(json["embedding_provider"], serde_json::json!({"available": false}));
    }
}
