//! JSON response envelopes for the command-line transport.
//!
//! Each builder returns a `serde_json::Value`; callers print it as one line
//! on stdout.

use serde_json::{json, Value};

use super::types::{Memory, RecentMemory, StoreStats};
use crate::encryption::PASSPHRASE_ENV;

/// Prefix on every human-readable status line
pub const SUMMARY_PREFIX: &str = "[Lavender]";

/// Max characters of the last title shown in a session summary
pub const SUMMARY_TITLE_CHARS: usize = 40;

pub fn stored(id: &str, title: &str) -> Value {
    json!({"status": "stored", "id": id, "title": title})
}

/// Compact search index: id, title, category and the creation date
pub fn search_results(results: &[Memory]) -> Value {
    let compact: Vec<Value> = results
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "title": m.title,
                "category": m.category,
                "created": m.created_at.format("%Y-%m-%d").to_string(),
            })
        })
        .collect();
    json!({"count": compact.len(), "results": compact})
}

pub fn list_results(results: &[Memory]) -> Value {
    let compact: Vec<Value> = results
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "title": m.title,
                "category": m.category,
                "project": m.project,
            })
        })
        .collect();
    json!({"count": compact.len(), "results": compact})
}

pub fn not_found(id: &str) -> Value {
    json!({"error": format!("Memory {} not found", id)})
}

pub fn archived(id: &str) -> Value {
    json!({"status": "archived", "id": id})
}

pub fn exported(memories: &[Memory]) -> Value {
    json!({"count": memories.len(), "memories": memories})
}

pub fn imported(count: usize) -> Value {
    json!({"status": "imported", "count": count})
}

pub fn invalid_json() -> Value {
    json!({"error": "Invalid JSON input"})
}

pub fn recent(memories: &[RecentMemory]) -> Value {
    json!(memories)
}

/// One-line summary: total count plus the (truncated) latest title
pub fn summary_line(total: u64, last_title: Option<&str>) -> String {
    let title: String = match last_title {
        Some(t) => t.chars().take(SUMMARY_TITLE_CHARS).collect(),
        None => "none".to_string(),
    };
    format!("{} {} memories | Last: \"{}\"", SUMMARY_PREFIX, total, title)
}

/// Lines printed when a host session starts. `None` stats means no database
/// exists yet.
pub fn session_start_lines(stats: Option<&StoreStats>, last_title: Option<&str>) -> Vec<String> {
    match stats {
        None => vec![format!(
            "{} No memory database found. Starting fresh.",
            SUMMARY_PREFIX
        )],
        Some(stats) => vec![
            format!(
                "{} {} memories | Last: \"{}\"",
                SUMMARY_PREFIX,
                stats.total_memories,
                last_title.unwrap_or("no memories yet")
            ),
            "Use `lavender search` / `lavender recall` to access memories on demand.".to_string(),
        ],
    }
}

pub fn session_stop_line(stats: &StoreStats) -> String {
    format!(
        "{} Session ended. {} memories stored.",
        SUMMARY_PREFIX, stats.total_memories
    )
}

/// Printed by the session hooks when only the sealed copy exists and no
/// passphrase is set
pub fn sealed_notice_line() -> String {
    format!(
        "{} Memory database is sealed. Set {} to unlock it.",
        SUMMARY_PREFIX, PASSPHRASE_ENV
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::NewMemory;
    use chrono::{TimeZone, Utc};

    fn memory(id: &str, title: &str) -> Memory {
        let new = NewMemory::new(title, "body").with_project("lavender");
        let ts = Utc.with_ymd_and_hms(2026, 4, 5, 6, 7, 8).unwrap();
        Memory {
            id: id.to_string(),
            title: new.title,
            content: new.content,
            category: new.category,
            project: new.project,
            tags: vec!["t".into()],
            importance: new.importance,
            mind_active: None,
            session_id: Some("s1".into()),
            token_cost: 0,
            created_at: ts,
            updated_at: ts,
            archived: false,
        }
    }

    fn stats(total: u64) -> StoreStats {
        StoreStats {
            total_memories: total,
            total_tokens: 0,
            archived: 0,
            db_path: "/tmp/lavender.db".into(),
        }
    }

    #[test]
    fn test_search_envelope_is_compact() {
        let value = search_results(&[memory("abc", "Title")]);
        assert_eq!(value["count"], 1);
        assert_eq!(
            value["results"][0],
            json!({"id": "abc", "title": "Title", "category": "discovery", "created": "2026-04-05"})
        );
    }

    #[test]
    fn test_list_envelope_carries_project() {
        let value = list_results(&[memory("a", "x"), memory("b", "y")]);
        assert_eq!(value["count"], 2);
        assert_eq!(value["results"][1]["project"], "lavender");
        assert!(value["results"][1].get("content").is_none());
    }

    #[test]
    fn test_status_envelopes() {
        assert_eq!(stored("id1", "T"), json!({"status": "stored", "id": "id1", "title": "T"}));
        assert_eq!(archived("id1"), json!({"status": "archived", "id": "id1"}));
        assert_eq!(not_found("zz"), json!({"error": "Memory zz not found"}));
        assert_eq!(imported(3), json!({"status": "imported", "count": 3}));
        assert_eq!(invalid_json(), json!({"error": "Invalid JSON input"}));
    }

    #[test]
    fn test_export_envelope_holds_full_records() {
        let value = exported(&[memory("a", "x")]);
        assert_eq!(value["count"], 1);
        assert_eq!(value["memories"][0]["content"], "body");
        assert_eq!(value["memories"][0]["tags"], json!(["t"]));
    }

    #[test]
    fn test_summary_line_truncates_by_characters() {
        assert_eq!(summary_line(0, None), "[Lavender] 0 memories | Last: \"none\"");

        let long = "é".repeat(50);
        let line = summary_line(7, Some(&long));
        assert!(line.starts_with("[Lavender] 7 memories | Last: \""));
        assert_eq!(line.matches('é').count(), SUMMARY_TITLE_CHARS);
    }

    #[test]
    fn test_session_lines() {
        assert_eq!(
            session_start_lines(None, None),
            vec!["[Lavender] No memory database found. Starting fresh."]
        );

        let lines = session_start_lines(Some(&stats(2)), Some("latest"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[Lavender] 2 memories | Last: \"latest\"");

        let lines = session_start_lines(Some(&stats(0)), None);
        assert!(lines[0].ends_with("\"no memories yet\""));

        assert_eq!(
            session_stop_line(&stats(4)),
            "[Lavender] Session ended. 4 memories stored."
        );
    }

    #[test]
    fn test_sealed_notice_names_the_key() {
        let line = sealed_notice_line();
        assert!(line.starts_with(SUMMARY_PREFIX));
        assert!(line.contains(PASSPHRASE_ENV));
    }
}
