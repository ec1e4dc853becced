//! ============================================================================
//! Configuration - Provider selection and storage location
//! ============================================================================
//! Defaults match a single-user install under `~/.violet/lavender`. Every
//! value can be overridden from the environment (the CLI loads `.env` first).
//! ============================================================================

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::encryption::PASSPHRASE_ENV;
use crate::memory::DB_FILE_NAME;

/// Suffix appended to the database file name for its sealed copy
pub const SEALED_SUFFIX: &str = ".enc";

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    /// Reserved for an on-device model; no backend yet
    Local,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            other => Err(format!("Unknown embedding provider: {}", other)),
        }
    }
}

/// Embedding provider selection and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub primary: ProviderKind,
    pub fallback: ProviderKind,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Gemini,
            fallback: ProviderKind::Local,
            gemini_api_key: None,
            openai_api_key: None,
        }
    }
}

/// Where the database lives and whether it is sealed at rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_dir: PathBuf,
    #[serde(default)]
    pub encryption_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            encryption_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LavenderConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LavenderConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .find(|v| !v.trim().is_empty())
        };

        let mut config = Self::default();
        config.provider.gemini_api_key = get(&["LAVENDER_GEMINI_API_KEY", "GEMINI_API_KEY"]);
        config.provider.openai_api_key = get(&["LAVENDER_OPENAI_API_KEY", "OPENAI_API_KEY"]);

        if let Some(kind) = get(&["LAVENDER_PROVIDER"]) {
            match kind.parse() {
                Ok(kind) => config.provider.primary = kind,
                Err(e) => warn!("Ignoring LAVENDER_PROVIDER: {}", e),
            }
        }
        if let Some(kind) = get(&["LAVENDER_FALLBACK_PROVIDER"]) {
            match kind.parse() {
                Ok(kind) => config.provider.fallback = kind,
                Err(e) => warn!("Ignoring LAVENDER_FALLBACK_PROVIDER: {}", e),
            }
        }

        if let Some(dir) = get(&["LAVENDER_DB_DIR"]) {
            config.storage.db_dir = PathBuf::from(dir);
        }
        config.storage.encryption_enabled = get(&[PASSPHRASE_ENV]).is_some();

        config
    }

    /// Override the database directory (CLI `--db-dir`)
    pub fn with_db_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.db_dir = dir.into();
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.db_dir.join(DB_FILE_NAME)
    }

    pub fn sealed_db_path(&self) -> PathBuf {
        self.storage
            .db_dir
            .join(format!("{}{}", DB_FILE_NAME, SEALED_SUFFIX))
    }
}

fn default_db_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".violet")
        .join("lavender")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LavenderConfig::from_lookup(lookup(&[]));
        assert_eq!(config.provider.primary, ProviderKind::Gemini);
        assert_eq!(config.provider.fallback, ProviderKind::Local);
        assert!(config.provider.gemini_api_key.is_none());
        assert!(!config.storage.encryption_enabled);
        assert!(config.storage.db_dir.ends_with(".violet/lavender"));
        assert!(config.db_path().ends_with("lavender/lavender.db"));
        assert!(config.sealed_db_path().ends_with("lavender/lavender.db.enc"));
    }

    #[test]
    fn test_prefixed_keys_win_over_generic() {
        let config = LavenderConfig::from_lookup(lookup(&[
            ("LAVENDER_GEMINI_API_KEY", "specific"),
            ("GEMINI_API_KEY", "generic"),
            ("OPENAI_API_KEY", "sk-generic"),
        ]));
        assert_eq!(config.provider.gemini_api_key.as_deref(), Some("specific"));
        assert_eq!(config.provider.openai_api_key.as_deref(), Some("sk-generic"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = LavenderConfig::from_lookup(lookup(&[
            ("LAVENDER_GEMINI_API_KEY", "  "),
            ("GEMINI_API_KEY", "fallback"),
            ("VIOLET_SOUL_KEY", ""),
        ]));
        assert_eq!(config.provider.gemini_api_key.as_deref(), Some("fallback"));
        assert!(!config.storage.encryption_enabled);
    }

    #[test]
    fn test_passphrase_enables_encryption_and_dir_override() {
        let config = LavenderConfig::from_lookup(lookup(&[
            ("VIOLET_SOUL_KEY", "hunter2"),
            ("LAVENDER_DB_DIR", "/tmp/lav"),
        ]));
        assert!(config.storage.encryption_enabled);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/lav/lavender.db"));

        let config = config.with_db_dir("/srv/mem");
        assert_eq!(config.sealed_db_path(), PathBuf::from("/srv/mem/lavender.db.enc"));
    }

    #[test]
    fn test_provider_kind_parsing() {
        let config = LavenderConfig::from_lookup(lookup(&[
            ("LAVENDER_PROVIDER", "OpenAI"),
            ("LAVENDER_FALLBACK_PROVIDER", "bogus"),
        ]));
        assert_eq!(config.provider.primary, ProviderKind::OpenAi);
        assert_eq!(config.provider.fallback, ProviderKind::Local);
        assert!("nope".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_serde_names() {
        assert_eq!(serde_json::to_string(&ProviderKind::OpenAi).unwrap(), "\"openai\"");
        let kind: ProviderKind = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
    }
}
