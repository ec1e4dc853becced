// ============================================================================
// lavender - command-line front end for the Lavender memory store
// ============================================================================
// Usage:
//   lavender store "Title" "Content" [--tags '["a"]']   Store a memory
//   lavender search "query" [--limit 20]                  Full-text search
//   lavender recall ID | forget ID                        Fetch / archive one
//   lavender list [--project P] [--category C]            Browse memories
//   lavender export > backup.json | import backup.json    Backup and restore
//   lavender session-start | session-stop                 Host session hooks
//   lavender seal | unseal                                Encrypt at rest
//
// JSON goes to stdout, logs go to stderr. Set VIOLET_SOUL_KEY to keep the
// database sealed between invocations.
// ============================================================================

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lavender_core::encryption::{EncryptionLayer, SaltContext, SealedDatabase, PASSPHRASE_ENV};
use lavender_core::memory::{
    envelope, ImportRecord, ListFilter, MemoryManager, MemoryStore, NewMemory, StoreStats,
    DEFAULT_CATEGORY, DEFAULT_IMPORTANCE, DEFAULT_LIST_LIMIT, DEFAULT_PROJECT,
    DEFAULT_RECENT_LIMIT, DEFAULT_SEARCH_LIMIT,
};
use lavender_core::LavenderConfig;
use serde_json::Value;
use tracing::{debug, warn};

/// Lavender encrypted memory store
#[derive(Parser)]
#[command(name = "lavender", version, about = "Store, search and manage Lavender memories")]
struct Cli {
    /// Database directory (default: ~/.violet/lavender or $LAVENDER_DB_DIR)
    #[arg(long, global = true)]
    db_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new memory
    Store {
        title: String,
        content: String,
        #[arg(long, default_value = DEFAULT_CATEGORY)]
        category: String,
        #[arg(long, default_value = DEFAULT_PROJECT)]
        project: String,
        /// JSON array of tags, e.g. '["rust","sqlite"]'
        #[arg(long, default_value = "[]")]
        tags: String,
        #[arg(long, default_value_t = DEFAULT_IMPORTANCE)]
        importance: i64,
        #[arg(long)]
        mind_active: Option<String>,
    },

    /// Full-text search across memories (compact index)
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        #[arg(long)]
        project: Option<String>,
    },

    /// Print the full record for one memory
    Recall { id: String },

    /// List memories, newest first
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// JSON array of tags; each must appear in the memory's tags
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Archive (soft-delete) a memory
    Forget { id: String },

    /// Memory counts, session counters and provider status
    Stats,

    /// Export all memories as JSON
    Export {
        #[arg(long)]
        project: Option<String>,
    },

    /// Import memories from a JSON file (`-` reads stdin)
    Import { input: String },

    /// Most recent memories (compact view)
    Recent {
        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// One-line summary of the store
    Summary,

    /// Print the session preamble for a host session
    SessionStart,

    /// Print the session closing line
    SessionStop,

    /// Encrypt the database file and remove the plaintext copy
    Seal,

    /// Decrypt the sealed database file into place
    Unseal,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs on stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lavender_core=info".parse()?)
                .add_directive("lavender=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = LavenderConfig::from_env();
    if let Some(dir) = cli.db_dir {
        config = config.with_db_dir(dir);
    }
    debug!("Using database directory {}", config.storage.db_dir.display());

    match cli.command {
        Commands::SessionStart => cmd_session_start(&config).await,
        Commands::SessionStop => cmd_session_stop(&config).await,
        Commands::Seal => cmd_seal(&config),
        Commands::Unseal => cmd_unseal(&config),
        command => {
            if database_state(&config) == DbState::Locked {
                anyhow::bail!(
                    "{} is sealed. Set {} to unlock it.",
                    config.sealed_db_path().display(),
                    PASSPHRASE_ENV
                );
            }

            let sealed = sealed_database(&config)?;
            if let Some(sealed) = &sealed {
                sealed.unseal().context("Failed to unseal database")?;
            }

            let outcome = run_with_manager(&config, command).await;
            reseal(sealed.as_ref(), outcome)
        }
    }
}

/// What is on disk before a command touches the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbState {
    /// Neither a plaintext nor a sealed database exists
    Missing,
    /// Only a sealed copy exists and no passphrase is configured
    Locked,
    Present,
}

fn database_state(config: &LavenderConfig) -> DbState {
    if config.db_path().exists() {
        DbState::Present
    } else if !config.sealed_db_path().exists() {
        DbState::Missing
    } else if config.storage.encryption_enabled {
        DbState::Present
    } else {
        DbState::Locked
    }
}

/// Sealed-database handle when encryption is enabled
fn sealed_database(config: &LavenderConfig) -> Result<Option<SealedDatabase>> {
    if !config.storage.encryption_enabled {
        return Ok(None);
    }
    let layer = EncryptionLayer::new(None, SaltContext::Local)
        .context("Failed to initialize encryption")?;
    Ok(Some(SealedDatabase::new(
        config.db_path(),
        config.sealed_db_path(),
        layer,
    )))
}

/// Keep the first error; log the second so neither is lost
fn combine<T>(primary: Result<T>, secondary: Result<()>) -> Result<T> {
    match (primary, secondary) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(other)) => {
            warn!("{:#}", other);
            Err(e)
        }
    }
}

/// Seal the database again whatever happened since it was unsealed
fn reseal<T>(sealed: Option<&SealedDatabase>, outcome: Result<T>) -> Result<T> {
    match sealed {
        Some(sealed) => {
            let sealing = sealed
                .seal()
                .map(|_| ())
                .context("Failed to seal database");
            combine(outcome, sealing)
        }
        None => outcome,
    }
}

/// Open the manager, run one command, then persist the session and close
async fn run_with_manager(config: &LavenderConfig, command: Commands) -> Result<()> {
    let manager = MemoryManager::from_config(config)
        .await
        .context("Failed to open memory store")?;
    let outcome = run(&manager, command).await;

    if manager.session_writes() > 0 {
        if let Err(e) = manager.end_session().await {
            warn!("Failed to record session {}: {}", manager.session_id(), e);
        }
    }
    let closed = manager
        .close()
        .await
        .context("Failed to close memory store");
    combine(outcome, closed)
}

fn emit(value: &Value) {
    println!("{}", value);
}

/// Tags arrive as a JSON array string; anything unparseable means no tags
fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Ignoring malformed tags '{}': {}", raw, e);
        Vec::new()
    })
}

async fn run(manager: &MemoryManager, command: Commands) -> Result<()> {
    match command {
        Commands::Store {
            title,
            content,
            category,
            project,
            tags,
            importance,
            mind_active,
        } => {
            let mut memory = NewMemory::new(&title, content)
                .with_category(category)
                .with_project(project)
                .with_tags(parse_tags(&tags))
                .with_importance(importance);
            if let Some(mind) = mind_active.filter(|m| !m.is_empty()) {
                memory = memory.with_mind_active(mind);
            }
            let id = manager.store(memory).await?;
            emit(&envelope::stored(&id, &title));
        }

        Commands::Search {
            query,
            limit,
            project,
        } => {
            let results = manager
                .search(&query, limit, project.as_deref().filter(|p| !p.is_empty()))
                .await?;
            emit(&envelope::search_results(&results));
        }

        Commands::Recall { id } => match manager.recall(&id).await? {
            Some(memory) => emit(&serde_json::to_value(&memory)?),
            None => emit(&envelope::not_found(&id)),
        },

        Commands::List {
            project,
            category,
            tags,
            limit,
            offset,
        } => {
            let filter = ListFilter {
                project: project.filter(|p| !p.is_empty()),
                category: category.filter(|c| !c.is_empty()),
                tags: tags.as_deref().map(parse_tags).unwrap_or_default(),
                limit,
                offset,
            };
            let results = manager.list_all(&filter).await?;
            emit(&envelope::list_results(&results));
        }

        Commands::Forget { id } => {
            if manager.forget(&id).await? {
                emit(&envelope::archived(&id));
            } else {
                emit(&envelope::not_found(&id));
            }
        }

        Commands::Stats => {
            let stats = manager.stats().await?;
            emit(&serde_json::to_value(&stats)?);
        }

        Commands::Export { project } => {
            let memories = manager
                .export_all(project.as_deref().filter(|p| !p.is_empty()))
                .await?;
            emit(&envelope::exported(&memories));
        }

        Commands::Import { input } => {
            let raw = read_input(&input)?;
            match parse_import(&raw) {
                Some(records) => {
                    let count = manager.import_all(&records).await?;
                    emit(&envelope::imported(count));
                }
                None => emit(&envelope::invalid_json()),
            }
        }

        Commands::Recent { limit } => {
            let recent = manager.recent(limit).await?;
            emit(&envelope::recent(&recent));
        }

        Commands::Summary => {
            println!("{}", manager.session_summary().await?);
        }

        Commands::SessionStart | Commands::SessionStop | Commands::Seal | Commands::Unseal => {
            anyhow::bail!("Session and seal commands run without an open store")
        }
    }

    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
    }
}

/// Accepts a bare array of records or an export envelope (`{"memories": [...]}`)
fn parse_import(raw: &str) -> Option<Vec<ImportRecord>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let records = match value {
        Value::Object(mut map) => map.remove("memories")?,
        other => other,
    };
    match serde_json::from_value(records) {
        Ok(records) => Some(records),
        Err(e) => {
            warn!("Import payload rejected: {}", e);
            None
        }
    }
}

// ============================================================================
// Session hooks
// ============================================================================

async fn cmd_session_start(config: &LavenderConfig) -> Result<()> {
    let lines = match database_state(config) {
        DbState::Missing => envelope::session_start_lines(None, None),
        DbState::Locked => vec![envelope::sealed_notice_line()],
        DbState::Present => {
            let (stats, last) = read_summary(config).await?;
            envelope::session_start_lines(Some(&stats), last.as_deref())
        }
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

async fn cmd_session_stop(config: &LavenderConfig) -> Result<()> {
    match database_state(config) {
        DbState::Missing => {}
        DbState::Locked => println!("{}", envelope::sealed_notice_line()),
        DbState::Present => {
            let (stats, _) = read_summary(config).await?;
            println!("{}", envelope::session_stop_line(&stats));
        }
    }
    Ok(())
}

/// Stats and latest title, unsealing and re-sealing around the read
async fn read_summary(config: &LavenderConfig) -> Result<(StoreStats, Option<String>)> {
    let sealed = sealed_database(config)?;
    if let Some(sealed) = &sealed {
        sealed.unseal().context("Failed to unseal database")?;
    }

    let outcome = async {
        let store = MemoryStore::open(config.db_path())
            .await
            .context("Failed to open memory store")?;
        let summary = store_summary(&store).await;
        let closed = store.close().await.context("Failed to close memory store");
        combine(summary, closed)
    }
    .await;
    reseal(sealed.as_ref(), outcome)
}

async fn store_summary(store: &MemoryStore) -> Result<(StoreStats, Option<String>)> {
    let stats = store.get_stats().await?;
    let recent = store.recent_memories(1).await?;
    Ok((stats, recent.into_iter().next().map(|r| r.title)))
}

// ============================================================================
// Encryption at rest
// ============================================================================

fn require_sealed(config: &LavenderConfig) -> Result<SealedDatabase> {
    let layer = EncryptionLayer::new(None, SaltContext::Local)
        .context("Sealing requires VIOLET_SOUL_KEY")?;
    Ok(SealedDatabase::new(
        config.db_path(),
        config.sealed_db_path(),
        layer,
    ))
}

fn cmd_seal(config: &LavenderConfig) -> Result<()> {
    let sealed = require_sealed(config)?;
    let done = sealed.seal()?;
    emit(&serde_json::json!({
        "status": if done { "sealed" } else { "nothing to seal" },
        "path": sealed.sealed_path().display().to_string(),
    }));
    Ok(())
}

fn cmd_unseal(config: &LavenderConfig) -> Result<()> {
    let sealed = require_sealed(config)?;
    let done = sealed.unseal()?;
    emit(&serde_json::json!({
        "status": if done { "unsealed" } else { "nothing to unseal" },
        "path": sealed.plain_path().display().to_string(),
    }));
    Ok(())
}
