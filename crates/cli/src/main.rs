//! docvault command-line tool.
//!
//! Operator commands over a document store: inspect a document's metadata,
//! take or release soft locks, check content integrity, list conflict
//! artifacts, and generate / validate configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use docvault_core::codec::{Codec, DocumentFormat, JsonCodec, TomlCodec};
use docvault_core::config::{VaultConfig, LOG_ENV};
use docvault_core::models::FileMetadata;
use docvault_core::VersionedStore;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// docvault command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "docvault",
    version,
    about = "Inspect and manage a versioned document store"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Store root, overriding the config file and DOCVAULT_ROOT.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./docvault.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show a document's version and lock state.
    Status {
        /// Document path, relative to the store root, without extension.
        doc: String,

        /// Print the raw metadata record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Take or extend a soft lock on a document.
    Lock {
        doc: String,

        /// Who is taking the lock.
        #[arg(long)]
        actor: String,

        /// Lock lifetime; defaults to `locking.default_ttl_secs`.
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Release a soft lock.
    Unlock {
        doc: String,

        #[arg(long)]
        actor: String,
    },

    /// Re-hash a document and compare with its recorded hash.
    Verify { doc: String },

    /// List conflict files written for a document.
    Conflicts { doc: String },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("docvault").join("config.toml"))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("./docvault.toml"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Store commands need the config before logging starts, since it can
    // carry the log level.
    let config = match cli.command {
        Commands::Init { .. } | Commands::Validate => None,
        _ => Some(load_config(&cli.config, cli.root.as_deref())),
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var(LOG_ENV).ok().filter(|v| !v.is_empty()))
        .or_else(|| {
            config
                .as_ref()
                .and_then(|c| c.as_ref().ok())
                .map(|c| c.logging.level.clone())
        })
        .unwrap_or_else(|| "warn".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .without_time()
        .init();

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: Option<Result<VaultConfig>>) -> Result<()> {
    let Cli {
        config: config_path,
        root,
        command,
        ..
    } = cli;
    match command {
        Commands::Init { output } => cmd_init(&output, root.as_deref()),
        Commands::Validate => cmd_validate(&config_path),
        command => {
            let config = match config {
                Some(config) => config?,
                None => load_config(&config_path, root.as_deref())?,
            };
            debug!(
                root = %config.store.root.display(),
                format = %config.store.format,
                "store configuration resolved"
            );
            match config.store.format {
                DocumentFormat::Json => dispatch(open_store(&config, JsonCodec)?, &config, command),
                DocumentFormat::Toml => dispatch(open_store(&config, TomlCodec)?, &config, command),
            }
        }
    }
}

fn dispatch<C: Codec>(store: VersionedStore<C>, config: &VaultConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Status { doc, json } => cmd_status(&store, &doc, json),
        Commands::Lock {
            doc,
            actor,
            ttl_secs,
        } => cmd_lock(&store, config, &doc, &actor, ttl_secs),
        Commands::Unlock { doc, actor } => cmd_unlock(&store, &doc, &actor),
        Commands::Verify { doc } => cmd_verify(&store, &doc),
        Commands::Conflicts { doc } => cmd_conflicts(&store, &doc),
        Commands::Init { .. } | Commands::Validate => {
            anyhow::bail!("command does not operate on a store")
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config file, falling back to defaults when `--root` is given and
/// there is no file. `--root` beats `DOCVAULT_ROOT` beats the file.
fn load_config(path: &Path, root: Option<&Path>) -> Result<VaultConfig> {
    let mut config = if path.exists() {
        VaultConfig::load_from_file(path).context("failed to load configuration file")?
    } else if let Some(root) = root {
        VaultConfig::with_root(root)
    } else {
        anyhow::bail!(
            "configuration file not found: {} (run `docvault init` or pass --root)",
            path.display()
        );
    };
    config.apply_env_overrides();
    if let Some(root) = root {
        config.store.root = root.to_path_buf();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_store<C: Codec>(config: &VaultConfig, codec: C) -> Result<VersionedStore<C>> {
    let store = VersionedStore::open(&config.store.root, codec)
        .with_context(|| format!("failed to open store at {}", config.store.root.display()))?
        .with_conflict_dir(config.store.conflict_dir.clone())
        .with_default_strategy(config.conflicts.default_strategy);
    Ok(store)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path, root: Option<&Path>) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let default_root = dirs::data_dir()
        .map(|dir| dir.join("docvault"))
        .unwrap_or_else(|| PathBuf::from("./docvault-data"));
    let contents = VaultConfig::default_toml(root.unwrap_or(&default_root));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, contents).context("failed to write config file")?;

    println!("{}", style::success(&format!("Configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit [store].root to point at your document directory");
    println!("  2. Validate with: docvault validate --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        VaultConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    config.apply_env_overrides();
    println!("  {}", style::success("Environment overrides applied"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All fields are valid"));

    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Store root      : {}", config.store.root.display());
    println!("  Conflict dir    : {}", config.store.conflict_dir);
    println!("  Format          : {}", config.store.format);
    println!("  Lock TTL        : {}s", config.locking.default_ttl_secs);
    println!("  Default strategy: {}", config.conflicts.default_strategy);
    println!("  Log level       : {}", config.logging.level);
    if !config.store.root.exists() {
        println!();
        println!(
            "{}",
            style::warn("Store root does not exist yet; it is created on first use.")
        );
    }

    Ok(())
}

fn cmd_status<C: Codec>(store: &VersionedStore<C>, doc: &str, json: bool) -> Result<()> {
    let meta = store
        .read_metadata(doc)
        .with_context(|| format!("failed to read metadata for '{}'", doc))?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&meta).context("failed to render metadata")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("{}", style::header(doc));
    println!();
    println!("{}", metadata_table(store, &meta));
    Ok(())
}

fn metadata_table<C: Codec>(store: &VersionedStore<C>, meta: &FileMetadata) -> Table {
    let now = store.now();
    let lock = meta.active_lock(now);
    let expires = lock.as_ref().map(|l| l.expires_at.to_rfc3339());
    let lock_text = style::lock_state(lock.as_ref().map(|l| l.holder.as_str()), expires.as_deref());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Version"), Cell::new(meta.version.as_str())]);
    table.add_row(vec![Cell::new("Sequence"), Cell::new(meta.sequence)]);
    table.add_row(vec![
        Cell::new("Last modified"),
        Cell::new(meta.last_modified.to_rfc3339()),
    ]);
    table.add_row(vec![Cell::new("Modified by"), Cell::new(&meta.last_modified_by)]);
    table.add_row(vec![Cell::new("Content hash"), Cell::new(&meta.content_hash)]);
    table.add_row(vec![
        Cell::new("Based on"),
        Cell::new(
            meta.base_version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "—".to_string()),
        ),
    ]);
    table.add_row(vec![Cell::new("Lock"), Cell::new(lock_text)]);
    if meta.has_expired_lock(now) {
        table.add_row(vec![
            Cell::new(""),
            Cell::new(style::dim("expired lock record, cleared on next write")),
        ]);
    }
    table
}

fn cmd_lock<C: Codec>(
    store: &VersionedStore<C>,
    config: &VaultConfig,
    doc: &str,
    actor: &str,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let ttl = match ttl_secs {
        Some(0) => anyhow::bail!("--ttl-secs must be greater than zero"),
        Some(secs) => {
            let secs = i64::try_from(secs).context("--ttl-secs is too large")?;
            chrono::Duration::try_seconds(secs).context("--ttl-secs is too large")?
        }
        None => config.locking.default_ttl(),
    };
    let info = store
        .lock_file(doc, actor, ttl)
        .with_context(|| format!("failed to lock '{}'", doc))?;
    println!(
        "{}",
        style::success(&format!(
            "'{}' locked by {} until {}",
            doc,
            info.holder,
            info.expires_at.to_rfc3339()
        ))
    );
    Ok(())
}

fn cmd_unlock<C: Codec>(store: &VersionedStore<C>, doc: &str, actor: &str) -> Result<()> {
    store
        .unlock_file(doc, actor)
        .with_context(|| format!("failed to unlock '{}'", doc))?;
    println!("{}", style::success(&format!("'{}' is not locked by {}", doc, actor)));
    Ok(())
}

fn cmd_verify<C: Codec>(store: &VersionedStore<C>, doc: &str) -> Result<()> {
    let report = store
        .verify(doc)
        .with_context(|| format!("failed to verify '{}'", doc))?;
    if report.is_intact() {
        println!(
            "{}",
            style::success(&format!("'{}' matches version {}", report.path, report.version))
        );
        return Ok(());
    }

    println!("{}", style::error(&format!("'{}' was modified outside the store", report.path)));
    println!("  recorded: {}", report.expected_hash);
    println!("  on disk : {}", report.actual_hash);
    anyhow::bail!("integrity check failed for '{}'", report.path)
}

fn cmd_conflicts<C: Codec>(store: &VersionedStore<C>, doc: &str) -> Result<()> {
    let artifacts = store
        .list_conflict_artifacts(doc)
        .with_context(|| format!("failed to list conflict files for '{}'", doc))?;

    if artifacts.is_empty() {
        println!("No conflict files for '{}'.", doc);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "File", "Size"]);
    for (i, path) in artifacts.iter().enumerate() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let size = std::fs::metadata(path)
            .map(|m| format!("{} B", m.len()))
            .unwrap_or_else(|_| "?".to_string());
        table.add_row(vec![Cell::new(i + 1), Cell::new(name), Cell::new(size)]);
    }

    println!("{}", style::header(&format!("Conflict files for '{}'", doc)));
    println!("{table}");
    println!("{}", style::dim(&format!("in {}", store.root().display())));
    Ok(())
}
