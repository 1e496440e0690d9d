//! csvsync CLI - CSV sync of intranet entity data
//!
//! # Sync Commands
//!
//! ```bash
//! csvsync init --folder team        # Create one CSV file per entity type
//! csvsync load                      # Read every linked file into the config
//! csvsync save                      # Write every table back (with retry)
//! csvsync entity kpis list          # CRUD on one entity collection
//! ```
//!
//! # CSV Commands
//!
//! ```bash
//! csvsync parse input.csv           # CSV to JSON rows
//! csvsync validate input.csv        # Check shape and required headers
//! csvsync export rows.json          # JSON rows to CSV
//! ```
//!
//! State lives in a JSON sync configuration (`--config`), a key-value store
//! directory (`--store`) and either a local gateway root (`--root`) or the
//! HTTP gateway (`--graph`, credentials from `.env`).

use clap::{Parser, Subcommand};
use csvsync::{
    decode_content, detect_encoding, objects_to_csv, objects_to_csv_with_headers, parse_bytes,
    validate_csv, validate_rows, DirectoryGateway, EntityStore, EntityType, FileGateway, FileStore,
    GraphGateway, Row, SaveOutcome, StorageMode, StoreGuard, SyncConfig, SyncContext, SyncEngine,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "csvsync")]
#[command(about = "Sync intranet entity data with per-entity CSV files", long_about = None)]
struct Cli {
    /// Sync configuration file
    #[arg(long, global = true, default_value = "csvsync.json")]
    config: PathBuf,

    /// Local key-value store directory
    #[arg(long, global = true, default_value = ".csvsync/store")]
    store: PathBuf,

    /// Root directory of the local file gateway
    #[arg(long, global = true, default_value = ".csvsync/remote")]
    root: PathBuf,

    /// Use the HTTP drive gateway instead of the local directory
    #[arg(long, global = true)]
    graph: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a CSV file and output JSON rows
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// First line is data, columns are named column0..N
        #[arg(long)]
        no_header: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a CSV file's shape and headers
    Validate {
        /// Input CSV file
        input: PathBuf,

        /// Required headers, comma separated
        #[arg(short, long, value_delimiter = ',')]
        require: Vec<String>,

        /// Also check rows against this entity type's schema
        #[arg(short, long)]
        entity: Option<EntityType>,
    },

    /// Convert a JSON array of rows to CSV
    Export {
        /// Input JSON file (array of objects)
        input: PathBuf,

        /// Column order, comma separated (default: first row's keys)
        #[arg(long, value_delimiter = ',')]
        headers: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create the CSV files for a folder
    Init {
        /// Folder id (default: the configured one)
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Load every linked file into the configuration
    Load,

    /// Save every table to its file
    Save,

    /// Manage one entity collection
    Entity {
        /// Entity type (tasks, projects, risks, assets, objectives, kras, kpis)
        entity: EntityType,

        /// Switch the storage mode flag before running the action
        #[arg(long, value_parser = ["local", "remote"])]
        mode: Option<String>,

        #[command(subcommand)]
        action: EntityAction,
    },
}

#[derive(Subcommand)]
enum EntityAction {
    /// List all items
    List,

    /// Add an item from key=value fields
    Add {
        /// Fields as key=value
        fields: Vec<String>,
    },

    /// Update fields of an item
    Edit {
        /// Item id
        id: String,
        /// Fields as key=value
        fields: Vec<String>,
    },

    /// Delete an item
    Remove {
        /// Item id
        id: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Parse { input, no_header, output } => {
            cmd_parse(input, !no_header, output.as_deref())
        }

        Commands::Validate { input, require, entity } => cmd_validate(input, require, *entity),

        Commands::Export { input, headers, output } => {
            cmd_export(input, headers, output.as_deref())
        }

        Commands::Init { folder } => cmd_init(&cli, folder.as_deref()).await,

        Commands::Load => cmd_load(&cli).await,

        Commands::Save => cmd_save(&cli).await,

        Commands::Entity { entity, mode, action } => {
            cmd_entity(&cli, *entity, mode.as_deref(), action).await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

// =============================================================================
// CSV commands
// =============================================================================

fn cmd_parse(
    input: &Path,
    header_row: bool,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let bytes = fs::read(input)?;
    let result = parse_bytes(&bytes, header_row)?;

    eprintln!("   Encoding: {}", result.encoding);
    eprintln!("   Columns: {}", result.headers.join(", "));
    eprintln!("✅ Parsed {} rows", result.rows.len());

    let json = serde_json::to_string_pretty(&result.rows)?;
    write_output(&json, output)?;

    Ok(())
}

fn cmd_validate(
    input: &Path,
    required: &[String],
    entity: Option<EntityType>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Validating: {}", input.display());

    let bytes = fs::read(input)?;
    let content = decode_content(&bytes, &detect_encoding(&bytes))?;

    if let Err(e) = validate_csv(&content, required) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
    eprintln!("✅ Structure valid");

    if let Some(entity) = entity {
        let rows = parse_bytes(&bytes, true)?.rows;
        match validate_rows(entity, &rows) {
            Ok(()) => eprintln!("✅ All {} rows match the {} schema", rows.len(), entity),
            Err(issues) => {
                for issue in issues.iter().take(5) {
                    eprintln!("\n❌ Row {} invalid:", issue.row);
                    for err in issue.errors.iter().take(3) {
                        eprintln!("   - {}", err);
                    }
                }
                eprintln!("\n📊 Results: {} valid, {} invalid", rows.len() - issues.len(), issues.len());
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn cmd_export(
    input: &Path,
    headers: &[String],
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📤 Exporting: {}", input.display());

    let content = fs::read_to_string(input)?;
    let rows: Vec<Row> = serde_json::from_str(&content)?;

    let csv = if headers.is_empty() {
        objects_to_csv(&rows)
    } else {
        objects_to_csv_with_headers(&rows, headers)
    };
    eprintln!("   {} rows", rows.len());

    write_output(&csv, output)
}

// =============================================================================
// Sync commands
// =============================================================================

async fn cmd_init(cli: &Cli, folder: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = read_config(&cli.config)?;
    if let Some(folder) = folder {
        config.folder_id = folder.to_string();
    }

    let (engine, _kv) = build_engine(cli)?;
    match engine.initialize(&config).await? {
        Some(patch) => {
            config.apply_mut(patch);
            for (entity, id) in &config.file_ids {
                eprintln!("   📄 {} → {}", entity, id);
            }
        }
        None => eprintln!("📋 Nothing to initialize"),
    }

    write_config(&cli.config, &config)
}

async fn cmd_load(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = read_config(&cli.config)?;
    let (engine, _kv) = build_engine(cli)?;

    match engine.load(&config).await? {
        Some(patch) => {
            config.apply_mut(patch);
            for (entity, table) in &config.data {
                eprintln!("   📄 {}: {} rows", entity, table.rows.len());
            }
        }
        None => eprintln!("📋 No CSV files linked"),
    }

    write_config(&cli.config, &config)
}

async fn cmd_save(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = read_config(&cli.config)?;
    let (engine, _kv) = build_engine(cli)?;

    let report = engine.save(&config).await?;
    if let Some(patch) = report.patch.clone() {
        config.apply_mut(patch);
        write_config(&cli.config, &config)?;
    }

    match report.outcome() {
        SaveOutcome::Complete => eprintln!("\n✨ Done!"),
        _ => {
            eprintln!("\n⚠️  {} saved, {} failed", report.succeeded.len(), report.failed.len());
            for failure in &report.failed {
                eprintln!("   - {}: {}", failure.entity, failure.reason);
            }
        }
    }
    Ok(())
}

async fn cmd_entity(
    cli: &Cli,
    entity: EntityType,
    mode: Option<&str>,
    action: &EntityAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = read_config(&cli.config)?;
    let (engine, kv) = build_engine(cli)?;
    let sync = SyncContext::new(engine, config);

    let mut store = EntityStore::new(entity, kv).with_sync(sync.clone());
    if let Some(mode) = mode {
        store.set_mode(StorageMode::from_flag(Some(mode)))?;
    }
    store.open().await?;

    match action {
        EntityAction::List => {
            let json = serde_json::to_string_pretty(store.items())?;
            println!("{}", json);
        }
        EntityAction::Add { fields } => {
            let item = store.add(parse_fields(fields)?).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        EntityAction::Edit { id, fields } => {
            let item = store.edit(id, parse_fields(fields)?).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        EntityAction::Remove { id } => {
            store.remove(id).await?;
            eprintln!("🗑️  Deleted: {}", id);
        }
    }

    write_config(&cli.config, &sync.snapshot())
}

// =============================================================================
// Helpers
// =============================================================================

fn build_engine(cli: &Cli) -> Result<(Arc<SyncEngine>, Arc<FileStore>), Box<dyn std::error::Error>> {
    let kv = Arc::new(FileStore::with_dir(&cli.store)?);

    let gateway: Arc<dyn FileGateway> = if cli.graph {
        Arc::new(GraphGateway::from_env()?)
    } else {
        Arc::new(DirectoryGateway::new(&cli.root))
    };

    let engine = SyncEngine::new(gateway, kv.clone(), Arc::new(StoreGuard::new(kv.clone())));
    Ok((Arc::new(engine), kv))
}

fn read_config(path: &Path) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_config(path: &Path, config: &SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    eprintln!("💾 Config written to: {}", path.display());
    Ok(())
}

/// `key=value` pairs into a row of string values.
fn parse_fields(fields: &[String]) -> Result<Row, String> {
    fields
        .iter()
        .map(|field| {
            field
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), Value::from(v)))
                .ok_or_else(|| format!("Expected key=value, got '{}'", field))
        })
        .collect()
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
