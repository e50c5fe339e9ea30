//! Refsync CLI
//!
//! Runs the reference sync engine against JSON schemas and fixtures:
//! - `describe`: resolved reference descriptors and sync registrations
//! - `load`: batch-resolve the references of every document in a collection
//! - `update`: save a source document and show what propagation did

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use refsync_engine::{SyncConfig, SyncEvent};
use refsync_store::{CollectionRegistry, DocumentId, Filter, Projection};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

mod session;

use session::{parse_assignment, Session};

#[derive(Parser)]
#[command(name = "refsync")]
#[command(author, version, about = "Denormalized reference sync for document stores")]
struct Cli {
    /// Sync configuration (JSON). Defaults apply to missing keys.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Collection schemas: `{ "<collection>": { "fields": [...] } }`
    #[arg(long)]
    schemas: PathBuf,
    /// Fixture: `{ "collections": { "<collection>": [ ... ] } }`
    #[arg(long)]
    data: PathBuf,
    /// Write the resulting store contents here
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show reference descriptors per collection and sync registrations per target
    Describe {
        #[arg(long)]
        schemas: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the references of every document in a collection
    Load {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        collection: String,
    },

    /// Update one source document and propagate the change
    Update {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        collection: String,
        /// Document id (uuid)
        #[arg(long)]
        id: String,
        /// Field assignment, `field=value` (value parsed as JSON when possible)
        #[arg(long = "set", value_parser = parse_set)]
        set: Vec<(String, Value)>,
        /// Mark the document inactive
        #[arg(long, conflicts_with = "activate")]
        deactivate: bool,
        /// Mark the document active again
        #[arg(long)]
        activate: bool,
    },
}

fn parse_set(raw: &str) -> std::result::Result<(String, Value), String> {
    parse_assignment(raw).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("failed to install logger: {e}"))?;

    let config = match &cli.config {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => SyncConfig::default(),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    match cli.command {
        Commands::Describe { schemas, json } => cmd_describe(&schemas, config, json),
        Commands::Load { store, collection } => rt.block_on(cmd_load(&store, &collection, config)),
        Commands::Update {
            store,
            collection,
            id,
            set,
            deactivate,
            activate,
        } => {
            let active = match (deactivate, activate) {
                (true, _) => Some(false),
                (_, true) => Some(true),
                _ => None,
            };
            rt.block_on(cmd_update(&store, &collection, &id, set, active, config))
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_describe(schemas: &Path, config: SyncConfig, json: bool) -> Result<()> {
    let session = Session::open(schemas, None, config)?;
    let catalog = session.sync.catalog();

    if json {
        let collections: serde_json::Map<String, Value> = catalog
            .collections()
            .filter_map(|name| {
                let table = catalog.descriptors(name)?;
                Some((name.to_string(), serde_json::to_value(table.as_ref()).ok()?))
            })
            .collect();
        let registrations: Vec<_> = catalog.registrations().collect();
        let out = serde_json::json!({
            "collections": collections,
            "registrations": registrations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Reference descriptors".green().bold());
    for name in catalog.collections() {
        let Some(table) = catalog.descriptors(name).filter(|t| !t.is_empty()) else {
            continue;
        };
        println!("  {}", name.bold());
        for descriptor in table.iter() {
            let mut flags = Vec::new();
            if descriptor.is_array() {
                flags.push("array");
            }
            if descriptor.is_required() {
                flags.push("required");
            }
            println!(
                "    {} → {} [{}]{}",
                descriptor.field_path().to_string().cyan(),
                descriptor.target_collection(),
                descriptor.projected_fields().join(", "),
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", ")).dimmed().to_string()
                }
            );
        }
    }

    println!("{}", "Sync registrations".green().bold());
    for registration in catalog.registrations() {
        println!(
            "  {} ({} entries)",
            registration.collection_name.bold(),
            registration.entries.len()
        );
        for entry in &registration.entries {
            println!(
                "    {}.{} [{}]",
                entry.local_collection,
                entry.field_path.to_string().cyan(),
                entry.projected_fields.join(", ")
            );
        }
    }
    Ok(())
}

async fn cmd_load(args: &StoreArgs, collection: &str, config: SyncConfig) -> Result<()> {
    let session = Session::open(&args.schemas, Some(&args.data), config)?;
    let executor = session.store.require(collection)?;
    let mut docs = executor.find_many(&Filter::All, &Projection::all()).await?;
    session.store.reset_stats();

    let report = session.sync.load(collection, &mut docs).await;
    println!("{}", serde_json::to_string_pretty(&docs)?);

    eprintln!(
        "{} {} documents, {} queries, {} assigned, {} unresolved",
        "loaded".green().bold(),
        report.documents,
        report.queries,
        report.assigned,
        report.unresolved
    );
    for failure in &report.failures {
        eprintln!("{} {}: {}", "failed".red().bold(), failure.target, failure.error);
    }
    print_query_counts(&session);
    write_out(&session, args.out.as_deref())
}

async fn cmd_update(
    args: &StoreArgs,
    collection: &str,
    id: &str,
    set: Vec<(String, Value)>,
    active: Option<bool>,
    config: SyncConfig,
) -> Result<()> {
    let active_field = config.active_field.clone();
    let session = Session::open(&args.schemas, Some(&args.data), config)?;
    let id: DocumentId = id.parse().with_context(|| format!("invalid id '{id}'"))?;

    let handle = session.store.collection(collection);
    let mut doc = handle
        .get_raw(&id)
        .ok_or_else(|| anyhow!("no document {id} in '{collection}'"))?;
    let fields = doc
        .as_object_mut()
        .ok_or_else(|| anyhow!("document {id} is not an object"))?;
    for (field, value) in set {
        fields.insert(field, value);
    }
    if let Some(active) = active {
        fields.insert(active_field, Value::Bool(active));
    }

    session.store.reset_stats();
    let saved = handle.save(doc).await?;
    println!("{}", serde_json::to_string_pretty(&saved)?);

    let events = session.take_events();
    if events.is_empty() {
        eprintln!("{} nothing to propagate", "info:".yellow().bold());
    }
    for event in events {
        match event {
            SyncEvent::Propagated {
                local_collection,
                path,
                removed,
                modified,
                ..
            } => eprintln!(
                "{} {}.{}: {} {} documents",
                "ok".green().bold(),
                local_collection,
                path.cyan(),
                if removed { "removed from" } else { "updated" },
                modified
            ),
            SyncEvent::PropagationFailed {
                local_collection,
                path,
                message,
                ..
            } => eprintln!(
                "{} {}.{}: {}",
                "failed".red().bold(),
                local_collection,
                path.cyan(),
                message
            ),
            other => tracing::debug!(event = ?other, "sync event"),
        }
    }
    print_query_counts(&session);
    write_out(&session, args.out.as_deref())
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_query_counts(session: &Session) {
    for name in session.store.collection_names() {
        let counts = session.store.stats(&name);
        if counts.total() == 0 {
            continue;
        }
        eprintln!(
            "  {}: find_by_id={} find_many={} update_many={}",
            name.bold(),
            counts.find_by_id,
            counts.find_many,
            counts.update_many
        );
    }
}

fn write_out(session: &Session, out: Option<&Path>) -> Result<()> {
    let Some(out) = out else {
        return Ok(());
    };
    let snapshot = serde_json::to_string_pretty(&session.store.export_fixture())?;
    fs::write(out, snapshot).with_context(|| format!("writing {}", out.display()))?;
    eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    Ok(())
}
