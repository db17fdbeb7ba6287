//! Command-line probe for the event store.
//!
//! # Responsibility
//! - Wire `hearth_core` against a local SQLite file.
//! - Expose add/update/delete/get/list/replay and print JSON envelopes.
//!
//! # Invariants
//! - Pending writes from earlier runs are replayed before any command.
//! - Output is one JSON document per invocation on stdout.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use hearth_core::db::migrations::latest_version;
use hearth_core::normalize::parse_time;
use hearth_core::{
    default_log_level, init_logging, open_db, ActionResponse, DateRange, EventPatch, EventStore,
    ListResponse, RawEvent, RawTime, ReplayResponse, SqliteEventRepository,
    SqlitePendingWriteStore, StoreConfig,
};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const DB_PATH_ENV: &str = "HEARTH_DB_PATH";
const LOG_DIR_ENV: &str = "HEARTH_LOG_DIR";
const LOG_LEVEL_ENV: &str = "HEARTH_LOG_LEVEL";
const DEFAULT_DB_FILE: &str = "hearth.sqlite3";

#[derive(Parser)]
#[command(name = "hearth", version, about = "Hearth event store probe")]
struct Cli {
    /// SQLite file (defaults to $HEARTH_DB_PATH, then the temp dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON file with store tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the store and report schema version and queued writes
    Ping,
    /// Add an event (duplicates are reported, not inserted)
    Add(AddArgs),
    /// Merge fields onto an existing event
    Update(UpdateArgs),
    /// Delete an event
    Delete {
        id: String,
        #[arg(long)]
        owner: String,
    },
    /// Look up an event by any identity
    Get { id: String },
    /// List events for an owner or family
    List(ListArgs),
    /// Replay queued writes and print the report
    Replay,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PingResponse {
    success: bool,
    schema_version: u32,
    pending_writes: usize,
}

#[derive(Args)]
struct EventFields {
    #[arg(long)]
    title: Option<String>,
    /// Start time (RFC 3339, `YYYY-MM-DDTHH:MM`, date, or epoch millis)
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    child: Option<String>,
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    family: Option<String>,
    /// Raw JSON record; explicit flags override its fields
    #[arg(long)]
    json: Option<String>,
    #[command(flatten)]
    fields: EventFields,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,
    #[arg(long)]
    owner: String,
    #[command(flatten)]
    fields: EventFields,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    family: Option<String>,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
    /// Skip the refresh throttle
    #[arg(long)]
    refresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging_from_env();

    let config = load_config(cli.config.as_ref())?;
    let store = open_store(resolve_db_path(cli.db), config)?;

    if let Commands::Ping = cli.command {
        let probe = PingResponse {
            success: true,
            schema_version: latest_version(),
            pending_writes: store.pending_count()?,
        };
        return print_json(&probe, cli.pretty);
    }

    let startup = store.replay_pending().await;
    if let Err(err) = &startup {
        warn!("event=startup_replay module=cli status=error code={}", err.code());
    }

    match cli.command {
        Commands::Ping => Ok(()),
        Commands::Add(args) => {
            let raw = build_raw(args.json.as_deref(), &args.fields)?;
            let result = store.add(&raw, &args.owner, args.family.as_deref()).await;
            print_json(&ActionResponse::from_add(result), cli.pretty)
        }
        Commands::Update(args) => {
            let patch = build_patch(&args.fields);
            if patch.is_empty() {
                bail!("update needs at least one field flag");
            }
            let result = store.update(&args.id, &patch, &args.owner).await;
            print_json(&ActionResponse::from_event(result), cli.pretty)
        }
        Commands::Delete { id, owner } => {
            let result = store.delete(&id, &owner).await;
            print_json(&ActionResponse::from_event(result), cli.pretty)
        }
        Commands::Get { id } => {
            let result = store.get_by_id(&id).await;
            print_json(&ActionResponse::from_lookup(result), cli.pretty)
        }
        Commands::List(args) => {
            let result = if args.refresh {
                store.refresh(&args.owner, args.family.as_deref()).await
            } else {
                let range = DateRange {
                    start: parse_bound("from", args.from.as_deref())?,
                    end: parse_bound("to", args.to.as_deref())?,
                };
                store
                    .list_for_owner(&args.owner, range, args.family.as_deref())
                    .await
            };
            print_json(&ListResponse::from_list(result), cli.pretty)
        }
        Commands::Replay => print_json(&ReplayResponse::from_replay(startup), cli.pretty),
    }
}

fn init_logging_from_env() {
    let Ok(log_dir) = std::env::var(LOG_DIR_ENV) else {
        return;
    };
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_log_level().to_string());
    if let Err(err) = init_logging(&level, &log_dir) {
        eprintln!("logging disabled: {err}");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<StoreConfig> {
    let Some(path) = path else {
        return Ok(StoreConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config `{}`", path.display()))?;
    StoreConfig::from_json_str(&raw).with_context(|| format!("parsing config `{}`", path.display()))
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE))
}

fn open_store(db_path: PathBuf, config: StoreConfig) -> Result<EventStore> {
    let documents = open_db(&db_path)
        .with_context(|| format!("opening document store `{}`", db_path.display()))?;
    let queue = open_db(&db_path)
        .with_context(|| format!("opening pending queue `{}`", db_path.display()))?;
    info!(
        "event=cli_open module=cli status=ok db_path={}",
        db_path.display()
    );
    Ok(EventStore::new(
        Arc::new(SqliteEventRepository::new(documents)),
        Arc::new(SqlitePendingWriteStore::new(queue)),
        config,
    ))
}

fn build_raw(json: Option<&str>, fields: &EventFields) -> Result<RawEvent> {
    let mut raw = match json {
        Some(text) => match serde_json::from_str::<Value>(text).context("parsing --json")? {
            Value::Object(record) => RawEvent::from_record(&record),
            _ => bail!("--json must be a JSON object"),
        },
        None => RawEvent::default(),
    };
    if fields.title.is_some() {
        raw.title = fields.title.clone();
    }
    if let Some(start) = &fields.start {
        raw.start_at = Some(RawTime::from(start.as_str()));
    }
    if let Some(end) = &fields.end {
        raw.end_at = Some(RawTime::from(end.as_str()));
    }
    if fields.category.is_some() {
        raw.category = fields.category.clone();
    }
    if fields.location.is_some() {
        raw.location = fields.location.clone();
    }
    if fields.description.is_some() {
        raw.description = fields.description.clone();
    }
    if fields.child.is_some() {
        raw.child_ref = fields.child.clone();
    }
    Ok(raw)
}

fn build_patch(fields: &EventFields) -> EventPatch {
    EventPatch {
        title: fields.title.clone(),
        description: fields.description.clone(),
        location: fields.location.clone(),
        category: fields.category.clone(),
        start_at: fields.start.clone().map(Value::String),
        end_at: fields.end.clone().map(Value::String),
        child_ref: fields.child.clone(),
        ..EventPatch::default()
    }
}

fn parse_bound(flag: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match parse_time(&RawTime::from(value)) {
        Some(instant) => Ok(Some(instant)),
        None => bail!("--{flag}: unrecognised time `{value}`"),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
