//! `docwatch`: watch collections of a JSON document directory for changes.
//!
//! The directory holds one subdirectory per database and one `<collection>.json`
//! array per collection. Every poll tick the open views are re-read and diffed;
//! changes are printed as marked-up document listings or JSON lines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use docwatch_core::{document_to_json, Direction};
use docwatch_poller::service::{
    render_detail, ChannelSink, PauseSwitch, PhaseTracker, PollWorker, Session, SessionDeps,
    SinkEvent, ViewSlot, ViewUpdate, WatchConfig,
};
use docwatch_poller::storage::{JsonDirStore, JsonViewState, ViewStateStore};
use docwatch_poller::FixedConfirmer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "docwatch", version, about = "Watch document collections for changes")]
struct Cli {
    /// Root directory of the document store.
    #[arg(env = "DOCWATCH_ROOT")]
    root: PathBuf,

    /// Host label the view state is recorded under.
    #[arg(long, env = "DOCWATCH_HOST", default_value = "localhost")]
    host: String,

    /// Database to select instead of the last one used.
    #[arg(long, short = 'd')]
    database: Option<String>,

    /// TOML configuration file.
    #[arg(long, env = "DOCWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Poll interval override in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Result-size cap override.
    #[arg(long)]
    max_results: Option<usize>,

    /// View-state file override.
    #[arg(long, env = "DOCWATCH_STATE")]
    state: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll collections and print their changes (default).
    Watch(WatchArgs),
    /// Remove every document from a collection.
    Clear {
        collection: String,
        /// Confirm without asking.
        #[arg(long)]
        yes: bool,
    },
    /// List the indexes of a collection.
    Indexes { collection: String },
    /// Create an index, e.g. `"('ready_time', 1), ('finish_time', -1)"`.
    CreateIndex { collection: String, spec: String },
    /// Drop an index by name.
    DropIndex {
        collection: String,
        name: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Default, Args)]
struct WatchArgs {
    /// Collections to open as tabs. Defaults to those open last time.
    #[arg(long = "collection", short = 'c')]
    collections: Vec<String>,

    /// Collection to show in the side panel.
    #[arg(long)]
    side: Option<String>,

    /// Collections to show in bottom panels.
    #[arg(long = "bottom")]
    bottoms: Vec<String>,

    /// Filter applied to every tab, e.g. `"'status': 'ready'"`.
    #[arg(long)]
    filter: Option<String>,

    /// Sort used when a view exceeds the result cap, e.g. `ts:desc`.
    #[arg(long)]
    sort: Option<String>,

    /// Print updates as JSON lines.
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<WatchConfig> {
    let mut config = match &cli.config {
        Some(path) => WatchConfig::load(path)?,
        None => WatchConfig::default(),
    };
    if let Some(ms) = cli.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(max) = cli.max_results {
        config.max_results = max;
    }
    if let Some(state) = &cli.state {
        config.state_path = Some(state.clone());
    }
    Ok(config)
}

fn parse_sort(text: &str) -> Result<(String, Direction)> {
    let (field, dir) = text.split_once(':').unwrap_or((text, "asc"));
    let direction = match dir {
        "asc" | "1" => Direction::Ascending,
        "desc" | "-1" => Direction::Descending,
        other => anyhow::bail!("unknown sort direction {other:?}"),
    };
    Ok((field.to_string(), direction))
}

fn print_update(update: &ViewUpdate, json: bool) -> Result<()> {
    if json {
        let docs = |records: &[Arc<docwatch_core::Document>]| -> Vec<serde_json::Value> {
            records.iter().map(|d| document_to_json(d)).collect()
        };
        let line = serde_json::json!({
            "slot": update.slot.to_string(),
            "collection": update.collection,
            "hints": update.hints,
            "new_fields": update.new_fields,
            "created": docs(&update.changes.created),
            "modified": update
                .changes
                .modified
                .iter()
                .map(|m| document_to_json(&m.current))
                .collect::<Vec<_>>(),
            "deleted": docs(&update.changes.deleted),
            "unchanged": update.changes.unchanged.len(),
        });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }
    println!("== [{}] {}{}", update.slot, update.collection, update.hints);
    if !update.new_fields.is_empty() {
        println!("   columns: {}", update.new_fields.join(", "));
    }
    if !update.changes.deleted.is_empty() {
        println!("   deleted: {}", update.changes.deleted.len());
    }
    print!("{}", render_detail(&update.changes));
    Ok(())
}

async fn watch(worker: &PollWorker, args: WatchArgs, mut events: tokio::sync::mpsc::Receiver<SinkEvent>) -> Result<()> {
    for collection in &args.collections {
        worker.open_tab(collection).await?;
    }
    if let Some(filter) = &args.filter {
        for collection in &args.collections {
            worker.set_filter(ViewSlot::Tab, collection, filter).await?;
        }
    }
    if let Some(sort) = &args.sort {
        let (field, direction) = parse_sort(sort)?;
        for collection in &args.collections {
            worker.set_sort(ViewSlot::Tab, collection, &field, direction).await?;
        }
    }
    if let Some(side) = &args.side {
        worker.move_to_side(side).await?;
    }
    for bottom in &args.bottoms {
        worker.add_bottom(bottom).await?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SinkEvent::View(update)) => print_update(&update, args.json)?,
                Some(SinkEvent::Databases(names)) => info!(databases = ?names, "databases"),
                Some(SinkEvent::Collections { database, added, removed }) => {
                    info!(database = %database, ?added, ?removed, "collections changed");
                }
                // Already logged by the session.
                Some(SinkEvent::Failed { .. }) => {}
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("interrupted, stopping");
                break;
            }
        }
    }
    Ok(())
}

async fn execute(worker: &PollWorker, command: Command, events: tokio::sync::mpsc::Receiver<SinkEvent>) -> Result<()> {
    match command {
        Command::Watch(args) => watch(worker, args, events).await,
        Command::Clear { collection, .. } => {
            if worker.clear_collection(&collection).await? {
                println!("cleared {collection}");
            } else {
                println!("not cleared; pass --yes to confirm");
            }
            Ok(())
        }
        Command::Indexes { collection } => {
            for (name, spec) in worker.list_indexes(&collection).await? {
                println!("{name}\t{spec}");
            }
            Ok(())
        }
        Command::CreateIndex { collection, spec } => {
            match worker.create_index(&collection, &spec).await? {
                Some(name) => println!("created {name}"),
                None => println!("ignored unparseable index {spec:?}"),
            }
            Ok(())
        }
        Command::DropIndex { collection, name, .. } => {
            if worker.drop_index(&collection, &name).await? {
                println!("dropped {name}");
            } else {
                println!("not dropped; pass --yes to confirm");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let config = load_config(&cli)?;

    let state: Arc<dyn ViewStateStore> = match &config.state_path {
        Some(path) => Arc::new(JsonViewState::open(path, config.max_history)?),
        None => Arc::new(JsonViewState::in_memory(config.max_history)),
    };
    let command = cli.command.unwrap_or_else(|| Command::Watch(WatchArgs::default()));
    let confirmed = matches!(
        command,
        Command::Clear { yes: true, .. } | Command::DropIndex { yes: true, .. }
    );
    let (sink, events) = ChannelSink::channel(1024);
    let session = Session::new(
        config,
        SessionDeps {
            state,
            sink: Arc::new(sink),
            confirmer: Arc::new(FixedConfirmer(confirmed)),
            pause: PauseSwitch::new(),
            phase: PhaseTracker::new(),
        },
    );

    let mut worker = PollWorker::start(session);
    let store = Arc::new(JsonDirStore::new(&cli.root));
    let result = async {
        worker.connect(cli.host.as_str(), store).await?;
        if let Some(database) = &cli.database {
            worker.select_database(database).await?;
        }
        info!(root = %cli.root.display(), host = %cli.host, "watching");
        execute(&worker, command, events).await
    }
    .await;
    worker.stop().await;
    result
}
