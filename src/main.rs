//! Binary entry point for `subcog-memory`.
//!
//! A thin `clap` surface over [`subcog_memory::Engine`]: enough to exercise
//! the full pipeline locally (assert a fact, ask a question, inspect or
//! resolve open contradictions) without standing up any HTTP server or real
//! generator backend.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use subcog_memory::generator::TemplateGenerator;
use subcog_memory::ledger::{ContradictionLedger, InMemoryContradictionLedger, SqliteContradictionLedger};
use subcog_memory::models::{Actor, ContradictionId, MemoryId, Resolution};
use subcog_memory::normalize::SlotCatalog;
use subcog_memory::observability::{self, LogFormat, ObservabilityConfig};
use subcog_memory::retrieval::LexicalJaccardIndex;
use subcog_memory::store::{InMemoryMemoryStore, MemoryStore, SqliteMemoryStore};
use subcog_memory::{current_timestamp, Engine, EngineConfig};

/// A contradiction-preserving memory engine for long-running conversational assistants.
#[derive(Debug, Parser)]
#[command(name = "subcog-memory", version, about)]
struct Cli {
    /// Directory holding `memories.db`/`ledger.db`. Defaults to
    /// `~/.local/share/subcog-memory` (ignored with `--in-memory`).
    #[arg(long, global = true, env = "SUBCOG_MEMORY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Use transient in-memory backends instead of the `SQLite` files.
    #[arg(long, global = true)]
    in_memory: bool,

    /// Path to a `subcog-memory.toml` config file (defaults to
    /// `./subcog-memory.toml` if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as newline-delimited JSON instead of the pretty format.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Asserts an utterance against a conversation thread, running the full
    /// classify/extract/detect/write pipeline.
    Assert {
        /// Thread the utterance belongs to.
        #[arg(long, default_value = "default")]
        thread: String,
        /// Session the utterance belongs to.
        #[arg(long, default_value = "cli")]
        session: String,
        /// The utterance text.
        text: String,
    },
    /// Asks a question or issues an instruction against a conversation thread.
    Ask {
        /// Thread to retrieve from.
        #[arg(long, default_value = "default")]
        thread: String,
        /// Session the query belongs to.
        #[arg(long, default_value = "cli")]
        session: String,
        /// The question or instruction text.
        text: String,
        /// Print the full response, including the x-ray trail, as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Inspects or acts on open contradictions.
    Resolve {
        #[command(subcommand)]
        action: ResolveAction,
    },
    /// Reports engine configuration and backend summary.
    Status,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ResolveAction {
    /// Lists open contradictions for a thread.
    List {
        /// Thread to list contradictions for.
        #[arg(long, default_value = "default")]
        thread: String,
    },
    /// Prints deterministic suggestions for an open contradiction.
    Suggest {
        /// Contradiction id (as printed by `resolve list`).
        contradiction_id: String,
    },
    /// Applies a resolution action to an open contradiction.
    Apply {
        /// Contradiction id (as printed by `resolve list`).
        contradiction_id: String,
        /// The action to apply.
        #[arg(value_enum)]
        action: ResolutionArg,
    },
}

/// `clap`-facing mirror of [`subcog_memory::models::Resolution`]; kept
/// separate so the domain enum stays free of CLI-parsing concerns.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ResolutionArg {
    /// Supersede the older memory in favor of the newer one.
    UpdateToNewer,
    /// Supersede the newer memory in favor of the older one.
    UpdateToOlder,
    /// Leave both memories active.
    KeepBoth,
    /// Tag each memory with disjoint domains so they stop overlapping.
    SplitByDomain,
    /// Mark the older memory's temporal status as past.
    MarkPast,
    /// Discard the contradiction as spurious.
    Dismissed,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::UpdateToNewer => Self::UpdateToNewer,
            ResolutionArg::UpdateToOlder => Self::UpdateToOlder,
            ResolutionArg::KeepBoth => Self::KeepBoth,
            ResolutionArg::SplitByDomain => Self::SplitByDomain,
            ResolutionArg::MarkPast => Self::MarkPast,
            ResolutionArg::Dismissed => Self::Dismissed,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Prints the effective configuration (defaults, file, env overrides).
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    observability::init(&ObservabilityConfig {
        format: if cli.log_json { LogFormat::Json } else { LogFormat::Pretty },
        ..ObservabilityConfig::default()
    });

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::load_default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("starting async runtime")?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: EngineConfig) -> Result<()> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let (store, ledger): (Arc<dyn MemoryStore>, Arc<dyn ContradictionLedger>) = if cli.in_memory {
        (Arc::new(InMemoryMemoryStore::new()), Arc::new(InMemoryContradictionLedger::new()))
    } else {
        std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let store = SqliteMemoryStore::open(data_dir.join("memories.db")).context("opening memories.db")?;
        let ledger = SqliteContradictionLedger::open(data_dir.join("ledger.db")).context("opening ledger.db")?;
        (Arc::new(store), Arc::new(ledger))
    };

    match cli.command {
        Command::Assert { thread, session, text } => cmd_assert(&store, &ledger, config, thread, session, text).await,
        Command::Ask { thread, session, text, json } => cmd_ask(&store, &ledger, config, thread, session, text, json).await,
        Command::Resolve { action } => cmd_resolve(store.as_ref(), ledger.as_ref(), action),
        Command::Status => cmd_status(&data_dir, cli.in_memory, &config),
        Command::Config { action: ConfigAction::Show } => cmd_config_show(&config),
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from(".subcog-memory"), |base| base.home_dir().join(".local/share/subcog-memory"))
}

async fn cmd_assert(store: &Arc<dyn MemoryStore>, ledger: &Arc<dyn ContradictionLedger>, config: EngineConfig, thread: String, session: String, text: String) -> Result<()> {
    let engine = build_engine(Arc::clone(store), Arc::clone(ledger), config);
    let response = engine
        .process_utterance(thread, session, text, current_timestamp(), Duration::from_secs(5))
        .await
        .context("processing utterance")?;
    println!("{} [{}]", response.answer, response.response_type.as_str());
    if response.metadata.contradiction_detected {
        println!("(contradiction detected, {} memory/memories used)", response.memories_used.len());
    }
    Ok(())
}

async fn cmd_ask(store: &Arc<dyn MemoryStore>, ledger: &Arc<dyn ContradictionLedger>, config: EngineConfig, thread: String, session: String, text: String, json: bool) -> Result<()> {
    let engine = build_engine(Arc::clone(store), Arc::clone(ledger), config);
    let response = engine
        .process_utterance(thread, session, text, current_timestamp(), Duration::from_secs(5))
        .await
        .context("processing utterance")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response).context("serializing response")?);
    } else {
        println!("{}", response.answer);
        for entry in &response.memories_used {
            let flag = if entry.reintroduced_claim { " [reintroduced]" } else { "" };
            println!("  - {} = {} (trust {:.2}){flag}", entry.slot.as_deref().unwrap_or("?"), entry.text, entry.trust);
        }
    }
    Ok(())
}

fn cmd_resolve(store: &dyn MemoryStore, ledger: &dyn ContradictionLedger, action: ResolveAction) -> Result<()> {
    match action {
        ResolveAction::List { thread } => {
            let open = ledger.list_open(&thread).context("listing open contradictions")?;
            if open.is_empty() {
                println!("no open contradictions for thread {thread}");
            }
            for c in open {
                println!("{} {} slot={} severity={:?} memories={}", c.contradiction_id, c.kind, c.slot, c.severity, c.involved_memory_ids.len());
            }
        }
        ResolveAction::Suggest { contradiction_id } => {
            let contradiction = ledger.get(&ContradictionId::from(contradiction_id)).context("looking up contradiction")?;
            let trusts: Vec<f64> = contradiction
                .involved_memory_ids
                .iter()
                .map(|id| store.get(id).map(|m| m.trust))
                .collect::<subcog_memory::Result<_>>()
                .context("loading involved memories")?;
            let (older_trust, newer_trust) = match trusts.as_slice() {
                [older, newer, ..] => (*older, *newer),
                [only] => (*only, *only),
                [] => (0.0, 0.0),
            };
            for suggestion in subcog_memory::resolution::suggest(&contradiction, newer_trust, older_trust) {
                println!("{}: {}", suggestion.action, suggestion.rationale);
            }
        }
        ResolveAction::Apply { contradiction_id, action } => {
            let entry = subcog_memory::resolution::apply(
                ledger,
                store,
                &ContradictionId::from(contradiction_id),
                action.into(),
                Actor::User,
                current_timestamp(),
                MemoryId::generate().to_string(),
            )
            .context("applying resolution")?;
            println!("applied {} (rollback id {})", entry.action, entry.rollback_id);
        }
    }
    Ok(())
}

fn cmd_status(data_dir: &std::path::Path, in_memory: bool, config: &EngineConfig) -> Result<()> {
    println!("backend: {}", if in_memory { "in-memory".to_string() } else { format!("sqlite ({})", data_dir.display()) });
    println!("trust range: [{:.2}, {:.2}], floor {:.2}", config.trust_min, config.trust_max, config.trust_floor);
    println!("numeric drift threshold: {:.2}", config.numeric_drift_threshold);
    println!("config sources: {:?}", config.config_sources);
    Ok(())
}

fn cmd_config_show(config: &EngineConfig) -> Result<()> {
    println!("trust_min = {}", config.trust_min);
    println!("trust_max = {}", config.trust_max);
    println!("trust_floor = {}", config.trust_floor);
    println!("trust_decay_half_life_secs = {}", config.trust_decay_half_life_secs);
    println!("numeric_drift_threshold = {}", config.numeric_drift_threshold);
    println!("domain_boost_beta = {}", config.domain_boost_beta);
    println!("theta_contra = {}", config.theta_contra);
    println!("theta_fallback = {}", config.theta_fallback);
    println!("rollback_window_secs = {}", config.rollback_window_secs);
    println!("temporal_default_filter = {:?}", config.temporal_default_filter);
    println!("spurious_filter_enabled = {}", config.spurious_filter_enabled);
    for source in &config.config_sources {
        println!("# loaded from {}", source.display());
    }
    Ok(())
}

fn build_engine(store: Arc<dyn MemoryStore>, ledger: Arc<dyn ContradictionLedger>, config: EngineConfig) -> Engine {
    Engine::new(store, ledger, Arc::new(LexicalJaccardIndex), Arc::new(TemplateGenerator), Arc::new(SlotCatalog::new()), config)
}
