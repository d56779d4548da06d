//! reverie — an autonomous thinking loop
//!
//! Usage:
//!   reverie                               → run until Ctrl-C
//!   reverie --ticks 20                    → run 20 ticks and exit
//!   reverie --ask "Why forgive?"          → queue a question first
//!   reverie --consolidate "manual sweep"  → run one consolidation pass and exit
//!   reverie --dump-config                 → print the default config as TOML

use clap::Parser;
use reverie_core::Category;
use reverie_engine::config::ScoringMode;
use reverie_engine::{
    ConsolidationReason, EngineConfig, Entropy, EvaluatorDeliberator, InMemoryRepository,
    JsonFileRepository, LogSink, Mind, Repository,
};
use reverie_llm::{AnthropicProvider, CancellationToken, Evaluator, LlmEvaluator, ScriptedEvaluator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "reverie",
    about = "Autonomous thinking loop — asks, deliberates, scores, adapts, sleeps",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to config file (TOML). Default: <workspace>/reverie.toml
    #[arg(long)]
    config: Option<String>,

    /// Workspace directory holding config and memory
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long, default_value_t = false)]
    dump_config: bool,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Seed for all random decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Anthropic API key (or set ANTHROPIC_API_KEY). Without one, runs offline.
    #[arg(long)]
    api_key: Option<String>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long)]
    log_file: Option<String>,

    /// Run one consolidation pass with this reason and exit
    #[arg(long)]
    consolidate: Option<String>,

    /// Queue a question before the loop starts (repeatable)
    #[arg(long)]
    ask: Vec<String>,

    /// Category for --ask questions
    #[arg(long, default_value = "philosophical")]
    category: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        print!("{}", EngineConfig::default().to_toml());
        return Ok(());
    }

    let _log_guard = init_tracing(cli.log_file.as_deref());

    let workspace = cli
        .workspace
        .clone()
        .or_else(|| std::env::var("REVERIE_WORKSPACE").ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".reverie")
        });
    std::fs::create_dir_all(&workspace)?;

    let config_path = cli
        .config
        .as_ref()
        .map(|p| expand_tilde(p))
        .unwrap_or_else(|| workspace.join("reverie.toml"));
    let mut config = EngineConfig::load(&config_path);

    let api_key = cli
        .api_key
        .clone()
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    let evaluator: Arc<dyn Evaluator> = match api_key {
        Some(key) => {
            let mut provider = AnthropicProvider::new(key);
            if let Some(url) = &config.evaluator.base_url {
                provider = provider.with_base_url(url.clone());
            }
            let provider = Arc::new(provider);
            let mut evaluator = LlmEvaluator::new(provider, config.evaluator.model.clone())
                .with_max_tokens(config.evaluator.max_tokens);
            if let Some(t) = config.evaluator.temperature {
                evaluator = evaluator.with_temperature(t);
            }
            tracing::info!("Evaluator: {}", config.evaluator.model);
            Arc::new(evaluator)
        }
        None => {
            tracing::warn!("No API key — running offline with scripted replies and heuristic scoring");
            config.scoring.mode = ScoringMode::HeuristicOnly;
            Arc::new(offline_evaluator())
        }
    };

    let repository = open_repository(&workspace, config.store.path.as_deref()).await?;
    let deliberator = Arc::new(EvaluatorDeliberator::new(
        evaluator.clone(),
        config.evaluator.timeout(),
    ));

    tracing::info!("Workspace: {}", workspace.display());
    let mind = Mind::new(
        config,
        repository,
        evaluator,
        deliberator,
        Arc::new(LogSink),
        Entropy::new(cli.seed),
    )?;
    mind.restore().await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received — finishing current tick");
                cancel.cancel();
            }
        });
    }

    if let Some(reason) = cli.consolidate {
        match mind.consolidate(ConsolidationReason::Manual(reason), &cancel).await {
            Some(log) => println!("{}", serde_json::to_string_pretty(&log)?),
            None => tracing::warn!("Consolidation already running"),
        }
        return Ok(());
    }

    if !cli.ask.is_empty() {
        let category = Category::parse(&cli.category)
            .ok_or_else(|| anyhow::anyhow!("unknown category: {}", cli.category))?;
        for question in &cli.ask {
            mind.enqueue(question.clone(), category, 0.8).await;
        }
    }

    let summary = mind.run(cancel, cli.ticks).await;
    let status = mind.status().await;
    tracing::info!(
        "Final weights v{}: empathy {:.3}, coherence {:.3}, dissonance {:.3}",
        status.weights.version,
        status.weights.values.empathy,
        status.weights.values.coherence,
        status.weights.values.dissonance
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn init_tracing(log_file: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reverie=info,reverie_engine=info,reverie_llm=info".into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = expand_tilde(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "reverie.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

async fn open_repository(workspace: &Path, store_path: Option<&str>) -> anyhow::Result<Arc<dyn Repository>> {
    Ok(match store_path {
        Some(p) => {
            let path = expand_tilde(p);
            let path = if path.is_absolute() { path } else { workspace.join(path) };
            Arc::new(JsonFileRepository::open(path).await?)
        }
        None => {
            tracing::info!("No store path — memory is kept in-process only");
            Arc::new(InMemoryRepository::new())
        }
    })
}

/// Canned replies so the loop can run without network access.
fn offline_evaluator() -> ScriptedEvaluator {
    ScriptedEvaluator::new()
        .respond_when(
            "Critique this position",
            "CRITIQUE: This overlooks how differently the question looks from the other side.\nALTERNATIVE: yes",
        )
        .delay_when(
            "Give your position",
            Duration::from_millis(10),
            "POSITION: It depends on what we are willing to care about.\nCONFIDENCE: 0.65\nTONE: curious",
        )
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
