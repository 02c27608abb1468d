//! Thin command-line front end over the search and embedding subsystem.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kb_core::{Config, RecordKind};
use kb_daemon::Context as KbContext;
use kb_search::ProviderKind;

mod commands;

#[derive(Parser)]
#[command(name = "kb")]
#[command(about = "Search and embedding subsystem for a knowledge base")]
struct Cli {
  /// Directory holding the record store and index snapshot
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,
  /// Emit machine-readable JSON instead of a text table
  #[arg(long, global = true)]
  json: bool,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Search experiences and/or skills
  Search {
    query: String,
    #[arg(long = "kind", value_delimiter = ',')]
    kinds: Vec<RecordKind>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    min_score: Option<f32>,
  },
  /// Check whether a proposed record is a likely duplicate
  Duplicate {
    title: String,
    body: String,
    #[arg(long, default_value = "experience")]
    kind: RecordKind,
    #[arg(long)]
    category: Option<String>,
  },
  /// Force a full ANN index rebuild from stored embeddings
  RebuildIndex {
    #[arg(long)]
    provider: Option<ProviderArg>,
  },
  /// Inspect or control the background embedding worker
  Worker {
    #[command(subcommand)]
    action: WorkerAction,
  },
  /// Run the embedding worker in the foreground
  Serve,
}

#[derive(Subcommand)]
enum WorkerAction {
  Pause,
  Resume,
  Stats,
  /// Force a retry pass over failed records now, instead of waiting for
  /// the worker to pick them up on an idle tick
  RetryFailed,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProviderArg {
  Vector,
  Text,
}

impl From<ProviderArg> for ProviderKind {
  fn from(value: ProviderArg) -> Self {
    match value {
      ProviderArg::Vector => ProviderKind::Vector,
      ProviderArg::Text => ProviderKind::Text,
    }
  }
}

fn data_dir(override_dir: Option<PathBuf>) -> PathBuf {
  override_dir.unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("kb"))
}

fn load_config(data_dir: &std::path::Path) -> Config {
  let config_path = data_dir.join("config.toml");
  match std::fs::read_to_string(&config_path) {
    Ok(raw) => toml::from_str(&raw).unwrap_or_default(),
    Err(_) => Config::default(),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())).init();

  let cli = Cli::parse();
  let data_dir = data_dir(cli.data_dir);
  let config = load_config(&data_dir);
  let json_output = cli.json;

  let command = match cli.command {
    Commands::Serve => return commands::serve::run(data_dir, config).await,
    other => other,
  };

  let db_path = data_dir.join("kb.sqlite3");
  let index_path = data_dir.join("kb.index");
  let ctx = KbContext::open(&db_path, index_path, config, None, None).await.context("failed to open knowledge base")?;

  match command {
    Commands::Search { query, kinds, category, author, section, limit, offset, min_score } => {
      let kinds = if kinds.is_empty() { vec![RecordKind::Experience, RecordKind::Skill] } else { kinds };
      commands::search::run(&ctx, &query, &kinds, category.as_deref(), author.as_deref(), section.as_deref(), limit, offset, min_score, json_output)
        .await
    }
    Commands::Duplicate { title, body, kind, category } => commands::duplicate::run(&ctx, &title, &body, kind, category.as_deref(), json_output).await,
    Commands::RebuildIndex { provider } => commands::rebuild::run(&ctx, provider.map(ProviderKind::from)).await,
    Commands::Worker { action } => match action {
      WorkerAction::Pause => commands::worker::pause(&ctx),
      WorkerAction::Resume => commands::worker::resume(&ctx),
      WorkerAction::Stats => commands::worker::stats(&ctx, json_output),
      WorkerAction::RetryFailed => commands::worker::retry_failed(&ctx).await,
    },
    Commands::Serve => unreachable!("handled above"),
  }
}
