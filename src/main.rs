use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ledgerflow_checkpoint::{CheckpointCompatibilityVerifier, CheckpointStatus, decode};
use ledgerflow_config::NodeConfig;
use ledgerflow_store::{CheckpointStore, SqliteCheckpointStore};
use ledgerflow_workflow::{ModuleRef, WorkflowId};

/// Ledgerflow - operator tools for the workflow checkpoint store
#[derive(Parser)]
#[command(name = "ledgerflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.ledgerflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG says otherwise
  #[arg(long, short, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect and verify persisted checkpoints
  Checkpoints {
    #[command(subcommand)]
    action: CheckpointAction,
  },
}

#[derive(Subcommand)]
enum CheckpointAction {
  /// List stored checkpoints
  List {
    /// Database url (default: the node database in the data directory)
    #[arg(long)]
    database: Option<String>,

    #[arg(long, value_enum, default_value_t = StatusArg::Runnable)]
    status: StatusArg,
  },

  /// Check stored checkpoints against the installed modules
  Verify {
    /// Node configuration file (JSON)
    #[arg(long)]
    config: PathBuf,

    /// JSON array of installed modules: [{"name": .., "hash": ..}]
    #[arg(long)]
    modules: PathBuf,

    /// Database url, overriding the one in the configuration
    #[arg(long)]
    database: Option<String>,
  },

  /// Delete retained checkpoints of failed workflows
  Prune {
    #[arg(long)]
    database: Option<String>,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
  Runnable,
  Failed,
}

impl From<StatusArg> for CheckpointStatus {
  fn from(status: StatusArg) -> Self {
    match status {
      StatusArg::Runnable => CheckpointStatus::Runnable,
      StatusArg::Failed => CheckpointStatus::Failed,
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".ledgerflow"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Checkpoints { action }) => match action {
      CheckpointAction::List { database, status } => {
        let url = database.unwrap_or_else(|| default_database(&data_dir));
        rt.block_on(list_checkpoints(&url, status.into()))?;
      }
      CheckpointAction::Verify {
        config,
        modules,
        database,
      } => {
        rt.block_on(verify_checkpoints(&config, &modules, database, &data_dir))?;
      }
      CheckpointAction::Prune { database } => {
        let url = database.unwrap_or_else(|| default_database(&data_dir));
        rt.block_on(prune_checkpoints(&url))?;
      }
    },
    None => {
      println!("ledgerflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn default_database(data_dir: &Path) -> String {
  format!("sqlite://{}", data_dir.join("node.db").display())
}

async fn open_store(url: &str) -> Result<SqliteCheckpointStore> {
  SqliteCheckpointStore::connect(url)
    .await
    .with_context(|| format!("failed to open checkpoint database: {}", url))
}

async fn list_checkpoints(url: &str, status: CheckpointStatus) -> Result<()> {
  let store = open_store(url).await?;
  let stored = store
    .all(status)
    .await
    .context("failed to load checkpoints")?;

  if stored.is_empty() {
    eprintln!("No {} checkpoints", status);
    return Ok(());
  }

  for entry in stored {
    match decode(&entry.bytes) {
      Ok(checkpoint) => {
        let workflow_type = checkpoint
          .root_type()
          .map(|workflow_type| workflow_type.to_string())
          .unwrap_or_else(|| "-".to_string());
        let detail = match &checkpoint.failure {
          Some(failure) => format!("failed: {}", failure),
          None => format!("{:?}", checkpoint.awaiting),
        };
        println!("{}  {}  {}  {}", entry.id, entry.status, workflow_type, detail);
      }
      Err(e) => println!("{}  {}  <unreadable: {}>", entry.id, entry.status, e),
    }
  }

  Ok(())
}

async fn verify_checkpoints(
  config_path: &Path,
  modules_path: &Path,
  database: Option<String>,
  data_dir: &Path,
) -> Result<()> {
  let config = NodeConfig::load(config_path)
    .with_context(|| format!("failed to load config: {}", config_path.display()))?;

  let modules_content = tokio::fs::read_to_string(modules_path)
    .await
    .with_context(|| format!("failed to read modules file: {}", modules_path.display()))?;
  let modules: Vec<ModuleRef> = serde_json::from_str(&modules_content)
    .with_context(|| format!("failed to parse modules file: {}", modules_path.display()))?;

  let url = database
    .or_else(|| config.database.as_ref().map(|db| db.url.clone()))
    .unwrap_or_else(|| default_database(data_dir));
  let store = open_store(&url).await?;
  let stored: Vec<(WorkflowId, Vec<u8>)> = store
    .all(CheckpointStatus::Runnable)
    .await
    .context("failed to load checkpoints")?
    .into_iter()
    .map(|entry| (entry.id, entry.bytes))
    .collect();

  let verifier = CheckpointCompatibilityVerifier::new(&modules, config.platform_version);
  match verifier.verify_all(&stored) {
    Ok(approved) => {
      println!(
        "{} runnable checkpoints are compatible with platform version {}",
        approved.len(),
        config.platform_version
      );
      Ok(())
    }
    Err(e) => {
      eprintln!("Incompatible checkpoint: {}", e);
      eprintln!("Remediation: {}", e.remediation());
      bail!("checkpoint verification failed")
    }
  }
}

async fn prune_checkpoints(url: &str) -> Result<()> {
  let store = open_store(url).await?;
  let removed = store
    .prune(CheckpointStatus::Failed)
    .await
    .context("failed to prune checkpoints")?;
  println!("Removed {} failed checkpoints", removed);
  Ok(())
}
