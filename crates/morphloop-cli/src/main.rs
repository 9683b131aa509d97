mod display;
mod session;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use morphloop_bridge::protocol::{Envelope, Request, Response};
use morphloop_bridge::{Bridge, BridgeError, ProcessTransport, Transport};
use morphloop_core::{
    FileId, FileRole, GoldReference, ModelConfig, QueryStrategy, count_samples, cycles,
    score_predictions,
};
use morphloop_store::{DuckStore, ProjectStore};
use morphloop_workflow::Orchestrator;

/// Active-learning cycles for morphological segmentation.
#[derive(Parser, Debug)]
#[command(name = "morphloop", version)]
struct Cli {
    /// Project database file.
    #[arg(long, global = true, env = "MORPHLOOP_DB", default_value = "morphloop.duckdb")]
    db: PathBuf,

    /// Training backend worker program (speaks JSON lines on stdin/stdout).
    #[arg(long, global = true, env = "MORPHLOOP_WORKER")]
    worker: Option<String>,

    /// Argument passed to the worker program; repeatable.
    #[arg(long = "worker-arg", global = true, allow_hyphen_values = true)]
    worker_args: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show stage, cycle counters, config and files.
    Status,
    /// Upload a target-format file, optionally assigning a role.
    Upload {
        path: PathBuf,
        #[arg(long)]
        role: Option<FileRole>,
    },
    /// Validate a stored file and assign it a role.
    Assign { file_id: FileId, role: FileRole },
    /// List stored files.
    Files,
    /// Show or change the model configuration.
    Config {
        #[arg(long)]
        increment: Option<u32>,
        #[arg(long)]
        iterations: Option<u32>,
        #[arg(long)]
        strategy: Option<QueryStrategy>,
    },
    /// Run and review cycles interactively.
    Session,
    /// Show committed cycle metrics.
    History {
        /// Also write the history to a Parquet file.
        #[arg(long)]
        parquet: Option<PathBuf>,
    },
    /// Write one snapshot text of a committed cycle.
    Export {
        cycle: u32,
        kind: SnapshotKind,
        out: Option<PathBuf>,
    },
    /// Score a prediction file against a gold file.
    Score {
        predictions: PathBuf,
        gold: PathBuf,
        /// Only list words with errors.
        #[arg(long)]
        errors_only: bool,
    },
    /// Delete every file, cycle and annotation and wipe the backend.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SnapshotKind {
    Increment,
    Residual,
    Evaluation,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("morphloop v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    // Scoring works on plain files and never touches the project.
    let command = match cli.command {
        Command::Score {
            predictions,
            gold,
            errors_only,
        } => return score(&predictions, &gold, errors_only).await,
        other => other,
    };

    let store = DuckStore::open_persistent(&cli.db)
        .with_context(|| format!("opening {}", cli.db.display()))?;
    let bridge = connect(cli.worker.as_deref(), &cli.worker_args)?;
    let mut orch = Orchestrator::restore(store, bridge)?;

    match command {
        Command::Status => status(&orch)?,
        Command::Upload { path, role } => {
            let content = session::read_text(&path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let file = orch.upload_file(&name, &content)?;
            println!("stored {} as file {} ({} samples)", name, file.id, count_samples(&content));
            if let Some(role) = role {
                orch.assign_role(file.id, role)?;
                println!("file {} is now {role}", file.id);
            }
        }
        Command::Assign { file_id, role } => {
            orch.assign_role(file_id, role)?;
            println!("file {file_id} is now {role}");
        }
        Command::Files => display::print_files(&orch.files()?),
        Command::Config {
            increment,
            iterations,
            strategy,
        } => {
            let current = orch.project().config;
            let config = ModelConfig {
                increment_size: increment.unwrap_or(current.increment_size),
                total_iterations: iterations.unwrap_or(current.total_iterations),
                strategy: strategy.unwrap_or(current.strategy),
            };
            if config != current {
                orch.set_config(config)?;
            }
            print_config(&config);
        }
        Command::Session => session::run(&mut orch).await?,
        Command::History { parquet } => {
            let batch = cycles::cycle_history_batch(&orch.store().cycles()?)?;
            display::print_history(&batch)?;
            if let Some(path) = parquet {
                let rows = orch.store().export_cycles_parquet(&path)?;
                println!("wrote {rows} cycle(s) to {}", path.display());
            }
        }
        Command::Export { cycle, kind, out } => {
            let snapshot = orch
                .store()
                .cycle(cycle)?
                .with_context(|| format!("cycle {cycle} has not been committed"))?;
            let text = match kind {
                SnapshotKind::Increment => snapshot.increment_text,
                SnapshotKind::Residual => snapshot.residual_text,
                SnapshotKind::Evaluation => snapshot.evaluation_text,
            };
            match out {
                Some(path) => {
                    tokio::fs::write(&path, &text)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("wrote {}", path.display());
                }
                None => println!("{text}"),
            }
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("reset deletes every file, cycle and annotation; pass --yes to confirm");
            }
            orch.reset().await?;
            println!("project reset");
        }
        Command::Score { .. } => {}
    }
    Ok(())
}

fn connect(worker: Option<&str>, args: &[String]) -> anyhow::Result<Bridge> {
    match worker {
        Some(program) => {
            let transport = ProcessTransport::spawn(program, args)
                .with_context(|| format!("starting backend worker {program}"))?;
            Ok(Bridge::spawn(transport))
        }
        None => Ok(Bridge::spawn(Offline)),
    }
}

/// Stand-in transport when no worker is configured; every request fails.
struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn send(&mut self, _: &Envelope<Request>) -> Result<(), BridgeError> {
        Err(BridgeError::Transport(
            "no backend worker configured (set --worker or MORPHLOOP_WORKER)".into(),
        ))
    }

    async fn recv(&mut self) -> Result<Option<Envelope<Response>>, BridgeError> {
        Ok(None)
    }
}

fn status<S: ProjectStore>(orch: &Orchestrator<S>) -> anyhow::Result<()> {
    let project = orch.project();
    println!("stage      {}", project.stage);
    let completed: Vec<&str> = orch.completed_stages().iter().map(|s| s.as_str()).collect();
    if !completed.is_empty() {
        println!("completed  {}", completed.join(", "));
    }
    println!(
        "cycle      {} ({} remaining)",
        project.current_iteration,
        orch.cycles_remaining()
    );
    println!("selected   {}", project.cumulative_selected);
    print_config(&project.config);
    println!();
    display::print_files(&orch.files()?);
    if let Some(latest) = orch.store().latest_cycle()? {
        println!();
        display::print_snapshot(&latest);
    }
    Ok(())
}

fn print_config(config: &ModelConfig) {
    println!(
        "config     increment {}  iterations {}  strategy {}",
        config.increment_size, config.total_iterations, config.strategy
    );
}

async fn score(predictions: &Path, gold: &Path, errors_only: bool) -> anyhow::Result<()> {
    let predicted = session::read_text(predictions).await?;
    let gold = GoldReference::parse(&session::read_text(gold).await?);
    if gold.is_empty() {
        bail!("gold file has no entries");
    }
    let report = score_predictions(&predicted, &gold);
    display::print_score_report(&report, errors_only);
    Ok(())
}
