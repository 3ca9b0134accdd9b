use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dsc_config::Config;
use dsc_core::{BroadcastPublisher, Registry, Services};
use dsc_db::{Database, RunRepository};
use dsc_types::{RunFilter, RunStatus};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dsc", about = "Discovery - sandboxed scan runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dispatchable and rejected tasks
    Tasks,
    /// Dispatch one run and wait for its result
    Run {
        /// Task name, fully qualified or its last segment
        task: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: String,
        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Inspect run records
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Subcommand)]
enum RunsCommand {
    /// Show one run
    Get { id: String },
    /// List runs, oldest first
    List(ListArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    owner: Option<String>,
    #[arg(long)]
    parent: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    dsc_core::init_logging(&config.log_level, config.log_file.as_deref(), config.log_json);

    match cli.command {
        Commands::Tasks => list_tasks(),
        Commands::Run {
            task,
            params,
            run_id,
        } => run(&config, &task, &params, run_id).await?,
        Commands::Runs { command } => runs(&config, command).await?,
    }
    Ok(())
}

fn list_tasks() {
    for candidate in dsc_tasks::catalogue() {
        match dsc_core::validate(candidate.as_ref()) {
            Ok(()) => println!("{}\t{}", candidate.name(), candidate.image()),
            Err(e) => println!("{}\trejected: {e}", candidate.name()),
        }
    }
}

async fn open_database(config: &Config) -> anyhow::Result<Arc<Database>> {
    config
        .create_directories()
        .context("Failed to create directories")?;
    let db = Database::new(&config.db_path, config.db_connection_pool_size)
        .await
        .context("Failed to connect to database")?;
    db.initialize()
        .await
        .context("Failed to initialize database schema")?;
    Ok(Arc::new(db))
}

async fn run(
    config: &Config,
    task: &str,
    params: &str,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("--params must be valid JSON")?;
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let db = open_database(config).await?;
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut notifications = publisher.subscribe();

    let services = Services::from_config(config, db.clone(), publisher.clone())
        .await
        .context("Failed to initialize sandbox")?;
    let registry = Registry::new(dsc_tasks::catalogue(), services);

    let listener = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => eprintln!("[{}] {} {}", n.channel, n.event, n.payload),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notifications lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!(task, run_id = %run_id, "Dispatching");
    let outcome = registry.dispatch(&run_id, task, params).await;

    // Dropping the registry and publisher closes the channel and ends the listener
    drop(registry);
    drop(publisher);
    let _ = listener.await;
    db.close().await;

    let result = outcome.with_context(|| format!("Run {run_id} failed"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn runs(config: &Config, command: RunsCommand) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let repo = RunRepository::new(&db);

    match command {
        RunsCommand::Get { id } => {
            let Some(run) = repo.get(&id).await? else {
                bail!("Run {id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        RunsCommand::List(args) => {
            let status = match args.status {
                Some(ref s) => Some(
                    RunStatus::parse(&s.to_uppercase())
                        .with_context(|| format!("Unknown status {s}"))?,
                ),
                None => None,
            };
            let filter = RunFilter {
                status,
                owner_id: args.owner,
                parent_id: args.parent,
            };
            for run in repo.filter(&filter).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    run.id,
                    run.status,
                    run.name,
                    run.created_at.to_rfc3339()
                );
            }
        }
    }

    db.close().await;
    Ok(())
}
