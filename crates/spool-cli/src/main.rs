mod procedures;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spool_core::app::WorkerSummary;
use spool_core::impls::{InMemoryStore, Notification, TokioSpawner};
use spool_core::observability::{LogFormat, PoolCounts, init_tracing};
use spool_core::ports::{
    EventSink, FanoutEventSink, RecordingEventSink, TracingEventSink, TransactionalStore,
};
use spool_core::{ExecutionFailurePolicy, NewJob, SpoolConfig, WorkerSupervisor};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "spool", version, about = "Drain a transactional job queue with a pool of workers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Seed a queue from a JSON job list and drain it.
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// JSON array of jobs: `[{"proc": "log_message", "args": ["hi"], "priority": 0}]`
    #[arg(long)]
    jobs: PathBuf,

    /// TOML config file.
    #[arg(long, env = "SPOOL_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    database: Option<String>,

    /// Workers in the pool.
    #[arg(long)]
    workers: Option<u32>,

    /// `fatal` or `discard`.
    #[arg(long)]
    on_execution_failure: Option<ExecutionFailurePolicy>,

    /// PostgreSQL server URL; the queue lives in `jobs_queue` of `--database`.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "SPOOL_DATABASE_URL")]
    url: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    database: String,
    counts: PoolCounts,
    workers: Vec<WorkerSummary>,
    /// Jobs left in the queue; unknown for external stores.
    remaining: Option<usize>,
    notifications: Vec<Notification>,
    launch_error: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let Command::Run(run_args) = args.command;

    init_tracing(if run_args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    match run(run_args).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("could not render summary: {e}"),
            }
            if summary.launch_error.is_some() || !summary.counts.all_drained() {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

fn load_config(args: &RunArgs) -> Result<SpoolConfig> {
    let mut config = SpoolConfig::load(args.config.as_deref())?;
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(workers) = args.workers {
        config.pool.size = workers;
        config.max_workers = config.max_workers.max(workers as usize);
    }
    if let Some(policy) = args.on_execution_failure {
        config.on_execution_failure = policy;
    }
    config.validate()?;
    Ok(config)
}

fn read_jobs(path: &Path) -> Result<Vec<NewJob>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read job file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid job file {}", path.display()))
}

async fn run(args: RunArgs) -> Result<RunSummary> {
    let config = load_config(&args)?;
    let jobs = read_jobs(&args.jobs)?;
    info!(
        database = %config.database,
        jobs = jobs.len(),
        workers = config.pool.size,
        policy = ?config.on_execution_failure,
        "seeding queue"
    );

    #[cfg(feature = "postgres")]
    let jobs = match &args.url {
        Some(url) => return run_postgres(url, &config, jobs).await,
        None => jobs,
    };

    let store = InMemoryStore::new(procedures::demo());
    store.create_database(&config.database);
    for job in jobs {
        store.enqueue(&config.database, job)?;
    }
    drain(&config, Arc::new(store.clone()), Some(&store)).await
}

#[cfg(feature = "postgres")]
async fn run_postgres(url: &str, config: &SpoolConfig, jobs: Vec<NewJob>) -> Result<RunSummary> {
    let store = spool_core::impls::PgStore::from_url(url)?;
    store.install(&config.database).await?;
    for job in &jobs {
        store.enqueue(&config.database, job).await?;
    }
    drain(config, Arc::new(store), None).await
}

async fn drain(
    config: &SpoolConfig,
    store: Arc<dyn TransactionalStore>,
    local: Option<&InMemoryStore>,
) -> Result<RunSummary> {
    let recorder = Arc::new(RecordingEventSink::new());
    let sink: Arc<dyn EventSink> = Arc::new(
        FanoutEventSink::new()
            .with(Arc::new(TracingEventSink))
            .with(recorder.clone()),
    );
    let spawner = TokioSpawner::from_config(store, sink, config);
    let supervisor = WorkerSupervisor::new(spawner, config.pool.clone());

    // workers that did start keep draining even if a later launch fails
    let launch_error = match supervisor.launch_pool(&config.database).await {
        Ok(pids) => {
            info!(workers = pids.len(), "worker pool started");
            None
        }
        Err(e) => {
            error!(code = ?e.code(), hint = e.hint(), "{e}");
            Some(e.to_string())
        }
    };

    for (pid, exit) in supervisor.spawner().join_all().await {
        if exit.is_none() {
            error!(%pid, "worker did not report an exit");
        }
    }
    let workers: Vec<WorkerSummary> = recorder
        .events()
        .iter()
        .filter_map(WorkerSummary::from_event)
        .collect();

    let (remaining, notifications) = match local {
        Some(store) => (
            Some(store.pending_jobs(&config.database)?.len()),
            store.delivered_notifications(),
        ),
        None => (None, Vec::new()),
    };

    Ok(RunSummary {
        database: config.database.clone(),
        counts: PoolCounts::from_summaries(&workers),
        workers,
        remaining,
        notifications,
        launch_error,
    })
}
