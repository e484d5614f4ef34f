//! `jobqueue`: run workers, enqueue jobs and inspect the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use db::{Datastore, DbConfig, SurrealStore};
use queue_core::{Arguments, Dispatcher, JsonSerializer};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use worker::{Client, Executor, InlineExecutor, ProcessExecutor, Worker, WorkerConfig, stats};

mod handlers;

#[derive(Parser)]
#[command(name = "jobqueue")]
#[command(about = "Background job queue worker and tools", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Store selection; unset flags fall back to `STORE_*` / `QUEUE_PREFIX`.
#[derive(Args, Clone)]
struct StoreArgs {
    /// `mem://`, `rocksdb://<path>` or `ws://host:port`
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[arg(long, global = true)]
    namespace: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,

    /// Key prefix
    #[arg(long, global = true)]
    prefix: Option<String>,
}

impl StoreArgs {
    fn config(&self) -> DbConfig {
        let mut config = DbConfig::from_env();
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint);
        }
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace);
        }
        if let Some(database) = &self.database {
            config = config.with_database(database);
        }
        if let Some(prefix) = &self.prefix {
            config = config.with_prefix(prefix);
        }
        config
    }

    /// Flags that point a child process at the same store.
    fn forward(config: &DbConfig) -> Vec<String> {
        vec![
            "--endpoint".into(),
            config.endpoint.clone(),
            "--namespace".into(),
            config.namespace.clone(),
            "--database".into(),
            config.database.clone(),
            "--prefix".into(),
            config.prefix.clone(),
        ]
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll queues and run jobs until shutdown
    Work {
        /// Comma separated queues, highest priority first
        #[arg(long, env = "QUEUES")]
        queues: Option<String>,

        /// Idle sleep in seconds; 0 runs a single iteration
        #[arg(long, env = "INTERVAL")]
        interval: Option<u64>,

        /// Stop after one iteration
        #[arg(long)]
        once: bool,

        /// Run jobs as tasks in this process instead of child processes
        #[arg(long)]
        inline: bool,

        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Run one job read from stdin; used as the per-job child
    RunJob {
        #[arg(long)]
        queue: String,
    },
    /// Push a job
    Enqueue {
        class: String,

        #[arg(long, default_value = worker::DEFAULT_QUEUE)]
        queue: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Print queues, workers and counters as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_config = cli.store.config();
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(handlers::dispatcher());

    match cli.command {
        Commands::Work {
            queues,
            interval,
            once,
            inline,
            worker_id,
        } => {
            let mut config = WorkerConfig::from_env().with_run_once(once);
            if let Some(queues) = queues {
                let queues = worker::parse_queue_list(&queues);
                if !queues.is_empty() {
                    config = config.with_queues(queues);
                }
            }
            if let Some(interval) = interval {
                config = config.with_interval(interval);
            }
            if let Some(id) = worker_id {
                config = config.with_worker_id(id);
            }

            let in_memory = db_config.is_in_memory();
            let forwarded = StoreArgs::forward(&db_config);
            let store = Arc::new(SurrealStore::connect(db_config).await?);

            let executor: Arc<dyn Executor> = if inline || in_memory {
                if !inline {
                    tracing::warn!("In-memory store is private to this process, running jobs inline");
                }
                Arc::new(InlineExecutor::new(store.clone()))
            } else {
                let program = std::env::current_exe()?;
                Arc::new(ProcessExecutor::new(program).with_args(
                    forwarded.into_iter().chain(["run-job".to_string()]),
                ))
            };

            let mut worker = Worker::new(store, Arc::new(handlers::registry()), executor)
                .with_config(config)
                .with_dispatcher(dispatcher);
            worker.work().await?;
        }

        Commands::RunJob { queue } => {
            let store = SurrealStore::connect(db_config).await?;
            let code = worker::run_from_stdin(
                &store,
                &JsonSerializer,
                Arc::new(handlers::registry()),
                dispatcher,
                &queue,
            )
            .await;
            std::process::exit(code);
        }

        Commands::Enqueue { class, queue, args } => {
            let args: Arguments = serde_json::from_str(&args)?;
            let store = Arc::new(SurrealStore::connect(db_config).await?);
            let payload = Client::new(store)
                .with_dispatcher(dispatcher)
                .enqueue(&class, args, &queue)
                .await?;
            println!("{}", serde_json::to_string_pretty(&Value::Object(payload.to_map()))?);
        }

        Commands::Status => {
            let store = SurrealStore::connect(db_config).await?;
            println!("{}", serde_json::to_string_pretty(&status(&store).await?)?);
        }
    }

    Ok(())
}

async fn status<S: Datastore>(store: &S) -> Result<Value, db::StoreError> {
    let mut queues = BTreeMap::new();
    for queue in store.queues().await? {
        let length = store.queue_length(&queue).await?;
        queues.insert(queue, length);
    }

    let heartbeats = store.heartbeats().await?;
    let mut workers = Vec::new();
    for id in store.workers().await? {
        let (processed, failed) = stats::worker_totals(store, &id).await?;
        let working_on = store
            .worker_payload(&id)
            .await?
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
        workers.push(json!({
            "id": id,
            "heartbeat": heartbeats.get(&id).map(|at| at.to_rfc3339()),
            "processed": processed,
            "failed": failed,
            "working_on": working_on,
        }));
    }

    Ok(json!({
        "queues": queues,
        "workers": workers,
        "processed": store.stat(stats::PROCESSED).await?,
        "failed": store.stat(stats::FAILED).await?,
    }))
}
