use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use txmonitor::application::activity::RetryPolicy;
use txmonitor::application::orchestrator::OrchestrationController;
use txmonitor::config::ScreeningConfig;
use txmonitor::domain::orchestration::Verdict;
use txmonitor::domain::ports::{OrchestrationHistoryBox, VelocityAggregateStoreBox};
use txmonitor::infrastructure::in_memory::{InMemoryHistory, InMemoryVelocityStore};
use txmonitor::infrastructure::policy_cache::{JsonPolicyCatalogue, PolicyCache};
use txmonitor::interfaces::json::queue_writer::QueueWriter;
use txmonitor::interfaces::json::transaction_reader::TransactionReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input transaction messages, one JSON object per line
    input: PathBuf,

    /// Tenant policy catalogue (JSON)
    #[arg(long, env = "TXMONITOR_POLICIES")]
    policies: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "TXMONITOR_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Attempts per activity call, including the first one
    #[arg(long, env = "TXMONITOR_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, env = "TXMONITOR_INITIAL_BACKOFF_MS", default_value_t = 100)]
    initial_backoff_ms: u64,

    /// Upper bound of the retry delay, in milliseconds
    #[arg(long, env = "TXMONITOR_MAX_BACKOFF_MS", default_value_t = 2000)]
    max_backoff_ms: u64,

    /// Deadline of policy and aggregate reads, in milliseconds
    #[arg(long, env = "TXMONITOR_READ_TIMEOUT_MS", default_value_t = 5000)]
    read_timeout_ms: u64,

    /// How long an in-memory aggregate update waits for the key, in milliseconds
    #[arg(long, env = "TXMONITOR_LOCK_WAIT_MS", default_value_t = 1000)]
    lock_wait_ms: u64,

    /// Commit attempts of a persistent aggregate update under contention
    #[arg(long, env = "TXMONITOR_MAX_CONFLICT_RETRIES", default_value_t = 16)]
    max_conflict_retries: u32,
}

impl Cli {
    fn config(&self) -> ScreeningConfig {
        ScreeningConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                ..RetryPolicy::default()
            },
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(
    db_path: Option<PathBuf>,
    config: &ScreeningConfig,
) -> Result<(VelocityAggregateStoreBox, OrchestrationHistoryBox)> {
    use txmonitor::infrastructure::rocksdb::RocksDbStore;

    if let Some(db_path) = db_path {
        let store = RocksDbStore::open(&db_path, config.max_conflict_retries).into_diagnostic()?;
        info!(path = %db_path.display(), "using persistent storage");
        return Ok((Box::new(store.clone()), Box::new(store)));
    }
    Ok(in_memory_stores(config))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(
    db_path: Option<PathBuf>,
    config: &ScreeningConfig,
) -> Result<(VelocityAggregateStoreBox, OrchestrationHistoryBox)> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(in_memory_stores(config))
}

fn in_memory_stores(config: &ScreeningConfig) -> (VelocityAggregateStoreBox, OrchestrationHistoryBox) {
    (
        Box::new(InMemoryVelocityStore::with_lock_wait(config.lock_wait)),
        Box::new(InMemoryHistory::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    config.validate().into_diagnostic()?;

    let policies = PolicyCache::load(Box::new(JsonPolicyCatalogue::new(&cli.policies)))
        .await
        .into_diagnostic()?;
    let (velocity, history) = open_stores(cli.db_path.clone(), &config)?;

    let controller = Arc::new(OrchestrationController::new(
        Box::new(policies),
        velocity,
        Box::new(QueueWriter::new(io::stdout())),
        history,
        config.activity_runner(),
    ));

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = TransactionReader::new(file);
    let mut tasks = JoinSet::new();
    let mut unreadable = 0usize;
    for tx_result in reader.transactions() {
        match tx_result {
            Ok(tx) => {
                let controller = Arc::clone(&controller);
                tasks.spawn(async move { controller.run(tx).await });
            }
            Err(e) => {
                unreadable += 1;
                error!(error = %e, "Error reading transaction");
            }
        }
    }

    let (mut clear, mut violated, mut failed) = (0usize, 0usize, 0usize);
    while let Some(joined) = tasks.join_next().await {
        match joined.into_diagnostic()? {
            Ok(Verdict::Clear) => clear += 1,
            Ok(Verdict::Violated(_)) => violated += 1,
            Err(_) => failed += 1,
        }
    }

    info!(clear, violated, failed, unreadable, "run complete");
    Ok(())
}
