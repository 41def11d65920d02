use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use asyncjobs_core::cache::RedisPool;
use asyncjobs_core::config::Config;
use asyncjobs_core::store::{InMemoryJobStore, RedisJobStore};
use asyncjobs_core::{BackgroundService, HandlerRegistry, JobManager, JobStore, RecoveryService};

#[derive(Parser)]
#[command(name = "asyncjobs")]
#[command(about = "Asynchronous job-execution server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server, worker pool, and (if enabled) the recovery loop
    Server {
        #[arg(short = 'H', long, help = "Bind address", default_value = "0.0.0.0")]
        host: String,

        #[arg(short = 'P', long, help = "Port number", default_value = "8080")]
        port: u16,
    },

    /// Print the effective configuration and exit
    Config,

    /// Print a minimal health snapshot by exercising an in-memory pool once
    Health,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = match &cli.config {
        Some(path) => Config::load(path.to_str().expect("config path must be valid UTF-8"))?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Server { host, port } => run_server(config, host, port).await?,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Health => {
            let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
            let manager = JobManager::new(store, config.job_manager_config());
            let summary = manager.metrics_summary().await;
            println!("{:#?}", summary);
        }
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Demo handler registered so a fresh server has at least one invokable
/// job; real deployments register their own handlers before calling
/// `BackgroundService::start`.
fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("Echo", |payload: serde_json::Value, _ctx| async move { Ok(payload) });
    registry
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.redis {
        Some(redis_config) => {
            info!(url = %redis_config.url, "connecting to Redis-backed job store");
            let pool = RedisPool::new(redis_config.clone())
                .await
                .map_err(|e| anyhow::anyhow!("failed to connect to Redis: {e}"))?;
            Ok(Arc::new(RedisJobStore::new(pool, redis_config.key_prefix.clone())))
        }
        None => {
            info!("using in-memory job store (no [redis] section configured)");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

async fn run_server(config: Config, host: String, port: u16) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let manager = Arc::new(JobManager::new(store.clone(), config.job_manager_config()));
    let registry = Arc::new(demo_registry());

    let worker_service = BackgroundService::start(manager.clone(), registry.clone(), config.worker_pool_config());

    if config.recovery.enabled && store.supports_recovery() {
        let recovery = RecoveryService::new(store.clone(), config.recovery.clone());
        let shutdown = tokio_util::sync::CancellationToken::new();
        tokio::spawn(recovery.run(shutdown));
    }

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let response_factory = asyncjobs_api::default_response_factory();

    info!(%addr, "starting asyncjobs server");
    let result = asyncjobs_api::run(config, manager, registry, response_factory, addr).await;
    worker_service.stop().await;
    result.map_err(|e| anyhow::anyhow!(e))
}
