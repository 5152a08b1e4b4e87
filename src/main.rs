mod config;
mod http;
mod metrics;
mod poller;
mod probe;
mod sink;
mod state;
mod status;

use axum::serve;
use clap::Parser;
use config::{Config, DocumentSinkConfig, MongoSinkConfig};
use metrics::Metrics;
use poller::{CycleSummary, Poller};
use probe::executor::{RemoteExecutor, SshExecutor};
use sink::{ConsoleSink, DocumentSink, MongoSink, SinkError, StatusSink};
use state::State;
use status::now_unix;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "status-collector")]
#[command(version)]
#[command(about = "Polls hosts over ssh and records uptime, disk, memory and unit status")]
struct Cli {
    #[arg(short = 'c', long, default_value = "/etc/system-status-collector.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Seconds to sleep between polling cycles (overrides interval_secs).
    #[arg(long)]
    sleep: Option<u64>,
    /// MongoDB server address or URI (enables the MongoDB sink).
    #[arg(long)]
    db_addr: Option<String>,
    /// MongoDB database (enables the MongoDB sink).
    #[arg(long)]
    db: Option<String>,
    /// MongoDB collection (enables the MongoDB sink).
    #[arg(long)]
    collection: Option<String>,
    /// HTTP endpoint that receives every status as a JSON POST.
    #[arg(long)]
    document_url: Option<String>,
    #[arg(long)]
    no_console: bool,
    /// Run a single polling cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load config");
            std::process::exit(1);
        }
    };
    apply_overrides(&mut cfg, &cli);
    if let Err(err) = cfg.validate() {
        error!(error = %err, "invalid command line overrides");
        std::process::exit(1);
    }
    let cfg = Arc::new(cfg);

    info!(
        config = %cli.config,
        hosts = cfg.hosts.len(),
        interval_secs = cfg.interval_secs,
        "starting status-collector"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let sinks = match build_sinks(&cfg).await {
        Ok(sinks) => sinks,
        Err(err) => {
            error!(error = %err, "failed to set up sinks");
            std::process::exit(1);
        }
    };

    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::from_config(&cfg.ssh));
    let poller = Poller::new(
        cfg.clone(),
        executor,
        sinks,
        shared_state.clone(),
        metrics.clone(),
    );

    if cli.once {
        let summary = poller.run_cycle().await;
        if summary.failed > 0 {
            warn!(failed = summary.failed, "some hosts could not be probed");
        }
        std::process::exit(once_exit_code(&summary));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = cfg.listen.clone().map(|listen| {
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };
            info!(listen = %addr, "status endpoint listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    });

    let poller_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = poller_task.await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(cfg: &mut Config, cli: &Cli) {
    if let Some(sleep) = cli.sleep {
        cfg.interval_secs = sleep;
    }
    if cli.db_addr.is_some() || cli.db.is_some() || cli.collection.is_some() {
        let mongodb = cfg.sinks.mongodb.get_or_insert_with(MongoSinkConfig::default);
        if let Some(addr) = &cli.db_addr {
            mongodb.address = addr.clone();
        }
        if let Some(db) = &cli.db {
            mongodb.database = db.clone();
        }
        if let Some(collection) = &cli.collection {
            mongodb.collection = collection.clone();
        }
    }
    if let Some(url) = &cli.document_url {
        let timeout_ms = cfg
            .sinks
            .document
            .as_ref()
            .map(|d| d.timeout_ms)
            .unwrap_or(5000);
        cfg.sinks.document = Some(DocumentSinkConfig {
            url: url.clone(),
            timeout_ms,
        });
    }
    if cli.no_console {
        cfg.sinks.console = false;
    }
}

/// A single cycle fails only when no host could be probed at all.
fn once_exit_code(summary: &CycleSummary) -> i32 {
    if summary.probed > 0 && summary.failed == summary.probed {
        1
    } else {
        0
    }
}

async fn build_sinks(cfg: &Config) -> Result<Vec<Box<dyn StatusSink>>, SinkError> {
    let mut sinks: Vec<Box<dyn StatusSink>> = Vec::new();
    if let Some(mongodb) = &cfg.sinks.mongodb {
        sinks.push(Box::new(MongoSink::connect(mongodb).await?));
        info!(
            address = %mongodb.address,
            database = %mongodb.database,
            collection = %mongodb.collection,
            "mongodb sink enabled"
        );
    }
    if let Some(document) = &cfg.sinks.document {
        sinks.push(Box::new(DocumentSink::new(document)));
    }
    if cfg.sinks.console {
        sinks.push(Box::new(ConsoleSink));
    }
    if sinks.is_empty() {
        warn!("no sinks enabled, statuses are only kept for the status endpoint");
    }
    Ok(sinks)
}
