use bimo_offline::cache::CacheService;
use bimo_offline::config::Config;
use bimo_offline::db::LocalStore;
use bimo_offline::network::{HttpCheck, NetworkMonitor, ReachabilityCheck};
use bimo_offline::offline::OfflineService;
use bimo_offline::queue::SyncQueue;
use bimo_offline::remote::HttpDocumentStore;
use bimo_offline::server::create_router;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bimo-offline")]
#[command(about = "Offline sync service: reachability monitor, write queue and cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bimo-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on
  #[arg(short, long)]
  bind: Option<SocketAddr>,
}

/// Stderr logging, plus a daily file when a log directory is configured.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = fmt::layer().with_writer(std::io::stderr);

  match &config.logging.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "bimo-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::registry().with(filter).with(stderr).init();
      None
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override bind address if specified on command line
  if let Some(bind) = args.bind {
    config.server.bind = bind;
  }

  let _log_guard = init_tracing(&config);

  let db_path = config.database_path()?;
  let store = Arc::new(LocalStore::open(&db_path)?);
  info!(path = %db_path.display(), "local store ready");

  let documents = HttpDocumentStore::new(
    config.store_url()?,
    Duration::from_secs(config.store.request_timeout_secs),
  )
  .map_err(|e| eyre!("Failed to create document store client: {}", e))?;

  let checks: Vec<Arc<dyn ReachabilityCheck>> = vec![
    Arc::new(
      HttpCheck::new(
        "document-store",
        documents.health_url()?,
        Duration::from_secs(config.monitor.internal_timeout_secs),
      )
      .map_err(|e| eyre!("Failed to create health check: {}", e))?,
    ),
    Arc::new(
      HttpCheck::new(
        "external",
        config.external_url()?,
        Duration::from_secs(config.monitor.external_timeout_secs),
      )
      .map_err(|e| eyre!("Failed to create external check: {}", e))?,
    ),
  ];
  let monitor = Arc::new(NetworkMonitor::new(checks));

  let queue = SyncQueue::new(
    store.clone(),
    monitor.clone(),
    Arc::new(documents),
    config.queue_settings(),
  )?;
  queue.spawn_worker();

  let cache = CacheService::new(store.clone(), monitor.clone()).with_default_ttl(config.default_ttl());
  let service = Arc::new(OfflineService::new(
    store.clone(),
    monitor.clone(),
    queue.clone(),
    cache.clone(),
  ));

  monitor.start(config.probe_interval()).await;

  // Expired cache rows and old completed items are swept on a timer.
  let retention = config.retention();
  let sweep_every = Duration::from_secs(config.queue.maintenance_interval_secs.max(1));
  let maintenance = tokio::spawn({
    let queue = queue.clone();
    async move {
      let mut ticker = tokio::time::interval(sweep_every);
      loop {
        ticker.tick().await;
        if let Err(e) = cache.clear_all() {
          warn!(error = %e, "failed to clear expired cache rows");
        }
        if let Err(e) = queue.reap(retention) {
          warn!(error = %e, "failed to reap completed queue items");
        }
      }
    }
  });

  let listener = tokio::net::TcpListener::bind(config.server.bind)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.server.bind, e))?;
  info!(addr = %config.server.bind, "listening");

  axum::serve(listener, create_router(service))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutting down");
    })
    .await?;

  maintenance.abort();
  monitor.stop();

  Ok(())
}
