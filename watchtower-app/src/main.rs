mod orchestrator;

use anyhow::Result;
use clap::Parser;
use orchestrator::{Orchestrator, DEFAULT_TICK_SECS};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use watchtower_core::correlator::Correlator;
use watchtower_core::fingerprint::DEFAULT_FORCE_UPDATE_SECS;
use watchtower_core::log_store::{LogStoreClient, DEFAULT_INDEX_PATTERN, DEFAULT_LOG_STORE_URL};
use watchtower_core::profiles;
use watchtower_core::prometheus::{PromClient, DEFAULT_PROM_URL};
use watchtower_core::publisher::{self, SnapshotPublisher, DEFAULT_BIND_ADDR};
use watchtower_core::risk_tracker::{RiskTracker, DEFAULT_RISK_TTL_SECS};
use watchtower_core::summarizer::{OracleClient, Summarize, DEFAULT_ORACLE_BASE_URL, DEFAULT_ORACLE_MODEL};
use watchtower_core::summary_cache::{SummaryCache, DEFAULT_CACHE_TTL_SECS};

#[derive(Parser, Debug)]
#[command(name = "watchtower", version, about = "Watchtower — continuous observability correlator")]
struct Cli {
    /// Directory of service profile documents
    #[arg(short, long, default_value = "config/services")]
    profiles: String,

    /// Dashboard bind address
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    bind: String,

    /// Directory of static dashboard files served at /
    #[arg(long, default_value = "dashboard/dist")]
    static_dir: String,

    /// Seconds between correlation cycles
    #[arg(long, default_value_t = DEFAULT_TICK_SECS)]
    tick_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Environment variable with a logged default.
fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            info!(var = key, default = default, "Environment variable not set, using default");
            default.to_string()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Watchtower v{}", env!("CARGO_PKG_VERSION"));

    let prom_url = env_or("PROM_URL", DEFAULT_PROM_URL);
    let log_store_url = env_or("ELASTICSEARCH_URL", DEFAULT_LOG_STORE_URL);
    let index_pattern = env_or("ES_INDEX_PATTERN", DEFAULT_INDEX_PATTERN);

    // A missing profile directory is fatal; everything else degrades.
    let profiles = profiles::load_profiles(&cli.profiles)?;
    let pattern_index = profiles::alert_pattern_index(&profiles);
    let valid_services: HashSet<String> = profiles.keys().cloned().collect();
    info!(
        services = valid_services.len(),
        dir = %cli.profiles,
        "Monitoring configured services"
    );

    let oracle: Option<Arc<dyn Summarize>> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            let base = env_or("OPENAI_BASE_URL", DEFAULT_ORACLE_BASE_URL);
            let model = env_or("OPENAI_MODEL", DEFAULT_ORACLE_MODEL);
            let contexts = profiles
                .iter()
                .map(|(name, p)| (name.clone(), p.analysis_context.clone()))
                .collect();
            let client = OracleClient::new(base, key, model)?.with_contexts(contexts);
            Some(Arc::new(client))
        }
        _ => {
            warn!("OPENAI_API_KEY not set, risk summaries disabled");
            None
        }
    };

    let prom = Arc::new(PromClient::new(prom_url));
    let logs = Arc::new(LogStoreClient::new(log_store_url, index_pattern));
    let profiles = Arc::new(profiles);
    let correlator = Correlator::new(profiles.clone(), prom.clone(), logs);
    let tracker = RiskTracker::new(chrono::Duration::seconds(DEFAULT_RISK_TTL_SECS));
    let cache = SummaryCache::new(chrono::Duration::seconds(DEFAULT_CACHE_TTL_SECS));
    let publisher = Arc::new(SnapshotPublisher::new());

    // Shutdown plumbing: first signal flips the watch, everything drains.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping");
        let _ = shutdown_tx.send(true);
    });

    let server = {
        let publisher = publisher.clone();
        let bind = cli.bind.clone();
        let static_dir = cli.static_dir.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher::serve(publisher, &bind, &static_dir, shutdown).await {
                warn!(error = %e, "Dashboard server exited with error");
            }
        })
    };

    // Startup diagnostic: the unfiltered alert universe, once.
    match prom.fetch_alerts(&pattern_index, &HashSet::new()).await {
        Ok(all) => {
            info!(total = all.len(), "Alerts visible on the metrics backend");
            for alert in &all {
                info!(alert = %alert.name, service = %alert.service, severity = %alert.severity, "Visible alert");
            }
        }
        Err(e) => warn!(error = %e, "Startup alert probe failed"),
    }

    let orchestrator = Orchestrator::new(
        pattern_index,
        valid_services,
        prom,
        correlator,
        tracker,
        cache,
        oracle,
        publisher,
        std::time::Duration::from_secs(cli.tick_secs),
        chrono::Duration::seconds(DEFAULT_FORCE_UPDATE_SECS),
    );
    orchestrator.run(shutdown_rx).await;

    // Bounded grace for the HTTP layer and its subscribers.
    if tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .is_err()
    {
        warn!("Dashboard server did not stop within the grace period");
    }

    info!("Watchtower stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
