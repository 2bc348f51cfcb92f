//! Process entrypoint: loads configuration, wires the cache/tracking/client
//! layers into the five syncers, and runs the orchestrator loop (C7) and the
//! dashboard/health HTTP server (C8) as sibling tasks until a signal
//! requests cooperative shutdown (`SPEC_FULL.md` §4.7, §5).

mod erp;
mod graph_auth;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use sa_cache::TieredCacheStore;
use sa_clients::{GraphClient, RetryPolicy, SafetyAmpClient, SamsaraClient};
use sa_core::config::Config;
use sa_core::traits::{ErpReader, InMemoryErpReader};
use sa_dashboard::{AppState, DashboardServer, MetricsServer};
use sa_orchestrator::{Orchestrator, OrderedSyncers};
use sa_syncers::department::DepartmentSyncer;
use sa_syncers::employee::EmployeeSyncer;
use sa_syncers::job_site::JobSiteSyncer;
use sa_syncers::title::TitleSyncer;
use sa_syncers::vehicle::VehicleSyncer;
use sa_syncers::SyncDeps;
use sa_tracking::{ApiCallTracker, EventTracker, FailureMemory, LoggingNotifier};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const API_CALL_TRACKER_MAX_ENTRIES: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup failure");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration")?;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;

    let cache = Arc::new(
        TieredCacheStore::connect(&config.redis.url(), "cache")
            .await
            .context("connect cache store")?,
    );

    let redis_client =
        redis::Client::open(config.redis.url()).context("open redis client for tracking")?;
    let calls_conn = redis_client
        .get_connection_manager()
        .await
        .context("connect api call tracker")?;
    let failures_conn = redis_client
        .get_connection_manager()
        .await
        .context("connect failure memory")?;

    let calls = Arc::new(ApiCallTracker::new(calls_conn, API_CALL_TRACKER_MAX_ENTRIES));
    let failures = Arc::new(FailureMemory::new(
        failures_conn,
        config.failure_memory.ttl_days,
    ));
    let events = Arc::new(EventTracker::new("output"));

    let retry = RetryPolicy {
        max_attempts: config.http_policy.max_retry_attempts,
        request_timeout: config.http_policy.request_timeout,
    };

    let safetyamp = Arc::new(SafetyAmpClient::new(&config.safetyamp, retry, Some(calls.clone())));

    let samsara = config
        .samsara
        .as_ref()
        .map(|cfg| Arc::new(SamsaraClient::new(cfg, retry, Some(calls.clone()))));

    let graph = match &config.graph {
        Some(cfg) => match graph_auth::fetch_client_credentials_token(cfg).await {
            Ok(token) => Some(Arc::new(GraphClient::new(&token, retry, Some(calls.clone())))),
            Err(e) => {
                tracing::warn!(error = %e, "graph token acquisition failed, continuing without identity-provider email overrides");
                None
            }
        },
        None => None,
    };

    let erp: Arc<dyn ErpReader> = match &config.erp {
        Some(cfg) => match erp::erp_reader_from_env(cfg) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(error = %e, "ERP connection unavailable, falling back to an empty reader");
                Arc::new(InMemoryErpReader::new())
            }
        },
        None => {
            tracing::warn!("SQL_SERVER/SQL_DATABASE not configured, running with an empty ERP reader");
            Arc::new(InMemoryErpReader::new())
        }
    };

    let deps = || SyncDeps {
        cache: cache.clone(),
        events: events.clone(),
        failures: failures.clone(),
        calls: calls.clone(),
    };

    let department_syncer = Arc::new(DepartmentSyncer::new(deps(), safetyamp.clone(), erp.clone()));
    let job_syncer = Arc::new(JobSiteSyncer::new(deps(), safetyamp.clone(), erp.clone()));
    let title_syncer = Arc::new(TitleSyncer::new(deps(), safetyamp.clone(), erp.clone()));
    let employee_syncer = Arc::new(EmployeeSyncer::new(
        deps(),
        safetyamp.clone(),
        graph.clone(),
        erp.clone(),
    ));
    let vehicle_syncer = samsara.clone().map(|samsara| {
        Arc::new(VehicleSyncer::new(
            deps(),
            samsara,
            safetyamp.clone(),
            config.vehicle_defaults.default_site_id,
            config.vehicle_defaults.default_vehicle_asset_type_id,
        ))
    });

    let vehicles: Arc<dyn sa_syncers::Syncer + Send + Sync> = match vehicle_syncer {
        Some(s) => s,
        None => Arc::new(NoopSyncer),
    };

    let syncers = OrderedSyncers {
        departments: department_syncer,
        jobs: job_syncer,
        titles: title_syncer,
        vehicles,
        employees: employee_syncer,
    };

    let orchestrator = Arc::new(Orchestrator::new(
        cache.clone(),
        events.clone(),
        syncers,
        config.orchestrator.sync_interval,
        Arc::new(LoggingNotifier),
    ));

    let dashboard_token = config.dashboard.token.as_ref().map(|s| s.expose().to_string());
    let dashboard_state = Arc::new(AppState::new(
        cache.clone(),
        events.clone(),
        failures.clone(),
        calls.clone(),
        safetyamp.clone(),
        samsara.clone(),
        erp.clone(),
        orchestrator.trigger_queue(),
        orchestrator.shutdown_handle(),
        dashboard_token,
        metrics_handle,
    ));

    let bind: SocketAddr = format!("{}:{}", config.listen.bind_address, config.listen.port)
        .parse()
        .context("parse application bind address")?;
    let dashboard = DashboardServer::start(dashboard_state.clone(), bind)
        .await
        .context("start dashboard server")?;
    tracing::info!(addr = %dashboard.addr, "dashboard listening");

    let metrics_bind: SocketAddr = format!(
        "{}:{}",
        config.listen.bind_address, config.listen.metrics_port
    )
    .parse()
    .context("parse metrics bind address")?;
    let metrics_server = MetricsServer::start(dashboard_state, metrics_bind)
        .await
        .context("start metrics server")?;
    tracing::info!(addr = %metrics_server.addr, "metrics listening");

    let orchestrator_task = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");
    orchestrator.request_shutdown();

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), orchestrator_task).await;
    dashboard.shutdown().await.context("shut down dashboard server")?;
    metrics_server.shutdown().await.context("shut down metrics server")?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Placeholder for the vehicle syncer slot when Samsara credentials are
/// absent (§6: `SAMSARA_DOMAIN`/`SAMSARA_API_KEY` unset disables that
/// collaborator without failing startup).
struct NoopSyncer;

#[async_trait::async_trait]
impl sa_syncers::Syncer for NoopSyncer {
    fn entity_type(&self) -> &'static str {
        "vehicles"
    }

    async fn sync(&self) -> sa_core::Result<sa_core::models::SessionSummary> {
        tracing::debug!("vehicle sync skipped: Samsara not configured");
        Ok(sa_core::models::SessionSummary::default())
    }
}
