//! Flowmeter console - flow classification and meter policy service
//!
//! Classifies flows reported by capture agents, selects the active meter
//! policy for the flow's category and installs metered flow rules through
//! the SDN controller.

use anyhow::{Context, Result};
use flowmeter_console::{
    api::{self, AppState, LookupKind, LookupSets},
    config::ConsoleConfig,
};
use flowmeter_lib::{
    classifier::{Disambiguator, ModelManager, StatsRepository, StatsWorker},
    controller::{ControllerApi, FlowCompiler, OdlClient},
    health::{components, HealthRegistry},
    lookup::{AsnDatabase, DnsServerSet, LoadReport, VpnRangeSet},
    meter::{MeterRepository, MeterService},
    observability::{ConsoleMetrics, StructuredLogger},
    state::ModelStateStore,
    Pipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONSOLE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting flowmeter-console");

    // Load configuration
    let config = ConsoleConfig::load()?;
    info!(
        instance = %config.instance_name,
        port = config.api_port,
        data_dir = %config.data_dir.display(),
        "Console configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL_MANAGER).await;
    health_registry.register(components::LOOKUPS).await;
    health_registry.register(components::CONTROLLER).await;
    health_registry.register(components::STATS).await;

    let metrics = ConsoleMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

    // Lookup sets, seeded from configured files
    let lookups = LookupSets {
        dns: Arc::new(DnsServerSet::new()),
        vpn: Arc::new(VpnRangeSet::new()),
        asn: Arc::new(AsnDatabase::new()),
    };
    let seeds = [
        (LookupKind::Dns, config.dns_seed_file.clone()),
        (LookupKind::Vpn, config.vpn_seed_file.clone()),
        (LookupKind::Asn, config.asn_seed_file.clone()),
    ];
    for (kind, path) in seeds {
        if let Some(path) = path {
            seed_lookup(&lookups, kind, path, &config, &metrics, &logger, &health_registry).await;
        } else {
            metrics.set_lookup_entries(kind.as_str(), lookups.len(kind));
        }
    }

    // Model manager
    let disambiguator = Disambiguator::new(
        lookups.dns.clone(),
        lookups.vpn.clone(),
        lookups.asn.clone(),
    )
    .with_lookup_timeout(config.asn_lookup_timeout());
    let stats = Arc::new(StatsRepository::open(config.stats_path())?);
    let manager = Arc::new(ModelManager::new(
        ModelStateStore::in_memory(),
        disambiguator,
        stats,
        config.manager_config(),
        metrics.clone(),
        logger.clone(),
    ));

    if let Some(models_file) = &config.models_file {
        let imported = manager
            .import_file(models_file)
            .await
            .with_context(|| format!("failed to import {}", models_file.display()))?;
        info!(imported, path = %models_file.display(), "Model configurations imported");
    }
    if let Some(name) = &config.active_model {
        if let Err(e) = manager.activate(name).await {
            warn!(model = %name, error = %e, "Failed to activate configured model");
            health_registry
                .set_degraded(components::MODEL_MANAGER, format!("no active model: {}", e))
                .await;
        }
    }

    // Controller, meters and the classification pipeline
    let controller: Arc<dyn ControllerApi> = Arc::new(OdlClient::new(config.controller.clone())?);
    let meters = Arc::new(MeterService::new(
        MeterRepository::open(config.meters_path())?,
        controller.clone(),
        metrics.clone(),
    ));
    let compiler = FlowCompiler::new(controller, metrics.clone(), logger.clone())
        .with_table(config.flow_table_id, config.flow_priority);
    let pipeline = Arc::new(Pipeline::new(
        manager.clone(),
        meters.clone(),
        compiler,
        logger.clone(),
    ));

    let active = manager.active_model().await?;
    logger.log_startup(CONSOLE_VERSION, active.as_deref());

    // Create shared application state
    let app_state = Arc::new(AppState {
        health_registry: health_registry.clone(),
        metrics: metrics.clone(),
        logger: logger.clone(),
        manager: manager.clone(),
        meters,
        pipeline,
        lookups,
    });

    // Start the stats worker
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stats_worker = StatsWorker::new(manager, health_registry.clone(), config.stats_interval());
    let stats_handle = tokio::spawn(stats_worker.run(shutdown_rx));

    // Mark console as ready after initialization
    health_registry.set_ready(true).await;

    // Start API server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "API server stopped"),
                Err(e) => warn!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    info!("Shutting down");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = stats_handle.await {
        warn!(error = %e, "Stats worker task failed");
    }

    Ok(())
}

/// Seed one lookup set; a failed seed degrades health but does not stop startup
async fn seed_lookup(
    lookups: &LookupSets,
    kind: LookupKind,
    path: PathBuf,
    config: &ConsoleConfig,
    metrics: &ConsoleMetrics,
    logger: &StructuredLogger,
    health: &HealthRegistry,
) {
    let result = lookups.load(kind, path, config.lookup_batch_size).await;
    let report = LoadReport::from_result(kind.as_str(), &result);

    metrics.set_lookup_entries(kind.as_str(), lookups.len(kind));
    logger.log_lookup_reloaded(kind.as_str(), report.success, report.count, &report.message);
    if !report.success {
        health
            .set_degraded(components::LOOKUPS, report.message)
            .await;
    }
}
