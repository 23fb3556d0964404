// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation
//!
//! Wires the remediation engine from the node configuration, serves the
//! HTTP API in the foreground and drains the coordinator on shutdown.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use shim_core::{
    application::{
        create_audit_log, ActionRegistry, ApprovalGate, Coordinator, CoordinatorSettings,
        WorkflowServices,
    },
    domain::node_config::MonitorConfigManifest,
    infrastructure::{EventBus, HttpHealthChecker, PlaybookDiagnostician, ShellExecutor},
    presentation::api,
};

/// Health checks get this long per request
const HEALTH_CHECK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Load, override and validate the node configuration
pub fn load_config(config_path: Option<PathBuf>) -> Result<MonitorConfigManifest> {
    let config =
        MonitorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Build the engine's collaborators from configuration
pub async fn build_services(config: &MonitorConfigManifest) -> Result<WorkflowServices> {
    let spec = &config.spec;

    let registry = ActionRegistry::with_builtin_catalog().context("Built-in action catalog is invalid")?;
    for action in &spec.actions {
        registry
            .register(action.clone())
            .with_context(|| format!("Failed to register action '{}'", action.name))?;
    }
    for allowed in &spec.remediation.allowed_actions {
        if registry.resolve(allowed.as_str()).is_err() {
            warn!("Allowed action '{}' is not registered and will never be chosen", allowed);
        }
    }

    let backend = spec.audit.storage_backend()?;
    let audit = create_audit_log(&backend)
        .await
        .context("Failed to initialize audit log")?;

    let diagnostician = PlaybookDiagnostician::new(spec.playbooks.iter().cloned())
        .context("Invalid playbook configuration")?;

    let mut executor = ShellExecutor::new(spec.remediation.dry_run).with_env(spec.executor.env.clone());
    if let Some(dir) = &spec.executor.working_dir {
        executor = executor.with_working_dir(dir);
    }

    let health_checker = HttpHealthChecker::new(spec.health_check.endpoint.clone(), HEALTH_CHECK_TIMEOUT)
        .context("Failed to build health checker")?;

    let event_bus = EventBus::with_default_capacity();
    info!(
        actions = registry.len(),
        playbooks = diagnostician.len(),
        audit_backend = ?spec.audit.backend,
        dry_run = spec.remediation.dry_run,
        "Remediation services initialized"
    );

    Ok(WorkflowServices {
        registry: Arc::new(registry),
        gate: Arc::new(ApprovalGate::new(event_bus.clone())),
        audit,
        diagnostician: Arc::new(diagnostician),
        executor: Arc::new(executor),
        health_checker: Arc::new(health_checker),
        event_bus,
        policy: Arc::new(spec.remediation.to_policy()),
    })
}

pub fn coordinator_settings(config: &MonitorConfigManifest) -> CoordinatorSettings {
    let spec = &config.spec;
    CoordinatorSettings {
        max_active_workflows: spec.remediation.max_active_workflows,
        approval_sweep_interval: spec.remediation.approval_sweep_interval,
        history_retention: spec.retention.window().to_std().unwrap_or_default(),
        janitor_interval: spec.retention.janitor_interval,
    }
}

/// Build a coordinator with its background tasks running
pub async fn build_coordinator(config: &MonitorConfigManifest) -> Result<Arc<Coordinator>> {
    let services = build_services(config).await?;
    let coordinator = Coordinator::new(services, coordinator_settings(config));
    coordinator.start_background_tasks();
    Ok(coordinator)
}

/// Run the engine and its HTTP API until Ctrl+C or SIGTERM
pub async fn start_daemon(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let config = load_config(config_path)?;
    info!(
        "SHIM daemon starting (PID: {}, node: {})",
        std::process::id(),
        config.metadata.name
    );

    install_metrics_exporter(&config);

    let coordinator = build_coordinator(&config).await?;
    let app = api::app(Arc::clone(&coordinator));

    let network = config.network();
    let addr = format!(
        "{}:{}",
        host.unwrap_or(network.bind_address),
        port.unwrap_or(network.port)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Daemon shutting down");
    coordinator.shutdown().await;

    served.context("HTTP server failed")
}

fn install_metrics_exporter(config: &MonitorConfigManifest) {
    let Some(metrics) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    else {
        return;
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => info!("Prometheus metrics exporter listening on {}", addr),
        Err(e) => error!("Failed to install Prometheus exporter on {}: {}", addr, e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
apiVersion: shim.dev/v1
kind: MonitorConfig
metadata:
  name: test-node
spec:
  remediation:
    dry_run: true
    max_active_workflows: 10
  retention:
    history_retention_days: 2
  actions:
    - name: flush_queue
      command:
        program: queue-admin
        args: ["flush", "{{target}}"]
      risk_tier: safe
  playbooks:
    - symptom_class: queue_backlog
      root_cause: consumer stalled
      actions: [flush_queue]
"#;

    #[tokio::test]
    async fn test_services_include_configured_actions() {
        let config = MonitorConfigManifest::from_yaml_str(CONFIG).unwrap();
        config.validate().unwrap();

        let services = build_services(&config).await.unwrap();
        assert!(services.registry.resolve("flush_queue").is_ok());
        assert!(services.registry.resolve("clear_cache").is_ok());

        let settings = coordinator_settings(&config);
        assert_eq!(settings.max_active_workflows, Some(10));
        assert_eq!(settings.history_retention.as_secs(), 2 * 24 * 60 * 60);
    }
}
