//! Foreground scheduler command.

use anyhow::{Context, Result};
use cadence_core::Integratable;
use cadence_scheduler::{IntegrationQueueSet, IntegratorManager, IntegratorOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::project::CommandProject;

/// How often busy queues are logged while running.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Run every configured project until Ctrl-C.
///
/// The first Ctrl-C stops integrators once their current cycle ends; a second
/// one aborts them.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load(config_path)?;

    // Relative working directories resolve against the config file's directory
    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .canonicalize()
        .context("Failed to resolve working directory")?;

    info!(config = %config_path.display(), base_dir = %base_dir.display(), "Loaded configuration");

    let projects: Vec<Arc<dyn Integratable>> = config
        .projects
        .iter()
        .cloned()
        .map(|project| {
            Arc::new(CommandProject::new(project, base_dir.clone())) as Arc<dyn Integratable>
        })
        .collect();

    if projects.is_empty() {
        anyhow::bail!("No projects defined in {}", config_path.display());
    }

    let options = IntegratorOptions {
        poll_interval: config.poll_interval(),
    };
    // Declared queues form a closed set; otherwise queues follow the projects.
    let manager = if config.queues.is_empty() {
        IntegratorManager::new(projects, options)
    } else {
        let queues = Arc::new(IntegrationQueueSet::new());
        for queue in &config.queues {
            queues.add(queue);
        }
        IntegratorManager::with_queues(projects, queues, options)
    }
    .context("Failed to set up integrators")?;

    manager.start_all();
    println!(
        "Running {} project(s) on {} queue(s). Press Ctrl-C to stop.",
        manager.integrators().len(),
        manager.queues().len()
    );

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => log_queues(&manager),
        }
    }
    println!("\nStopping after current integrations finish (Ctrl-C again to abort)...");

    tokio::select! {
        _ = manager.stop_all() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Second interrupt, aborting integrations");
            manager.abort_all().await;
        }
    }

    println!("\n--- Project Summary ---");
    for status in manager.statuses() {
        let last = status
            .last_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "never built".to_string());
        println!(
            "  {} [{}] - {} integration(s), last: {}",
            status.project, status.queue, status.integrations, last
        );
    }

    Ok(())
}

fn log_queues(manager: &IntegratorManager) {
    for snapshot in manager.queue_snapshots() {
        if snapshot.integrations.is_empty() {
            continue;
        }
        match serde_json::to_string(&snapshot.integrations) {
            Ok(integrations) => {
                debug!(queue = %snapshot.name, %integrations, "Queue status");
            }
            Err(e) => warn!(queue = %snapshot.name, error = %e, "Failed to encode queue status"),
        }
    }
}
