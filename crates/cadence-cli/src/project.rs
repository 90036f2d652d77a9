//! Shell-command projects built from configuration.

use async_trait::async_trait;
use cadence_config::{ProjectConfig, TriggerConfig};
use cadence_core::{
    Error, Integratable, IntegrationRequest, IntegrationResult, IntegrationStatus, Result,
    Trigger,
};
use cadence_scheduler::{IntervalTrigger, ManualTrigger, MultipleTrigger};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// A project whose integration runs its `run` commands through `sh -c`.
pub struct CommandProject {
    config: ProjectConfig,
    working_dir: PathBuf,
    trigger: Arc<dyn Trigger>,
}

impl CommandProject {
    /// Commands without a `working-dir` run in `default_dir`.
    pub fn new(config: ProjectConfig, default_dir: PathBuf) -> Self {
        let working_dir = match &config.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => default_dir.join(dir),
            None => default_dir,
        };
        let trigger = build_trigger(&config.triggers);

        Self {
            config,
            working_dir,
            trigger,
        }
    }
}

/// Zero triggers means manual; several are combined.
pub fn build_trigger(triggers: &[TriggerConfig]) -> Arc<dyn Trigger> {
    let mut built: Vec<Arc<dyn Trigger>> = triggers
        .iter()
        .map(|trigger| -> Arc<dyn Trigger> {
            match trigger {
                TriggerConfig::Interval {
                    name,
                    seconds,
                    initial_seconds,
                    condition,
                } => Arc::new(
                    IntervalTrigger::new(Duration::from_secs(*seconds))
                        .with_name(name.clone())
                        .with_condition(*condition)
                        .with_initial_delay(Duration::from_secs(*initial_seconds)),
                ),
                TriggerConfig::Manual => Arc::new(ManualTrigger),
            }
        })
        .collect();

    match built.len() {
        0 => Arc::new(ManualTrigger),
        1 => built.remove(0),
        _ => Arc::new(MultipleTrigger::new(built)),
    }
}

#[async_trait]
impl Integratable for CommandProject {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn queue_name(&self) -> &str {
        &self.config.queue
    }

    fn queue_priority(&self) -> i32 {
        self.config.priority
    }

    fn trigger(&self) -> Arc<dyn Trigger> {
        self.trigger.clone()
    }

    async fn integrate(&self, request: &IntegrationRequest) -> Result<IntegrationResult> {
        let started_at = Utc::now();
        info!(project = %self.config.name, request = %request, "Starting integration");

        let mut status = IntegrationStatus::Success;
        for cmd in &self.config.commands {
            info!(project = %self.config.name, command = %cmd, "Running command");

            let exit = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .current_dir(&self.working_dir)
                .envs(&self.config.env)
                .env("CADENCE_PROJECT", &self.config.name)
                .env("CADENCE_BUILD_CONDITION", request.condition().as_str())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| {
                    Error::IntegrationFailed(format!("failed to spawn '{}': {}", cmd, e))
                })?;

            if !exit.success() {
                warn!(
                    project = %self.config.name,
                    command = %cmd,
                    code = ?exit.code(),
                    "Command failed"
                );
                // No exit code means the shell was killed by a signal.
                status = match exit.code() {
                    Some(_) => IntegrationStatus::Failure,
                    None => IntegrationStatus::Exception,
                };
                break;
            }
        }

        let result =
            IntegrationResult::finished(self.config.name.clone(), request.clone(), status, started_at);
        info!(
            project = %self.config.name,
            status = %result.status,
            duration_ms = result.duration().num_milliseconds(),
            "Integration finished"
        );
        Ok(result)
    }

    fn notify_pending_state(&self) {
        info!(project = %self.config.name, queue = %self.config.queue, "Waiting for queue");
    }

    fn notify_sleeping_state(&self) {
        info!(project = %self.config.name, "Sleeping");
    }
}
