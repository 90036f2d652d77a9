//! CLI command implementations.

pub mod run;

use anyhow::{Context, Result};
use cadence_config::{SchedulerConfig, TriggerConfig, load_config};
use std::path::Path;

fn load(path: &Path) -> Result<SchedulerConfig> {
    load_config(path).with_context(|| format!("Invalid configuration: {}", path.display()))
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration is valid");
    println!("  Poll interval: {}ms", config.poll_interval_ms);
    println!("  Queues: {}", config.queue_layout().len());
    println!("  Projects: {}", config.projects.len());
    for project in &config.projects {
        println!(
            "    {} (queue: {}, priority: {}, triggers: {})",
            project.name,
            project.queue,
            project.priority,
            describe_triggers(&project.triggers)
        );
    }
    Ok(())
}

pub fn queues(path: &Path) -> Result<()> {
    let config = load(path)?;

    for (queue, projects) in config.queue_layout() {
        println!("{}", queue);
        if projects.is_empty() {
            println!("  (no projects)");
        }
        for project in projects {
            println!("  {:>4}  {}", project.priority, project.name);
        }
    }
    Ok(())
}

fn describe_triggers(triggers: &[TriggerConfig]) -> String {
    if triggers.is_empty() {
        return "manual".to_string();
    }
    triggers
        .iter()
        .map(|trigger| match trigger {
            TriggerConfig::Interval {
                seconds, condition, ..
            } => format!("every {}s ({})", seconds, condition),
            TriggerConfig::Manual => "manual".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
