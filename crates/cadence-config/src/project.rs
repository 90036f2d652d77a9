//! Scheduler and project configuration parsing.

use crate::{ConfigError, ConfigResult};
use cadence_core::BuildCondition;
use kdl::{KdlDocument, KdlNode};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pause between empty trigger polls when `scheduler` does not set one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Upper bound for trigger intervals and initial delays: one year.
pub const MAX_TRIGGER_SECONDS: u64 = 365 * 24 * 60 * 60;

/// A whole configuration file.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    /// Milliseconds the integrators sleep after a poll that yields nothing.
    pub poll_interval_ms: u64,
    /// Explicitly declared queues. Empty means queues are created on demand.
    pub queues: Vec<String>,
    pub projects: Vec<ProjectConfig>,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Queue names in use, with their projects in admission order
    /// (priority, then declaration order).
    pub fn queue_layout(&self) -> BTreeMap<&str, Vec<&ProjectConfig>> {
        let mut layout: BTreeMap<&str, Vec<&ProjectConfig>> = BTreeMap::new();
        for queue in &self.queues {
            layout.entry(queue.as_str()).or_default();
        }
        for project in &self.projects {
            layout.entry(project.queue.as_str()).or_default().push(project);
        }
        for projects in layout.values_mut() {
            projects.sort_by_key(|p| p.priority);
        }
        layout
    }
}

/// One project definition.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Queue the project builds through; defaults to the project name.
    pub queue: String,
    /// Lower values are served first.
    pub priority: i32,
    pub triggers: Vec<TriggerConfig>,
    /// Shell commands run, in order, for each integration.
    pub commands: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// When a project builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Build every `seconds` after the previous integration.
    Interval {
        name: String,
        seconds: u64,
        initial_seconds: u64,
        condition: BuildCondition,
    },
    /// Build only on request.
    Manual,
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<SchedulerConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse a configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<SchedulerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
    let mut queues = Vec::new();
    let mut projects: Vec<ProjectConfig> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => {
                if let Some(ms) = get_int_prop(node, "poll-interval-ms") {
                    poll_interval_ms = u64::try_from(ms).map_err(|_| {
                        ConfigError::invalid("poll-interval-ms", format!("{ms} is negative"))
                    })?;
                }
            }
            "queue" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("queue name".to_string()))?;
                if queues.contains(&name) {
                    return Err(ConfigError::Duplicate(format!("queue '{}'", name)));
                }
                queues.push(name);
            }
            "project" => {
                let project = parse_project(node)?;
                if projects.iter().any(|p| p.name == project.name) {
                    return Err(ConfigError::Duplicate(format!("project '{}'", project.name)));
                }
                projects.push(project);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    // Declaring any queue switches to a closed set of queues.
    if !queues.is_empty() {
        let declared: HashSet<&str> = queues.iter().map(String::as_str).collect();
        if let Some(project) = projects.iter().find(|p| !declared.contains(p.queue.as_str())) {
            return Err(ConfigError::UndeclaredQueue {
                project: project.name.clone(),
                queue: project.queue.clone(),
            });
        }
    }

    Ok(SchedulerConfig {
        poll_interval_ms,
        queues,
        projects,
    })
}

fn parse_project(node: &KdlNode) -> ConfigResult<ProjectConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let mut queue = None;
    let mut priority = 0;
    let mut triggers = Vec::new();
    let mut commands = Vec::new();
    let mut working_dir = None;
    let mut env = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "queue" => {
                    queue = Some(get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("queue name for project '{}'", name))
                    })?);
                }
                "priority" => {
                    let value = get_first_int_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("priority for project '{}'", name))
                    })?;
                    priority = i32::try_from(value).map_err(|_| {
                        ConfigError::invalid("priority", format!("{value} is out of range"))
                    })?;
                }
                "trigger" => {
                    triggers.push(parse_trigger(child)?);
                }
                "run" => {
                    if let Some(cmd) = get_first_string_arg(child) {
                        commands.push(cmd);
                    }
                }
                "working-dir" | "working_dir" => {
                    working_dir = get_first_string_arg(child).map(PathBuf::from);
                }
                "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            if let Some(val) = get_first_string_arg(var) {
                                env.insert(var.name().value().to_string(), val);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ProjectConfig {
        queue: queue.unwrap_or_else(|| name.clone()),
        name,
        priority,
        triggers,
        commands,
        working_dir,
        env,
    })
}

fn parse_trigger(node: &KdlNode) -> ConfigResult<TriggerConfig> {
    let kind = get_first_string_arg(node).unwrap_or_default();

    match kind.as_str() {
        "interval" => {
            let seconds = get_int_prop(node, "seconds")
                .ok_or_else(|| ConfigError::MissingField("interval seconds".to_string()))?;
            let seconds = bounded_seconds("interval seconds", seconds, 1)?;
            let initial_seconds = match get_int_prop(node, "initial-seconds") {
                Some(value) => bounded_seconds("initial-seconds", value, 0)?,
                None => 0,
            };
            let condition = match get_string_prop(node, "condition") {
                Some(condition) => condition
                    .parse()
                    .map_err(|message: String| ConfigError::invalid("condition", message))?,
                None => BuildCondition::IfModificationExists,
            };

            Ok(TriggerConfig::Interval {
                name: get_string_prop(node, "name").unwrap_or_else(|| "interval".to_string()),
                seconds,
                initial_seconds,
                condition,
            })
        }
        "manual" | "" => Ok(TriggerConfig::Manual),
        _ => Err(ConfigError::invalid(
            "trigger type",
            format!("unknown trigger type: {}", kind),
        )),
    }
}

/// Check a seconds value lies in `min..=MAX_TRIGGER_SECONDS`.
fn bounded_seconds(field: &str, value: i128, min: u64) -> ConfigResult<u64> {
    match u64::try_from(value) {
        Ok(secs) if (min..=MAX_TRIGGER_SECONDS).contains(&secs) => Ok(secs),
        _ => Err(ConfigError::invalid(
            field,
            format!("must be between {min} and {MAX_TRIGGER_SECONDS}, got {value}"),
        )),
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_int_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}
