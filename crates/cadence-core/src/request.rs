//! Integration requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a build should run.
///
/// Variants are ordered by strength: a `ForceBuild` outranks an
/// `IfModificationExists`, which outranks `NoBuild`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildCondition {
    /// Run the cycle without building (e.g. only to refresh state).
    NoBuild,
    /// Build only if the project detects modifications.
    IfModificationExists,
    /// Build unconditionally.
    ForceBuild,
}

impl BuildCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildCondition::NoBuild => "no-build",
            BuildCondition::IfModificationExists => "if-modification-exists",
            BuildCondition::ForceBuild => "force-build",
        }
    }
}

impl fmt::Display for BuildCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "no-build" | "nobuild" => Ok(BuildCondition::NoBuild),
            "if-modification-exists" | "ifmodificationexists" => {
                Ok(BuildCondition::IfModificationExists)
            }
            "force-build" | "forcebuild" | "force" => Ok(BuildCondition::ForceBuild),
            other => Err(format!(
                "unknown build condition: {other} (expected \"no-build\", \"if-modification-exists\" or \"force-build\")"
            )),
        }
    }
}

/// An immutable request to run one integration cycle.
///
/// Created by a trigger firing, by an explicit caller, or synthesized for a
/// forced build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    condition: BuildCondition,
    source: String,
    requested_at: DateTime<Utc>,
}

impl IntegrationRequest {
    /// Create a request with the given condition, attributed to `source`
    /// (usually the name of the trigger that fired).
    pub fn new(condition: BuildCondition, source: impl Into<String>) -> Self {
        Self {
            condition,
            source: source.into(),
            requested_at: Utc::now(),
        }
    }

    /// Create a `ForceBuild` request.
    pub fn force_build(source: impl Into<String>) -> Self {
        Self::new(BuildCondition::ForceBuild, source)
    }

    pub fn condition(&self) -> BuildCondition {
        self.condition
    }

    /// Name of the trigger (or caller) that produced this request.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
}

impl fmt::Display for IntegrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} triggered by {}", self.condition, self.source)
    }
}
