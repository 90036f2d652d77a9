//! Integrator identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one project integrator for the lifetime of the process.
///
/// Queue items carry the id of the integrator that enqueued them, which is
/// how an integrator finds (and cancels) its own pending work.
/// Uses UUIDv7 so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct IntegratorId(Uuid);

impl IntegratorId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IntegratorId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for IntegratorId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for IntegratorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_parse_back() {
        let a = IntegratorId::new();
        let b = IntegratorId::new();
        assert_ne!(a, b);

        let parsed: IntegratorId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }
}
