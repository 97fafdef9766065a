//! Shared types used across workpool crates.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a worker container (a unit of hosting capacity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a movable work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Description of a container as observed from the surrounding framework.
///
/// `config` holds flat key → value entries; the balancing policy reads its
/// workrate thresholds from `{metric}.threshold.low` / `{metric}.threshold.high`
/// keys in this map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub id: ContainerId,
    /// Flat configuration entries (threshold keys live here).
    #[serde(default)]
    pub config: HashMap<String, f64>,
    /// Placement location label, if the container is location-bound.
    #[serde(default)]
    pub location: Option<String>,
    /// Startable containers are only treated as pool members once they
    /// report up; non-startable ones join immediately.
    #[serde(default = "default_true")]
    pub startable: bool,
}

impl ContainerSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ContainerId::new(id),
            config: HashMap::new(),
            location: None,
            startable: true,
        }
    }
}

/// Description of a movable work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSpec {
    pub id: ItemId,
    /// Immovable items contribute workrate but are never relocated.
    #[serde(default)]
    pub immovable: bool,
    /// If present, the item may only be placed in containers whose location
    /// is in this set. Absent means anywhere.
    #[serde(default)]
    pub allowed_locations: Option<HashSet<String>>,
    /// Last observed workrate at the time the item joined, if any.
    #[serde(default)]
    pub current_workrate: Option<f64>,
}

impl ItemSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(id),
            immovable: false,
            allowed_locations: None,
            current_workrate: None,
        }
    }
}

/// Point-in-time aggregate view of the pool, as carried on hot/cold
/// notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_size: usize,
    pub current_workrate: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_spec_defaults_to_startable() {
        let spec = ContainerSpec::new("c1");
        assert!(spec.startable);
        assert!(spec.config.is_empty());
        assert_eq!(spec.location, None);
    }

    #[test]
    fn item_spec_defaults_to_movable() {
        let spec = ItemSpec::new("i1");
        assert!(!spec.immovable);
        assert_eq!(spec.allowed_locations, None);
        assert_eq!(spec.current_workrate, None);
    }

    #[test]
    fn ids_display_as_their_inner_string() {
        assert_eq!(ContainerId::new("c1").to_string(), "c1");
        assert_eq!(ItemId::new("i1").to_string(), "i1");
    }
}
