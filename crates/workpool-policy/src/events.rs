//! Event types flowing through the balancing subsystem.
//!
//! `MembershipEvent` is the raw, possibly noisy feed from the surrounding
//! framework (duplicated joins, out-of-order up/down transitions).
//! `PoolEvent` is the de-duplicated stream the policy consumes.
//! `PoolNotification` is what the policy emits for an external autoscaler.

use serde::{Deserialize, Serialize};

use workpool_model::{ContainerId, ContainerSpec, ItemId, ItemSpec, PoolSnapshot};

/// Raw framework notifications, before de-duplication.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A container joined the container group.
    ContainerJoined(ContainerSpec),
    /// A container left the container group.
    ContainerLeft(ContainerId),
    /// A container's service-up state changed.
    ContainerUp { container: ContainerId, up: bool },
    /// An item joined the item group, possibly already hosted somewhere.
    ItemJoined {
        item: ItemSpec,
        container: Option<ContainerId>,
    },
    /// An item left the item group.
    ItemLeft(ItemId),
    /// An item's hosting-container attribute changed.
    ItemContainerChanged {
        item: ItemId,
        container: Option<ContainerId>,
    },
    /// A new metric observation for an item.
    MetricUpdated { item: ItemId, value: f64 },
}

/// De-duplicated pool events, as consumed by the balancing policy.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    ContainerAdded(ContainerSpec),
    ContainerRemoved(ContainerId),
    ItemAdded {
        item: ItemSpec,
        container: Option<ContainerId>,
    },
    ItemRemoved(ItemId),
    ItemMoved {
        item: ItemId,
        container: ContainerId,
    },
    MetricUpdated {
        item: ItemId,
        value: f64,
    },
}

/// Whether the pool is over- or under-provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Temperature {
    Hot,
    Cold,
}

/// Emitted after a rebalance pass when the pool is hot or cold, for
/// consumption by an external autoscaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolNotification {
    pub temperature: Temperature,
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
    /// Suggested pool size: current workrate divided by the per-container
    /// share of the violated threshold, rounded up.
    pub suggested_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_with_flattened_snapshot() {
        let notification = PoolNotification {
            temperature: Temperature::Hot,
            snapshot: PoolSnapshot {
                pool_size: 2,
                current_workrate: 50.0,
                low_threshold: 20.0,
                high_threshold: 40.0,
            },
            suggested_size: 3,
        };

        let toml = toml::to_string(&notification).unwrap();
        assert!(toml.contains("pool_size = 2"));
        assert!(toml.contains("suggested_size = 3"));

        let back: PoolNotification = toml::from_str(&toml).unwrap();
        assert_eq!(back, notification);
    }
}
