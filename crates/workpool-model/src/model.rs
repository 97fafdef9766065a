//! Pool model — in-memory bookkeeping of containers, items, and workrates.
//!
//! Events from the surrounding framework arrive concurrently and possibly
//! reordered or duplicated; every mutator here is safe to call in any order
//! and any number of times. Each mutator takes the write lock once, so the
//! forward (item → container) and reverse (container → items) maps can never
//! be observed disagreeing. Nothing holds the lock across a rebalance pass.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, trace};

use crate::types::{ContainerId, ContainerSpec, ItemId, ItemSpec, PoolSnapshot};

/// Per-container registration: thresholds and optional location.
#[derive(Debug, Clone)]
struct ContainerEntry {
    low_threshold: f64,
    high_threshold: f64,
    location: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Registered containers with their thresholds. Absence means the
    /// container is unknown or has been removed.
    containers: HashMap<ContainerId, ContainerEntry>,
    /// Container iteration order (insertion order), so that hot/cold search
    /// tie-breaks are deterministic.
    container_order: Vec<ContainerId>,
    /// Reverse map: container → items it hosts. Kept in lock-step with
    /// `item_container`. An entry may outlive its container registration
    /// while removed-container items await their own remove/move events.
    container_items: HashMap<ContainerId, HashSet<ItemId>>,
    /// Forward map: item → hosting container (`None` = known item with no
    /// container yet). Membership in this map is what "known item" means.
    item_container: HashMap<ItemId, Option<ContainerId>>,
    /// Last observed workrate per item. Absent means not yet reported.
    item_workrates: HashMap<ItemId, f64>,
    /// Items flagged immovable.
    immovable_items: HashSet<ItemId>,
    /// Per-item placement constraints. Absent means anywhere.
    item_locations: HashMap<ItemId, HashSet<String>>,
    /// Sum of registered containers' low thresholds, maintained incrementally.
    pool_low_threshold: f64,
    /// Sum of registered containers' high thresholds, maintained incrementally.
    pool_high_threshold: f64,
    /// Rolling sum of item workrates, adjusted by delta on every update.
    current_pool_workrate: f64,
}

/// Bookkeeping model for a balanceable pool.
///
/// Mutators are idempotent-safe against duplicate and out-of-order delivery.
/// Queries returning `Option` use `None` for "container/item unknown or
/// removed"; callers must check for `None` before any arithmetic.
#[derive(Debug, Default)]
pub struct PoolModel {
    name: String,
    inner: RwLock<Inner>,
}

impl PoolModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Mutators ────────────────────────────────────────────────────

    /// Register a container with its workrate thresholds.
    ///
    /// A duplicate add (container already a member) is ignored without
    /// re-adjusting the pool threshold sums.
    pub fn on_container_added(&self, spec: &ContainerSpec, low_threshold: f64, high_threshold: f64) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        if inner.containers.contains_key(&spec.id) {
            debug!(pool = %self.name, container = %spec.id, "duplicate container add ignored");
            return;
        }
        inner.containers.insert(
            spec.id.clone(),
            ContainerEntry {
                low_threshold,
                high_threshold,
                location: spec.location.clone(),
            },
        );
        inner.container_order.push(spec.id.clone());
        inner.container_items.entry(spec.id.clone()).or_default();
        inner.pool_low_threshold += low_threshold;
        inner.pool_high_threshold += high_threshold;
        trace!(pool = %self.name, container = %spec.id, low_threshold, high_threshold, "container added");
    }

    /// Deregister a container, subtracting its thresholds from the pool sums.
    ///
    /// Removing an unknown (or already-removed) container is a no-op, so a
    /// duplicated remove event never double-subtracts. Items still assigned
    /// to the container keep their assignment until their own move/remove
    /// events arrive.
    pub fn on_container_removed(&self, container: &ContainerId) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        let Some(entry) = inner.containers.remove(container) else {
            debug!(pool = %self.name, %container, "removal of unknown container ignored");
            return;
        };
        inner.container_order.retain(|c| c != container);
        inner.pool_low_threshold -= entry.low_threshold;
        inner.pool_high_threshold -= entry.high_threshold;
        trace!(pool = %self.name, %container, "container removed");
    }

    /// Associate an item with a container; most recent association wins.
    ///
    /// Re-adding a known item detaches it from its previous container first.
    /// A previously reported workrate is kept.
    pub fn on_item_added(&self, spec: &ItemSpec, container: Option<&ContainerId>) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        if let Some(previous) = inner.item_container.get(&spec.id).cloned().flatten() {
            if let Some(set) = inner.container_items.get_mut(&previous) {
                set.remove(&spec.id);
            }
        }
        inner
            .item_container
            .insert(spec.id.clone(), container.cloned());
        if let Some(container) = container {
            inner
                .container_items
                .entry(container.clone())
                .or_default()
                .insert(spec.id.clone());
        }
        if spec.immovable {
            inner.immovable_items.insert(spec.id.clone());
        } else {
            inner.immovable_items.remove(&spec.id);
        }
        match &spec.allowed_locations {
            Some(locations) => {
                inner
                    .item_locations
                    .insert(spec.id.clone(), locations.clone());
            }
            None => {
                inner.item_locations.remove(&spec.id);
            }
        }
        trace!(pool = %self.name, item = %spec.id,
               container = container.map(|c| c.0.as_str()).unwrap_or("<none>"),
               immovable = spec.immovable, "item added");
    }

    /// Deregister an item, subtracting its last known workrate from the pool
    /// total and forgetting its movability and placement constraints.
    pub fn on_item_removed(&self, item: &ItemId) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        let Some(container) = inner.item_container.remove(item) else {
            debug!(pool = %self.name, %item, "removal of unknown item ignored");
            return;
        };
        if let Some(container) = container {
            if let Some(set) = inner.container_items.get_mut(&container) {
                set.remove(item);
            }
        }
        if let Some(last) = inner.item_workrates.remove(item) {
            inner.current_pool_workrate -= last;
        }
        inner.immovable_items.remove(item);
        inner.item_locations.remove(item);
        trace!(pool = %self.name, %item, "item removed");
    }

    /// Record a new workrate observation for an item.
    ///
    /// Only applied if the item is known, which guards against
    /// update-after-remove races. The pool total is adjusted by the delta
    /// from the previous value (0 if none).
    pub fn on_item_workrate_updated(&self, item: &ItemId, value: f64) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        if !inner.item_container.contains_key(item) {
            debug!(pool = %self.name, %item, value, "workrate update for unknown item ignored");
            return;
        }
        let previous = inner.item_workrates.insert(item.clone(), value).unwrap_or(0.0);
        inner.current_pool_workrate += value - previous;
        trace!(pool = %self.name, %item, value, previous, "item workrate updated");
    }

    /// Reassign an item to a new container.
    ///
    /// If the item is unknown this logs and no-ops; a subsequent
    /// `on_item_added` is assumed to supply the correct container.
    pub fn on_item_moved(&self, item: &ItemId, new_container: &ContainerId) {
        let mut inner = self.inner.write().expect("pool model lock poisoned");
        let Some(previous) = inner.item_container.get(item).cloned() else {
            debug!(pool = %self.name, %item, container = %new_container,
                   "move of unknown item ignored");
            return;
        };
        if let Some(previous) = previous {
            if let Some(set) = inner.container_items.get_mut(&previous) {
                set.remove(item);
            }
        }
        inner
            .item_container
            .insert(item.clone(), Some(new_container.clone()));
        inner
            .container_items
            .entry(new_container.clone())
            .or_default()
            .insert(item.clone());
        trace!(pool = %self.name, %item, container = %new_container, "item moved");
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Registered containers in insertion order.
    pub fn containers(&self) -> Vec<ContainerId> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.container_order.clone()
    }

    pub fn pool_size(&self) -> usize {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.containers.len()
    }

    /// Total workrate of a container: the sum of the absolute values of its
    /// items' known workrates. `None` if the container is unknown/removed.
    pub fn total_workrate(&self, container: &ContainerId) -> Option<f64> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        if !inner.containers.contains_key(container) {
            return None;
        }
        let total = inner
            .container_items
            .get(container)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| inner.item_workrates.get(item))
                    .map(|rate| rate.abs())
                    .sum()
            })
            .unwrap_or(0.0);
        Some(total)
    }

    /// Snapshot of the known item workrates hosted by a container, ordered by
    /// item id. `None` if the container is unknown/removed.
    pub fn item_workrates(&self, container: &ContainerId) -> Option<BTreeMap<ItemId, f64>> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        if !inner.containers.contains_key(container) {
            return None;
        }
        let map = inner
            .container_items
            .get(container)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        inner
                            .item_workrates
                            .get(item)
                            .map(|rate| (item.clone(), *rate))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(map)
    }

    pub fn low_threshold(&self, container: &ContainerId) -> Option<f64> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.containers.get(container).map(|e| e.low_threshold)
    }

    pub fn high_threshold(&self, container: &ContainerId) -> Option<f64> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.containers.get(container).map(|e| e.high_threshold)
    }

    pub fn container_location(&self, container: &ContainerId) -> Option<String> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner
            .containers
            .get(container)
            .and_then(|e| e.location.clone())
    }

    /// An item is movable iff it is known and not flagged immovable.
    pub fn is_item_movable(&self, item: &ItemId) -> bool {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.item_container.contains_key(item) && !inner.immovable_items.contains(item)
    }

    /// Whether an item may be placed in the given location. Items without a
    /// placement constraint are allowed anywhere.
    pub fn is_item_allowed_in(&self, item: &ItemId, location: &str) -> bool {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner
            .item_locations
            .get(item)
            .is_none_or(|allowed| allowed.contains(location))
    }

    /// The container currently hosting an item, if the item is known and
    /// assigned.
    pub fn parent_container(&self, item: &ItemId) -> Option<ContainerId> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.item_container.get(item).cloned().flatten()
    }

    pub fn items_for_container(&self, container: &ContainerId) -> HashSet<ItemId> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner
            .container_items
            .get(container)
            .cloned()
            .unwrap_or_default()
    }

    pub fn item_workrate(&self, item: &ItemId) -> Option<f64> {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.item_workrates.get(item).copied()
    }

    pub fn item_count(&self) -> usize {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.item_container.len()
    }

    pub fn current_pool_workrate(&self) -> f64 {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.current_pool_workrate
    }

    pub fn pool_low_threshold(&self) -> f64 {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.pool_low_threshold
    }

    pub fn pool_high_threshold(&self) -> f64 {
        let inner = self.inner.read().expect("pool model lock poisoned");
        inner.pool_high_threshold
    }

    /// Hot: aggregate workrate exceeds the aggregate high threshold.
    /// Always false for an empty pool.
    pub fn is_hot(&self) -> bool {
        let inner = self.inner.read().expect("pool model lock poisoned");
        !inner.containers.is_empty() && inner.current_pool_workrate > inner.pool_high_threshold
    }

    /// Cold: aggregate workrate is below the aggregate low threshold.
    /// Always false for an empty pool.
    pub fn is_cold(&self) -> bool {
        let inner = self.inner.read().expect("pool model lock poisoned");
        !inner.containers.is_empty() && inner.current_pool_workrate < inner.pool_low_threshold
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.read().expect("pool model lock poisoned");
        PoolSnapshot {
            pool_size: inner.containers.len(),
            current_workrate: inner.current_pool_workrate,
            low_threshold: inner.pool_low_threshold,
            high_threshold: inner.pool_high_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str) -> ContainerSpec {
        ContainerSpec::new(id)
    }

    fn item(id: &str) -> ItemSpec {
        ItemSpec::new(id)
    }

    fn cid(id: &str) -> ContainerId {
        ContainerId::new(id)
    }

    fn iid(id: &str) -> ItemId {
        ItemId::new(id)
    }

    #[test]
    fn container_add_accumulates_pool_thresholds() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("b"), 11.0, 21.0);

        assert_eq!(model.pool_size(), 2);
        assert_eq!(model.pool_low_threshold(), 21.0);
        assert_eq!(model.pool_high_threshold(), 41.0);
    }

    #[test]
    fn duplicate_container_add_is_ignored() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("a"), 10.0, 20.0);

        assert_eq!(model.pool_size(), 1);
        assert_eq!(model.pool_low_threshold(), 10.0);
        assert_eq!(model.pool_high_threshold(), 20.0);
    }

    #[test]
    fn container_remove_is_idempotent() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("b"), 10.0, 20.0);

        model.on_container_removed(&cid("a"));
        model.on_container_removed(&cid("a")); // Duplicate must not double-subtract.

        assert_eq!(model.pool_size(), 1);
        assert_eq!(model.pool_low_threshold(), 10.0);
        assert_eq!(model.pool_high_threshold(), 20.0);
    }

    #[test]
    fn remove_of_unknown_container_is_noop() {
        let model = PoolModel::new("test");
        model.on_container_removed(&cid("ghost"));
        assert_eq!(model.pool_size(), 0);
        assert_eq!(model.pool_low_threshold(), 0.0);
    }

    #[test]
    fn item_add_then_move_updates_both_maps() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("b"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));

        model.on_item_moved(&iid("i1"), &cid("b"));

        assert!(!model.items_for_container(&cid("a")).contains(&iid("i1")));
        assert!(model.items_for_container(&cid("b")).contains(&iid("i1")));
        assert_eq!(model.parent_container(&iid("i1")), Some(cid("b")));
    }

    #[test]
    fn item_readd_is_most_recent_wins() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("b"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));
        model.on_item_added(&item("i1"), Some(&cid("b")));

        assert!(model.items_for_container(&cid("a")).is_empty());
        assert_eq!(model.parent_container(&iid("i1")), Some(cid("b")));
    }

    #[test]
    fn move_of_unknown_item_is_noop() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_moved(&iid("ghost"), &cid("a"));
        assert!(model.items_for_container(&cid("a")).is_empty());
    }

    #[test]
    fn workrate_updates_adjust_pool_total_by_delta() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));

        model.on_item_workrate_updated(&iid("i1"), 12.0);
        assert_eq!(model.current_pool_workrate(), 12.0);

        model.on_item_workrate_updated(&iid("i1"), 5.0);
        assert_eq!(model.current_pool_workrate(), 5.0);
    }

    #[test]
    fn workrate_update_after_remove_is_ignored() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));
        model.on_item_workrate_updated(&iid("i1"), 12.0);

        model.on_item_removed(&iid("i1"));
        model.on_item_workrate_updated(&iid("i1"), 99.0);

        assert_eq!(model.current_pool_workrate(), 0.0);
        assert_eq!(model.item_workrate(&iid("i1")), None);
    }

    #[test]
    fn item_remove_subtracts_last_workrate() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));
        model.on_item_added(&item("i2"), Some(&cid("a")));
        model.on_item_workrate_updated(&iid("i1"), 12.0);
        model.on_item_workrate_updated(&iid("i2"), 3.0);

        model.on_item_removed(&iid("i1"));

        assert_eq!(model.current_pool_workrate(), 3.0);
        assert_eq!(model.items_for_container(&cid("a")), [iid("i2")].into());
    }

    #[test]
    fn total_workrate_sums_absolute_values() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));
        model.on_item_added(&item("i2"), Some(&cid("a")));
        model.on_item_workrate_updated(&iid("i1"), 12.0);
        // Negative workrate signals a recent adjustment; its magnitude still
        // counts toward the container load.
        model.on_item_workrate_updated(&iid("i2"), -3.0);

        assert_eq!(model.total_workrate(&cid("a")), Some(15.0));
    }

    #[test]
    fn total_workrate_of_unknown_container_is_none() {
        let model = PoolModel::new("test");
        assert_eq!(model.total_workrate(&cid("ghost")), None);
        assert_eq!(model.item_workrates(&cid("ghost")), None);
        assert_eq!(model.high_threshold(&cid("ghost")), None);
    }

    #[test]
    fn immovable_items_are_not_movable() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        let mut locked = item("i1");
        locked.immovable = true;
        model.on_item_added(&locked, Some(&cid("a")));
        model.on_item_workrate_updated(&iid("i1"), 40.0);

        assert!(!model.is_item_movable(&iid("i1")));
        // Unknown items are not movable either.
        assert!(!model.is_item_movable(&iid("ghost")));
    }

    #[test]
    fn location_constraints_gate_item_placement() {
        let model = PoolModel::new("test");
        let mut constrained = item("i1");
        constrained.allowed_locations = Some(["eu".to_string()].into());
        model.on_item_added(&constrained, None);
        model.on_item_added(&item("i2"), None);

        assert!(model.is_item_allowed_in(&iid("i1"), "eu"));
        assert!(!model.is_item_allowed_in(&iid("i1"), "us"));
        assert!(model.is_item_allowed_in(&iid("i2"), "us"));
    }

    #[test]
    fn hot_and_cold_are_false_for_empty_pool() {
        let model = PoolModel::new("test");
        assert!(!model.is_hot());
        assert!(!model.is_cold());
    }

    #[test]
    fn hot_and_cold_track_aggregate_workrate() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));

        model.on_item_workrate_updated(&iid("i1"), 5.0);
        assert!(model.is_cold());
        assert!(!model.is_hot());

        model.on_item_workrate_updated(&iid("i1"), 25.0);
        assert!(model.is_hot());
        assert!(!model.is_cold());

        model.on_item_workrate_updated(&iid("i1"), 15.0);
        assert!(!model.is_hot());
        assert!(!model.is_cold());
    }

    #[test]
    fn containers_preserve_insertion_order() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("c"), 1.0, 2.0);
        model.on_container_added(&container("a"), 1.0, 2.0);
        model.on_container_added(&container("b"), 1.0, 2.0);

        assert_eq!(model.containers(), vec![cid("c"), cid("a"), cid("b")]);

        model.on_container_removed(&cid("a"));
        assert_eq!(model.containers(), vec![cid("c"), cid("b")]);
    }

    #[test]
    fn snapshot_reflects_aggregates() {
        let model = PoolModel::new("test");
        model.on_container_added(&container("a"), 10.0, 20.0);
        model.on_container_added(&container("b"), 11.0, 21.0);
        model.on_item_added(&item("i1"), Some(&cid("a")));
        model.on_item_workrate_updated(&iid("i1"), 12.0);

        let snap = model.snapshot();
        assert_eq!(snap.pool_size, 2);
        assert_eq!(snap.current_workrate, 12.0);
        assert_eq!(snap.low_threshold, 21.0);
        assert_eq!(snap.high_threshold, 41.0);
    }
}
