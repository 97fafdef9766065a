//! Rebalancing strategy — decides which items move between which containers.
//!
//! Each `rebalance()` call performs one synchronous pass over the pool and
//! returns; there is no cross-call iteration state beyond the model itself.
//! The pass stops after the first container whose balancing produced a
//! change, so a single hot/cold event triggers at most one corrective
//! move-sequence per invocation.
//!
//! The watermark constants below are inherited tuning values; they are kept
//! as-is for behavioral stability.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, trace};

use workpool_model::{ContainerId, ItemId, PoolModel, find_coldest, find_hottest};

use crate::error::{PolicyError, PolicyResult};

/// At most this many migrations per container per pass.
const MAX_MIGRATIONS_PER_NODE: usize = 20;

/// A cold target whose workrate is below this fraction of the hot node's
/// counts as an emergency: balancing proceeds even when the target is itself
/// over its high threshold.
const EMERGENCY_COLD_RATIO: f64 = 2.0 / 3.0;

/// Hot-side cap on a single move, as a fraction of the hot/cold gap.
const HOT_GAP_MOVE_FRACTION: f64 = 0.9;
/// Cold-side cap on a single move; tighter than the hot side to avoid
/// swapping the ordering of the two nodes by much.
const COLD_GAP_MOVE_FRACTION: f64 = 0.6;
/// Fallback cap permitting a single larger-than-ideal item when nothing
/// smaller fits.
const FALLBACK_MOVE_FRACTION: f64 = 0.75;
/// Keeps the half-workrate bound from excluding an exact-half item.
const MOVE_EPSILON: f64 = 0.00001;

/// Low watermark applied to targets while the pool is growing. Placeholder:
/// effectively disables the guard.
const GROW_LOW_WATERMARK: f64 = f64::MAX;

pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Effector invoked to relocate an item; called with (item, destination).
///
/// Expected to return only once the move is durably reflected (or at least
/// initiated), so that the model update that follows is meaningful.
pub type MoveFn = Arc<dyn Fn(ItemId, ContainerId) -> BoxFuture + Send + Sync>;

/// Algorithm for balancing worker items among containers based on item
/// workrates and per-container low/high thresholds.
pub struct BalancingStrategy {
    name: String,
    model: Arc<PoolModel>,
    move_fn: MoveFn,
    /// When set, a pass that pushed items off a hot container also attempts
    /// cold pulls for the same container.
    cold_pulls_with_hot_pushes: bool,
}

impl BalancingStrategy {
    pub fn new(name: impl Into<String>, model: Arc<PoolModel>, move_fn: MoveFn) -> Self {
        Self {
            name: name.into(),
            model,
            move_fn,
            cold_pulls_with_hot_pushes: false,
        }
    }

    pub fn with_cold_pulls_with_hot_pushes(mut self, enabled: bool) -> Self {
        self.cold_pulls_with_hot_pushes = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One balancing pass. Returns true iff at least one item was moved.
    pub async fn rebalance(&self) -> PolicyResult<bool> {
        // A growing pool would tighten the acceptance guards below; pool
        // resizing is the autoscaler's job, so this pass never grows.
        let gonna_grow = false;

        if self.model.pool_size() < 2 {
            return Ok(false);
        }
        for container in self.model.containers() {
            if self.balance_items_on_node(&container, gonna_grow).await? {
                // One corrective move-sequence per pass.
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn balance_items_on_node(
        &self,
        node: &ContainerId,
        gonna_grow: bool,
    ) -> PolicyResult<bool> {
        let Some(workrate) = self.model.total_workrate(node) else {
            return Ok(false);
        };

        let mut balanced = self
            .balance_items_on_hot_node(node, workrate, gonna_grow)
            .await?;
        if !balanced || self.cold_pulls_with_hot_pushes {
            balanced |= self
                .balance_items_on_cold_node(node, workrate, gonna_grow)
                .await?;
        }
        if !balanced {
            trace!(policy = %self.name, %node, workrate,
                   "not balancing; workrate acceptable or cannot be balanced");
        }
        Ok(balanced)
    }

    /// Push items off `node` while it exceeds its high threshold.
    async fn balance_items_on_hot_node(
        &self,
        node: &ContainerId,
        mut workrate: f64,
        gonna_grow: bool,
    ) -> PolicyResult<bool> {
        let original_workrate = workrate;
        let mut migrations = 0usize;
        let mut items_moved: HashSet<ItemId> = HashSet::new();
        let nodes_checked: HashSet<ContainerId> = HashSet::new();

        let Some(high_threshold) = self.model.high_threshold(node) else {
            // Node presumably has been removed.
            return Ok(false);
        };

        while workrate > high_threshold && migrations < MAX_MIGRATIONS_PER_NODE {
            let Some(cold_node) = find_coldest(&self.model, &nodes_checked, None) else {
                debug!(policy = %self.name, %node, workrate, "no coldest node available");
                break;
            };
            if cold_node == *node {
                debug!(policy = %self.name, %node, workrate,
                       "node is also the coldest modifiable node");
                break;
            }

            let (Some(cold_workrate), Some(cold_high_threshold)) = (
                self.model.total_workrate(&cold_node),
                self.model.high_threshold(&cold_node),
            ) else {
                break;
            };
            let emergency = cold_workrate < workrate * EMERGENCY_COLD_RATIO;
            if cold_workrate >= cold_high_threshold && !emergency {
                // All candidates are approximately equally (and very) hot.
                break;
            }
            if gonna_grow && cold_workrate >= GROW_LOW_WATERMARK && !emergency {
                break;
            }

            let cold_location = self.model.container_location(&cold_node);

            debug!(policy = %self.name, %node, workrate,
                   target = %cold_node, target_workrate = cold_workrate,
                   "balancing hot node");

            let mut ideal_size_to_move = (workrate - cold_workrate) / 2.0;
            // Don't let the "ideal" amount push the cold node over its own
            // high threshold.
            if ideal_size_to_move + cold_workrate > cold_high_threshold {
                ideal_size_to_move = cold_high_threshold - cold_workrate;
            }
            let max_size_to_move_ideally = (workrate / 2.0 + MOVE_EPSILON)
                .min((workrate - cold_workrate) * HOT_GAP_MOVE_FRACTION);
            let max_size_if_nothing_smaller_but_larger = workrate * FALLBACK_MOVE_FRACTION;

            let Some(node_items) = self.model.item_workrates(node) else {
                debug!(policy = %self.name, %node, workrate, "item report unavailable, abandoning");
                break;
            };
            let Some(item_to_move) = find_best_item_to_move(
                &self.model,
                &node_items,
                ideal_size_to_move,
                max_size_to_move_ideally,
                max_size_if_nothing_smaller_but_larger,
                &items_moved,
                cold_location.as_deref(),
            ) else {
                debug!(policy = %self.name, %node, workrate,
                       ideal = ideal_size_to_move, max = max_size_to_move_ideally,
                       target = %cold_node, "no suitable item found, ending");
                break;
            };

            let item_workrate = node_items[&item_to_move];
            items_moved.insert(item_to_move.clone());
            workrate -= item_workrate;

            self.move_item(&item_to_move, &cold_node).await?;
            migrations += 1;
        }

        if !items_moved.is_empty() {
            debug!(policy = %self.name, %node,
                   from = original_workrate, to = workrate, moved = items_moved.len(),
                   "hot-node balancing finished");
        }
        Ok(!items_moved.is_empty())
    }

    /// Pull items onto `node` while it is below its low threshold.
    async fn balance_items_on_cold_node(
        &self,
        node: &ContainerId,
        mut workrate: f64,
        gonna_grow: bool,
    ) -> PolicyResult<bool> {
        let Some(node_items) = self.model.item_workrates(node) else {
            debug!(policy = %self.name, %node, workrate,
                   "workrate breakdown unavailable (probably reverting), not balancing");
            return Ok(false);
        };
        // An unmovable item here means the node has moves in flight; leave
        // it alone until they settle.
        for item in node_items.keys() {
            if !self.model.is_item_movable(item) {
                debug!(policy = %self.name, %node, workrate, %item,
                       "item in flux, not balancing cold node");
                return Ok(false);
            }
        }

        let Some(low_threshold) = self.model.low_threshold(node) else {
            return Ok(false);
        };
        let original_workrate = workrate;
        let mut migrations = 0usize;
        let mut items_moved: HashSet<ItemId> = HashSet::new();
        let mut nodes_checked: HashSet<ContainerId> = HashSet::new();
        let node_location = self.model.container_location(node);

        while workrate < low_threshold {
            let Some(hot_node) = find_hottest(&self.model, &nodes_checked) else {
                debug!(policy = %self.name, %node, workrate, "no hottest node available");
                break;
            };
            if hot_node == *node {
                debug!(policy = %self.name, %node, workrate,
                       "node is also the hottest modifiable node");
                break;
            }

            let (Some(hot_workrate), Some(hot_low_threshold), Some(hot_high_threshold)) = (
                self.model.total_workrate(&hot_node),
                self.model.low_threshold(&hot_node),
                self.model.high_threshold(&hot_node),
            ) else {
                // Hot node presumably has been removed.
                break;
            };
            // Emergency balancing doesn't apply on the cold side.
            if hot_workrate <= hot_low_threshold {
                // All nodes are too low; this is the autoscaler's problem.
                break;
            }
            if gonna_grow && hot_workrate <= hot_high_threshold {
                break;
            }

            debug!(policy = %self.name, %node, workrate,
                   source = %hot_node, source_workrate = hot_workrate,
                   "balancing cold node");

            let mut ideal_size_to_move = (hot_workrate - workrate) / 2.0;
            let Some(node_high_threshold) = self.model.high_threshold(node) else {
                break;
            };
            if ideal_size_to_move + workrate > node_high_threshold {
                ideal_size_to_move = node_high_threshold - workrate;
            }
            let max_size_to_move_ideally =
                (hot_workrate / 2.0).min((hot_workrate - workrate) * COLD_GAP_MOVE_FRACTION);
            let max_size_if_nothing_smaller_but_larger = workrate * FALLBACK_MOVE_FRACTION;

            let Some(hot_node_items) = self.model.item_workrates(&hot_node) else {
                debug!(policy = %self.name, %node, source = %hot_node,
                       "source item report unavailable, excluding it");
                nodes_checked.insert(hot_node);
                continue;
            };
            let Some(item_to_move) = find_best_item_to_move(
                &self.model,
                &hot_node_items,
                ideal_size_to_move,
                max_size_to_move_ideally,
                max_size_if_nothing_smaller_but_larger,
                &items_moved,
                node_location.as_deref(),
            ) else {
                debug!(policy = %self.name, %node, workrate,
                       ideal = ideal_size_to_move, max = max_size_to_move_ideally,
                       source = %hot_node, "source has no applicable items, excluding it");
                nodes_checked.insert(hot_node);
                continue;
            };

            let item_workrate = hot_node_items[&item_to_move];
            items_moved.insert(item_to_move.clone());
            workrate += item_workrate;

            self.move_item(&item_to_move, node).await?;
            migrations += 1;
            if migrations >= MAX_MIGRATIONS_PER_NODE {
                break;
            }
        }

        if !items_moved.is_empty() {
            debug!(policy = %self.name, %node,
                   from = original_workrate, to = workrate, moved = items_moved.len(),
                   "cold-node balancing finished");
        }
        Ok(!items_moved.is_empty())
    }

    /// Invoke the move effector, then update the model. Not transactional: a
    /// failure between the two leaves model and reality inconsistent until
    /// subsequent events correct it.
    async fn move_item(&self, item: &ItemId, destination: &ContainerId) -> PolicyResult<()> {
        (self.move_fn)(item.clone(), destination.clone())
            .await
            .map_err(|source| PolicyError::MoveFailed {
                item: item.clone(),
                source,
            })?;
        self.model.on_item_moved(item, destination);
        Ok(())
    }
}

/// Pick the item whose cost is nearest `target_cost` without exceeding
/// `max_cost`.
///
/// If nothing qualifies, fall back to the smallest movable item provided its
/// cost is below `max_cost_if_nothing_smaller_but_larger`, strictly smaller
/// than the largest candidate, and no item was passed over for being in
/// `excluded_items` — with exclusions in play the picture is ambiguous, so
/// the search refuses to guess.
fn find_best_item_to_move(
    model: &PoolModel,
    costs_per_item: &BTreeMap<ItemId, f64>,
    target_cost: f64,
    max_cost: f64,
    max_cost_if_nothing_smaller_but_larger: f64,
    excluded_items: &HashSet<ItemId>,
    location: Option<&str>,
) -> Option<ItemId> {
    let mut closest_match: Option<ItemId> = None;
    let mut min_diff = f64::MAX;
    let mut smallest_movable: Option<(ItemId, f64)> = None;
    let mut largest_cost: Option<f64> = None;
    let mut exclusions = false;

    for (item, &cost) in costs_per_item {
        if !model.is_item_movable(item) {
            trace!(%item, "item cannot be moved, skipping");
            continue;
        }
        if cost < 0.0 {
            // Negative rate signals a recent adjustment still settling.
            trace!(%item, cost, "item subject to recent adjustment, skipping");
            continue;
        }
        if excluded_items.contains(item) {
            exclusions = true;
            continue;
        }
        if cost <= 0.0 {
            continue;
        }
        if largest_cost.is_none_or(|largest| cost > largest) {
            largest_cost = Some(cost);
        }
        if let Some(location) = location {
            if !model.is_item_allowed_in(item, location) {
                continue;
            }
        }
        if smallest_movable
            .as_ref()
            .is_none_or(|(_, smallest)| cost < *smallest)
        {
            smallest_movable = Some((item.clone(), cost));
        }
        if cost > max_cost {
            continue;
        }
        let diff = (target_cost - cost).abs();
        if closest_match.is_none() || diff < min_diff {
            closest_match = Some(item.clone());
            min_diff = diff;
        }
    }

    if closest_match.is_some() {
        return closest_match;
    }

    if let (Some((smallest, smallest_cost)), Some(largest_cost)) =
        (smallest_movable, largest_cost)
    {
        if smallest_cost < max_cost_if_nothing_smaller_but_larger
            && smallest_cost < largest_cost
            && !exclusions
        {
            return Some(smallest);
        }
    }

    None
}
