//! Pure search helpers over the pool model.
//!
//! Stateless: each call ranks the current container set. Ties break toward
//! the first-encountered container; the model iterates containers in
//! insertion order, so the tie-break is deterministic.

use std::collections::HashSet;

use tracing::trace;

use crate::model::PoolModel;
use crate::types::ContainerId;

/// The container with the most spare capacity (`high_threshold -
/// total_workrate`), among non-excluded containers with known thresholds and
/// workrates, optionally restricted to a location.
///
/// Returns `None` if no candidate has positive spare capacity.
pub fn find_coldest(
    model: &PoolModel,
    excluded: &HashSet<ContainerId>,
    location: Option<&str>,
) -> Option<ContainerId> {
    let mut coldest: Option<(ContainerId, f64)> = None;
    for container in model.containers() {
        if excluded.contains(&container) {
            continue;
        }
        if let Some(want) = location {
            if model.container_location(&container).as_deref() != Some(want) {
                continue;
            }
        }
        let (Some(high), Some(workrate)) = (
            model.high_threshold(&container),
            model.total_workrate(&container),
        ) else {
            continue;
        };
        let spare = high - workrate;
        if spare <= 0.0 {
            continue;
        }
        if coldest.as_ref().is_none_or(|(_, best)| spare > *best) {
            coldest = Some((container, spare));
        }
    }
    trace!(coldest = ?coldest, "coldest container search");
    coldest.map(|(container, _)| container)
}

/// The container with the most overshoot (`total_workrate -
/// high_threshold`), among non-excluded containers with known thresholds and
/// workrates.
///
/// Returns `None` if no candidate exceeds its high threshold.
pub fn find_hottest(model: &PoolModel, excluded: &HashSet<ContainerId>) -> Option<ContainerId> {
    let mut hottest: Option<(ContainerId, f64)> = None;
    for container in model.containers() {
        if excluded.contains(&container) {
            continue;
        }
        let (Some(high), Some(workrate)) = (
            model.high_threshold(&container),
            model.total_workrate(&container),
        ) else {
            continue;
        };
        let overshoot = workrate - high;
        if overshoot <= 0.0 {
            continue;
        }
        if hottest.as_ref().is_none_or(|(_, best)| overshoot > *best) {
            hottest = Some((container, overshoot));
        }
    }
    trace!(hottest = ?hottest, "hottest container search");
    hottest.map(|(container, _)| container)
}
