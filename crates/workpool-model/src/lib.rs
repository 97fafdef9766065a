//! workpool-model — bookkeeping for a balanceable pool of worker containers.
//!
//! The model tracks which containers exist, which movable items they host,
//! the observed workrate of each item, and per-container low/high workrate
//! thresholds. Aggregates (pool workrate, pool threshold sums) are maintained
//! incrementally so that the hot/cold predicates are cheap to evaluate after
//! every event.
//!
//! # Architecture
//!
//! ```text
//! PoolModel
//!   ├── on_container_added/removed  ← membership events
//!   ├── on_item_added/removed/moved ← item lifecycle events
//!   ├── on_item_workrate_updated    ← per-item metric events
//!   └── is_hot() / is_cold()        → drives autoscaler notifications
//!
//! query
//!   ├── find_coldest() → container with most spare capacity
//!   └── find_hottest() → container with most overshoot
//! ```
//!
//! Mutators are individually atomic (one short write-lock each) and tolerant
//! of duplicated or reordered event delivery; callers never need an external
//! lock around the model.

pub mod model;
pub mod query;
pub mod types;

pub use model::PoolModel;
pub use query::{find_coldest, find_hottest};
pub use types::{ContainerId, ContainerSpec, ItemId, ItemSpec, PoolSnapshot};
