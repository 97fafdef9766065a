//! workpool-policy — adaptive load balancing over a pool of worker containers.
//!
//! Consumes membership and metric events from the surrounding framework,
//! keeps a [`workpool_model::PoolModel`] up to date, and runs a debounced
//! rebalancing strategy that relocates movable items from overloaded
//! containers to underloaded ones. When the pool as a whole runs hot or cold
//! it emits notifications for an external autoscaler.
//!
//! # Architecture
//!
//! ```text
//! MembershipEvent ──▶ WorkerPool ──▶ PoolEvent ──▶ BalancingPolicy
//!   (raw, noisy)       (dedup)                        ├── PoolModel updates
//!                                                     ├── schedule_rebalance()
//!                                                     │     └── BalancingStrategy
//!                                                     │           └── MoveFn (item.move effector)
//!                                                     └── PoolNotification (hot/cold)
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod pool;
pub mod strategy;

pub use config::PolicyConfig;
pub use error::{PolicyError, PolicyResult};
pub use events::{MembershipEvent, PoolEvent, PoolNotification, Temperature};
pub use policy::BalancingPolicy;
pub use pool::WorkerPool;
pub use strategy::{BalancingStrategy, MoveFn};
