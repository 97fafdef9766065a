//! Policy driver: applies pool events to the model, debounces rebalancing,
//! and reports whole-pool temperature to the autoscaler.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use workpool_model::{PoolModel, PoolSnapshot};

use crate::config::PolicyConfig;
use crate::error::PolicyResult;
use crate::events::{PoolEvent, PoolNotification, Temperature};
use crate::strategy::{BalancingStrategy, MoveFn};

/// Consumes [`PoolEvent`]s, keeps the model current, and runs the balancing
/// strategy at most once per configured period regardless of event rate.
///
/// Temperature notifications are emitted on the channel returned by
/// [`BalancingPolicy::new`]; an autoscaler (or anything else) can consume
/// them to resize the pool.
pub struct BalancingPolicy {
    name: String,
    config: PolicyConfig,
    model: Arc<PoolModel>,
    strategy: BalancingStrategy,
    notifications_tx: mpsc::UnboundedSender<PoolNotification>,
    suspended: AtomicBool,
    /// Single-flight guard: true while a debounced rebalance is queued.
    rebalance_queued: AtomicBool,
    /// Milliseconds since `epoch` at which the last rebalance started.
    last_exec_ms: AtomicU64,
    epoch: Instant,
    /// Last emitted (temperature, suggested size), for de-duplication.
    last_emission: Mutex<Option<(Temperature, usize)>>,
    /// Held for the duration of a balancing pass. Passes are strictly
    /// serialized; event ingestion never waits on this.
    pass_lock: tokio::sync::Mutex<()>,
}

impl BalancingPolicy {
    pub fn new(
        name: impl Into<String>,
        config: PolicyConfig,
        model: Arc<PoolModel>,
        move_fn: MoveFn,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PoolNotification>) {
        let name = name.into();
        let strategy = BalancingStrategy::new(name.clone(), model.clone(), move_fn)
            .with_cold_pulls_with_hot_pushes(config.balance_cold_pulls_with_hot_pushes);
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let policy = Arc::new(Self {
            name,
            config,
            model,
            strategy,
            notifications_tx,
            suspended: AtomicBool::new(false),
            rebalance_queued: AtomicBool::new(false),
            last_exec_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            last_emission: Mutex::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
        });
        (policy, notifications_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<PoolModel> {
        &self.model
    }

    /// Stop reacting to events. The model keeps tracking them so that a
    /// later [`resume`](Self::resume) starts from current state.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
        info!(policy = %self.name, "policy suspended");
    }

    pub fn resume(self: &Arc<Self>) {
        self.suspended.store(false, Ordering::Release);
        // Let the first post-resume pass run without the debounce delay.
        self.last_exec_ms.store(0, Ordering::Release);
        info!(policy = %self.name, "policy resumed");
        // Everything may have drifted while suspended.
        self.schedule_rebalance();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Event loop. Exits on shutdown signal or when the event channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<PoolEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(policy = %self.name, metric = %self.config.metric_name, "balancing policy started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        info!(policy = %self.name, "balancing policy stopped");
    }

    /// Apply one event to the model and queue a rebalance.
    pub fn handle_event(self: &Arc<Self>, event: PoolEvent) {
        match event {
            PoolEvent::ContainerAdded(spec) => {
                let low_key = self.config.low_threshold_key();
                let high_key = self.config.high_threshold_key();
                let (Some(&low), Some(&high)) =
                    (spec.config.get(&low_key), spec.config.get(&high_key))
                else {
                    warn!(policy = %self.name, container = %spec.id,
                          "container missing threshold config, ignoring");
                    return;
                };
                self.model.on_container_added(&spec, low, high);
            }
            PoolEvent::ContainerRemoved(container) => {
                self.model.on_container_removed(&container);
            }
            PoolEvent::ItemAdded { item, container } => {
                self.model.on_item_added(&item, container.as_ref());
                // Seed the workrate if the item joined with a known value;
                // otherwise it counts as 0 until its first metric event.
                if let Some(value) = item.current_workrate {
                    self.model.on_item_workrate_updated(&item.id, value);
                }
            }
            PoolEvent::ItemRemoved(item) => {
                self.model.on_item_removed(&item);
            }
            PoolEvent::ItemMoved { item, container } => {
                self.model.on_item_moved(&item, &container);
            }
            PoolEvent::MetricUpdated { item, value } => {
                self.model.on_item_workrate_updated(&item, value);
            }
        }
        self.schedule_rebalance();
    }

    /// Queue one debounced rebalance. Calls while one is already queued
    /// coalesce into it.
    pub fn schedule_rebalance(self: &Arc<Self>) {
        if self.is_suspended() {
            return;
        }
        if self
            .rebalance_queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let policy = self.clone();
        tokio::spawn(async move {
            let min_period = policy.config.min_period_between_execs();
            let last = policy.last_exec_ms.load(Ordering::Acquire);
            let since_last = policy.now_ms().saturating_sub(last);
            if let Some(delay) = min_period.checked_sub(std::time::Duration::from_millis(since_last))
            {
                tokio::time::sleep(delay).await;
            }

            policy.last_exec_ms.store(policy.now_ms(), Ordering::Release);
            policy.rebalance_queued.store(false, Ordering::Release);

            if policy.is_suspended() {
                return;
            }
            if let Err(err) = policy.rebalance_now().await {
                if policy.is_suspended() {
                    debug!(policy = %policy.name, %err, "rebalance failed while suspended");
                } else {
                    error!(policy = %policy.name, %err, "rebalance failed");
                }
            }
        });
    }

    /// Run one balancing pass immediately, bypassing the debounce, then
    /// report pool temperature. Returns whether anything moved.
    ///
    /// A pass can outlast the debounce period when move effectors block, so
    /// a later scheduled task may arrive while one is still running; the
    /// pass lock makes it wait rather than balance concurrently.
    pub async fn rebalance_now(&self) -> PolicyResult<bool> {
        let _pass = self.pass_lock.lock().await;
        let moved = self.strategy.rebalance().await?;
        self.emit_temperature();
        Ok(moved)
    }

    /// Emit a hot/cold notification whenever the pool is out of range. The
    /// notification goes out on every pass; only the info log line is elided
    /// while temperature and suggested size are unchanged.
    fn emit_temperature(&self) {
        let temperature = if self.model.is_hot() {
            Some(Temperature::Hot)
        } else if self.model.is_cold() {
            Some(Temperature::Cold)
        } else {
            None
        };

        let snapshot = self.model.snapshot();
        let emission = temperature
            .map(|temperature| (temperature, suggested_pool_size(temperature, &snapshot)));

        let changed = {
            let mut last = self
                .last_emission
                .lock()
                .expect("temperature lock poisoned");
            let changed = *last != emission;
            *last = emission;
            changed
        };

        let Some((temperature, suggested_size)) = emission else {
            if changed {
                debug!(policy = %self.name, "pool temperature back in range");
            }
            return;
        };

        if changed {
            info!(policy = %self.name, ?temperature,
                  workrate = snapshot.current_workrate,
                  low = snapshot.low_threshold, high = snapshot.high_threshold,
                  pool_size = snapshot.pool_size, suggested_size,
                  "pool out of range, suggesting resize");
        }
        let _ = self.notifications_tx.send(PoolNotification {
            temperature,
            snapshot,
            suggested_size,
        });
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Pool size at which the current workrate would sit within the average
/// per-container thresholds. Advisory only; the autoscaler owns the final
/// decision.
fn suggested_pool_size(temperature: Temperature, snapshot: &PoolSnapshot) -> usize {
    if snapshot.pool_size == 0 {
        return 0;
    }
    match temperature {
        Temperature::Hot => {
            let avg_high = snapshot.high_threshold / snapshot.pool_size as f64;
            if avg_high <= 0.0 {
                return snapshot.pool_size;
            }
            (snapshot.current_workrate / avg_high).ceil() as usize
        }
        Temperature::Cold => {
            let avg_low = snapshot.low_threshold / snapshot.pool_size as f64;
            if avg_low <= 0.0 {
                return snapshot.pool_size;
            }
            (snapshot.current_workrate / avg_low).ceil() as usize
        }
    }
}
