//! Worker pool — de-duplicates raw membership noise into pool events.
//!
//! The surrounding framework delivers membership changes with duplicates and
//! in arbitrary order (a container may report up before or after joining, an
//! item may join twice). The `WorkerPool` keeps just enough state — the set
//! of containers currently up and the set of known items — to emit each
//! add/remove/move exactly once.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use workpool_model::{ContainerId, ContainerSpec, ItemId};

use crate::events::{MembershipEvent, PoolEvent};

/// Aggregates raw [`MembershipEvent`]s into de-duplicated [`PoolEvent`]s.
///
/// A startable container is only announced as added once it reports up;
/// non-startable containers are announced immediately on join. A container
/// whose service goes down is announced as removed, and re-announced if it
/// comes back up.
pub struct WorkerPool {
    /// Specs of joined containers, up or not, keyed by id.
    specs: HashMap<ContainerId, ContainerSpec>,
    /// Containers currently announced to consumers.
    up_containers: HashSet<ContainerId>,
    /// Items currently announced to consumers.
    known_items: HashSet<ItemId>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
}

impl WorkerPool {
    /// Create a worker pool that publishes de-duplicated events on the
    /// returned channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                specs: HashMap::new(),
                up_containers: HashSet::new(),
                known_items: HashSet::new(),
                events_tx,
            },
            events_rx,
        )
    }

    /// Consume membership events until the channel closes or shutdown fires.
    pub async fn run(
        mut self,
        mut membership_rx: mpsc::UnboundedReceiver<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("worker pool started");
        loop {
            tokio::select! {
                event = membership_rx.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => {
                            debug!("membership channel closed, worker pool stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("worker pool shutting down");
                    break;
                }
            }
        }
    }

    /// Apply a single raw membership event.
    pub fn handle(&mut self, event: MembershipEvent) {
        trace!(?event, "membership event");
        match event {
            MembershipEvent::ContainerJoined(spec) => self.on_container_joined(spec),
            MembershipEvent::ContainerLeft(container) => self.on_container_left(&container),
            MembershipEvent::ContainerUp { container, up } => self.on_container_up(&container, up),
            MembershipEvent::ItemJoined { item, container } => {
                if self.known_items.insert(item.id.clone()) {
                    self.emit(PoolEvent::ItemAdded { item, container });
                } else {
                    debug!(item = %item.id, "duplicate item join ignored");
                }
            }
            MembershipEvent::ItemLeft(item) => {
                if self.known_items.remove(&item) {
                    self.emit(PoolEvent::ItemRemoved(item));
                } else {
                    debug!(%item, "leave of unknown item ignored");
                }
            }
            MembershipEvent::ItemContainerChanged { item, container } => {
                match container {
                    Some(container) if self.known_items.contains(&item) => {
                        self.emit(PoolEvent::ItemMoved { item, container });
                    }
                    Some(_) => debug!(%item, "container change for unknown item ignored"),
                    // No container yet; the eventual assignment will arrive
                    // as another change event.
                    None => trace!(%item, "item has no container yet"),
                }
            }
            MembershipEvent::MetricUpdated { item, value } => {
                if self.known_items.contains(&item) {
                    self.emit(PoolEvent::MetricUpdated { item, value });
                } else {
                    trace!(%item, value, "metric for unknown item dropped");
                }
            }
        }
    }

    fn on_container_joined(&mut self, spec: ContainerSpec) {
        if self.specs.contains_key(&spec.id) {
            debug!(container = %spec.id, "duplicate container join ignored");
            return;
        }
        self.specs.insert(spec.id.clone(), spec.clone());
        if !spec.startable {
            // Nothing to wait for; the container is usable as-is.
            self.up_containers.insert(spec.id.clone());
            self.emit(PoolEvent::ContainerAdded(spec));
        }
    }

    fn on_container_left(&mut self, container: &ContainerId) {
        if self.specs.remove(container).is_none() {
            debug!(%container, "leave of unknown container ignored");
            return;
        }
        if self.up_containers.remove(container) {
            self.emit(PoolEvent::ContainerRemoved(container.clone()));
        }
    }

    fn on_container_up(&mut self, container: &ContainerId, up: bool) {
        let Some(spec) = self.specs.get(container) else {
            debug!(%container, up, "service-up transition for unknown container ignored");
            return;
        };
        if up {
            if self.up_containers.insert(container.clone()) {
                self.emit(PoolEvent::ContainerAdded(spec.clone()));
            }
        } else if self.up_containers.remove(container) {
            self.emit(PoolEvent::ContainerRemoved(container.clone()));
        }
    }

    fn emit(&self, event: PoolEvent) {
        // Receiver dropped means the policy is gone; nothing useful to do.
        let _ = self.events_tx.send(event);
    }
}
