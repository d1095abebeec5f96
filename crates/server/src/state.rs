use std::sync::Arc;
use std::time::Duration;

use events::{EventBus, ProgressTracker};
use orchestrator::{Provisioner, ProvisioningContext};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const TRACKER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Provisioner,
    pub event_bus: EventBus,
}

impl AppState {
    /// Wire `ctx` to a fresh event bus so progress and session lifecycle
    /// reach `/api/events`.
    pub fn new(ctx: ProvisioningContext) -> Self {
        let event_bus = EventBus::new();
        let ctx = ctx.with_event_bus(event_bus.clone());
        Self {
            provisioner: Provisioner::new(Arc::new(ctx)),
            event_bus,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.provisioner.context().tracker
    }

    /// Periodically drop finished tracking streams older than `retention`.
    pub fn spawn_tracker_sweeper(&self, retention: Duration) -> JoinHandle<()> {
        let tracker = self.tracker().clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TRACKER_SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let pruned = tracker.prune_finished(retention);
                if pruned > 0 {
                    info!(pruned, remaining = tracker.len(), "Pruned finished tracking streams");
                } else {
                    debug!(remaining = tracker.len(), "Tracker sweep found nothing to prune");
                }
            }
        })
    }
}
