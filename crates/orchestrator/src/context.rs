use std::sync::Arc;
use std::time::Duration;

use events::{EventBus, ProgressTracker};
use provision_core::{
    ComputeProvider, IdentityLookup, InstanceRegistry, Owner, ScriptResult, SourceControl,
};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::ExecError;
use crate::executor::{OutputChunk, RemoteTarget, ScriptRunner, ShellTransport};
use crate::prober::{ReadinessProber, TcpConnectProbe, TcpProbe};
use crate::sessions::{ExecutionSession, SessionGuard, SessionRegistry};

/// Everything a provisioning run or script execution needs, constructed once
/// by the hosting process and shared by reference.
pub struct ProvisioningContext {
    pub compute: Arc<dyn ComputeProvider>,
    pub instances: Arc<dyn InstanceRegistry>,
    pub source_control: Arc<dyn SourceControl>,
    pub identities: Arc<dyn IdentityLookup>,
    pub runner: ScriptRunner,
    pub prober: ReadinessProber,
    pub tracker: ProgressTracker,
    pub sessions: SessionRegistry,
    pub config: OrchestratorConfig,
}

impl ProvisioningContext {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        instances: Arc<dyn InstanceRegistry>,
        source_control: Arc<dyn SourceControl>,
        identities: Arc<dyn IdentityLookup>,
        transport: Arc<dyn ShellTransport>,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = ScriptRunner::new(transport).with_abort_grace(config.timeouts.abort_grace);
        let prober = ReadinessProber::new(
            Arc::clone(&compute),
            Arc::new(TcpConnectProbe::new(config.probes.connect_timeout)),
        );
        Self {
            compute,
            instances,
            source_control,
            identities,
            runner,
            prober,
            tracker: ProgressTracker::new(),
            sessions: SessionRegistry::new(),
            config,
        }
    }

    pub fn with_tcp_probe(mut self, probe: Arc<dyn TcpProbe>) -> Self {
        self.prober = ReadinessProber::new(Arc::clone(&self.compute), probe);
        self
    }

    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = sessions;
        self
    }

    /// Publish progress and session lifecycle on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.tracker = self.tracker.with_bus(bus.clone());
        self.sessions = self.sessions.with_event_bus(bus);
        self
    }

    /// Run a script as part of provisioning run `tracking_id`.
    ///
    /// The execution is registered as a session (so its owner can abort it)
    /// and every output chunk is appended to the tracking stream before this
    /// returns.
    pub async fn run_tracked_script(
        &self,
        tracking_id: Uuid,
        owner: &Owner,
        target: &RemoteTarget,
        script: &str,
        timeout: Duration,
    ) -> Result<ScriptResult, ExecError> {
        let mut guard = SessionGuard::register(
            &self.sessions,
            ExecutionSession::new(&target.instance.instance_id, owner.clone()),
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
        let tracker = self.tracker.clone();
        let forward = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = tracker.emit_output(tracking_id, chunk.stream, chunk.text) {
                    debug!(tracking_id = %tracking_id, error = %e, "Dropping script output");
                    break;
                }
            }
        });

        let result = self
            .runner
            .run(
                target,
                script,
                timeout,
                guard.session().cancellation_token(),
                Some(tx),
            )
            .await;
        // The runner dropped its sender, so this ends once the backlog is drained.
        let _ = forward.await;

        guard.finish(match &result {
            Ok(r) => r.describe(),
            Err(e) => e.to_string(),
        });
        result
    }
}
