//! Entry points exposed to the hosting service.

use std::sync::Arc;
use std::time::Duration;

use events::{PollResult, ProgressEvent, Stage};
use futures::Stream;
use provision_core::{InstanceRef, Owner, ProviderError, ProvisionRequest, ScriptResult, SessionSummary};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::ProvisioningContext;
use crate::error::{ExecError, OrchestratorError, Result};
use crate::executor::{OutputChunk, RemoteTarget};
use crate::sessions::{ExecutionSession, SessionGuard};
use crate::workflow::{RunState, WorkflowEngine};

/// Ad-hoc script execution on an existing instance.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub instance: InstanceRef,
    pub owner: Owner,
    pub script: String,
    /// Falls back to the configured default.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ScriptRun {
    pub session_id: Uuid,
    pub result: ScriptResult,
}

/// A started script. Output arrives on [`ScriptHandle::next_output`] until the
/// run ends; [`ScriptHandle::wait`] yields the result.
///
/// Dropping the handle before the run ends aborts the session.
pub struct ScriptHandle {
    pub session_id: Uuid,
    output: mpsc::UnboundedReceiver<OutputChunk>,
    task: JoinHandle<Result<ScriptResult>>,
    abort_on_drop: DropGuard,
}

impl ScriptHandle {
    pub async fn next_output(&mut self) -> Option<OutputChunk> {
        self.output.recv().await
    }

    pub async fn wait(self) -> Result<ScriptResult> {
        let Self {
            task,
            abort_on_drop,
            ..
        } = self;
        let joined = task.await;
        abort_on_drop.disarm();
        match joined {
            Ok(result) => result,
            Err(e) => Err(ExecError::Io(std::io::Error::other(e)).into()),
        }
    }
}

#[derive(Clone)]
pub struct Provisioner {
    engine: Arc<WorkflowEngine>,
    ctx: Arc<ProvisioningContext>,
}

impl Provisioner {
    pub fn new(ctx: Arc<ProvisioningContext>) -> Self {
        Self::with_engine(Arc::new(WorkflowEngine::new(Arc::clone(&ctx))))
    }

    pub fn with_engine(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            ctx: engine.shared_context(),
            engine,
        }
    }

    pub fn context(&self) -> &ProvisioningContext {
        &self.ctx
    }

    /// Validate `request`, open its tracking stream and run the workflow in
    /// the background. The returned tracking id is usable immediately.
    pub fn start_provisioning(&self, request: ProvisionRequest) -> Result<Uuid> {
        request.validate()?;

        let tracker = self.ctx.tracker.clone();
        let tracking_id = tracker.start_tracking(format!("Preparing instance {}", request.name));
        info!(
            tracking_id = %tracking_id,
            instance = %request.name,
            user_id = %request.owner.user_id,
            "Provisioning started"
        );

        let engine = Arc::clone(&self.engine);
        let run = tokio::spawn(async move { engine.run(RunState::new(tracking_id, request)).await });

        // A panicking step must still leave the stream terminal.
        tokio::spawn(async move {
            match run.await {
                Ok(stage) => info!(tracking_id = %tracking_id, stage = %stage, "Provisioning finished"),
                Err(e) => {
                    error!(tracking_id = %tracking_id, error = %e, "Provisioning task aborted");
                    let _ = tracker.fail(tracking_id, format!("Provisioning task aborted: {e}"));
                }
            }
        });

        Ok(tracking_id)
    }

    pub fn get_progress(&self, tracking_id: Uuid, cursor: u64) -> Result<PollResult> {
        Ok(self.ctx.tracker.poll(tracking_id, cursor)?)
    }

    pub fn subscribe(
        &self,
        tracking_id: Uuid,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static> {
        Ok(self.ctx.tracker.subscribe(tracking_id)?)
    }

    pub fn stage(&self, tracking_id: Uuid) -> Result<Stage> {
        Ok(self.ctx.tracker.snapshot(tracking_id)?.stage)
    }

    /// Resolve the instance, register a session and start the script.
    pub async fn start_script(&self, request: ScriptRequest) -> Result<ScriptHandle> {
        let info = self
            .ctx
            .compute
            .get_instance(&request.instance)
            .await
            .map_err(|e| match e {
                ProviderError::NotFound(detail) => {
                    OrchestratorError::Exec(ExecError::InstanceNotFound(detail))
                }
                other => OrchestratorError::Provider(other),
            })?;
        let address = info
            .public_address()
            .ok_or_else(|| OrchestratorError::NoPublicAddress(request.instance.instance_id.clone()))?
            .to_string();
        let login = self.ctx.identities.login_name(&request.owner.user_id).await?;

        let target = RemoteTarget::new(
            request.instance.clone(),
            address,
            self.ctx.config.probes.ssh_port,
            login,
        );
        let timeout = request.timeout.unwrap_or(self.ctx.config.timeouts.script);

        let mut guard = SessionGuard::register(
            &self.ctx.sessions,
            ExecutionSession::new(&request.instance.instance_id, request.owner.clone()),
        );
        let session_id = guard.id();
        let cancel = guard.session().cancellation_token();
        let abort_on_drop = cancel.clone().drop_guard();
        let (tx, rx) = mpsc::unbounded_channel::<OutputChunk>();
        let runner = self.ctx.runner.clone();
        let script = request.script;

        let task = tokio::spawn(async move {
            let result = runner.run(&target, &script, timeout, cancel, Some(tx)).await;
            guard.finish(match &result {
                Ok(r) => r.describe(),
                Err(e) => e.to_string(),
            });
            result.map_err(OrchestratorError::from)
        });

        Ok(ScriptHandle {
            session_id,
            output: rx,
            task,
            abort_on_drop,
        })
    }

    /// Run a script to completion, discarding streamed output.
    pub async fn run_script(&self, request: ScriptRequest) -> Result<ScriptRun> {
        let handle = self.start_script(request).await?;
        let session_id = handle.session_id;
        let result = handle.wait().await?;
        Ok(ScriptRun { session_id, result })
    }

    /// Cancel a session on behalf of `owner`.
    ///
    /// `Ok(false)` for sessions that are unknown, finished or already
    /// cancelled. Sessions owned by someone else are refused.
    pub fn abort_session(
        &self,
        session_id: Uuid,
        owner: &Owner,
        instance_id: Option<&str>,
    ) -> Result<bool> {
        let Some(session) = self.ctx.sessions.get(session_id) else {
            return Ok(false);
        };
        if !session.summary().is_owned_by(owner, instance_id) {
            return Err(OrchestratorError::Forbidden(format!(
                "session {session_id} belongs to another user or instance"
            )));
        }
        Ok(self.ctx.sessions.cancel(session_id))
    }

    pub fn sessions_for(&self, owner: &Owner) -> Vec<SessionSummary> {
        self.ctx.sessions.sessions_for(owner)
    }
}
