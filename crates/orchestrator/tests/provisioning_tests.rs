use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use events::{ProgressEvent, ProgressKind, Stage};
use futures::StreamExt;
use orchestrator::{
    ExecError, OrchestratorConfig, OrchestratorError, ProbeSettings, Provisioner,
    ProvisioningContext, RemoteTarget, ScriptRequest, ShellTransport, TcpProbe, TimeoutSettings,
};
use provision_core::{
    AbortReason, ComputeProvider, CreateInstanceSpec, CreatedInstance, GitIdentity,
    IdentityLookup, InstanceInfo, InstanceRef, InstanceRegistry, InstanceStatus, NetworkInterface,
    OutputStream, Owner, ProviderError, ProvisionRequest, RepoBootstrap, ScriptOutcome,
    SourceControl,
};
use tokio::process::Command;
use uuid::Uuid;

const PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGtestkey dev@example.com";

struct FakeCompute {
    running_on: u32,
    external_ip: Option<String>,
    create_error: Option<ProviderError>,
    get_calls: AtomicU32,
    created: Mutex<Vec<CreateInstanceSpec>>,
}

impl FakeCompute {
    fn running_on(poll: u32) -> Self {
        Self {
            running_on: poll,
            external_ip: Some("127.0.0.1".to_string()),
            create_error: None,
            get_calls: AtomicU32::new(0),
            created: Mutex::new(Vec::new()),
        }
    }

    fn polls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<CreatedInstance, ProviderError> {
        if let Some(ref err) = self.create_error {
            return Err(err.clone());
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok(CreatedInstance {
            id: "4242".to_string(),
        })
    }

    async fn get_instance(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if instance.instance_id == "missing" {
            return Err(ProviderError::NotFound(instance.to_string()));
        }
        let status = if call >= self.running_on {
            InstanceStatus::Running
        } else {
            InstanceStatus::Provisioning
        };
        Ok(InstanceInfo {
            id: "4242".to_string(),
            name: instance.instance_id.clone(),
            status,
            network_interfaces: vec![NetworkInterface {
                internal_ip: Some("10.0.0.2".to_string()),
                external_ip: self.external_ip.clone(),
            }],
        })
    }
}

#[derive(Default)]
struct FakeRegistry {
    writes: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl InstanceRegistry for FakeRegistry {
    async fn record_instance_id(&self, record_id: &str, provider_id: &str) -> Result<(), ProviderError> {
        self.writes.lock().unwrap().push((
            "instance_id".to_string(),
            record_id.to_string(),
            provider_id.to_string(),
        ));
        Ok(())
    }

    async fn record_public_address(&self, record_id: &str, address: &str) -> Result<(), ProviderError> {
        self.writes.lock().unwrap().push((
            "public_address".to_string(),
            record_id.to_string(),
            address.to_string(),
        ));
        Ok(())
    }
}

struct FakeSourceControl {
    response: Result<bool, ProviderError>,
    keys: Mutex<Vec<(String, String, String)>>,
}

impl FakeSourceControl {
    fn responding(response: Result<bool, ProviderError>) -> Self {
        Self {
            response,
            keys: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn register_public_key(&self, user_id: &str, title: &str, key: &str) -> Result<bool, ProviderError> {
        self.keys
            .lock()
            .unwrap()
            .push((user_id.to_string(), title.to_string(), key.to_string()));
        self.response.clone()
    }
}

struct FakeIdentities;

#[async_trait]
impl IdentityLookup for FakeIdentities {
    async fn login_name(&self, user_id: &str) -> Result<String, ProviderError> {
        Ok(format!("login-{user_id}"))
    }

    async fn git_identity(&self, _user_id: &str) -> Result<GitIdentity, ProviderError> {
        Ok(GitIdentity {
            email: "dev@example.com".to_string(),
            username: "Dev".to_string(),
        })
    }
}

struct FakeTcp {
    reachable: bool,
    probes: AtomicU32,
}

#[async_trait]
impl TcpProbe for FakeTcp {
    async fn is_reachable(&self, _host: &str, _port: u16) -> Result<(), String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err("Connection refused".to_string())
        }
    }
}

/// Runs scripts locally, replacing the bootstrap scripts with canned output.
struct ScriptedTransport {
    keygen_output: String,
    seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            keygen_output: format!("Generating public/private ed25519 key pair.\n{PUBLIC_KEY}\n"),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl ShellTransport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn command(&self, _target: &RemoteTarget, script: &str) -> Command {
        self.seen.lock().unwrap().push(script.to_string());
        let local = if script.contains("ssh-keygen") {
            format!("printf '%s' '{}'", self.keygen_output)
        } else if script.contains("git clone") {
            "echo cloned".to_string()
        } else {
            script.to_string()
        };
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(local);
        cmd
    }
}

struct Harness {
    provisioner: Provisioner,
    compute: Arc<FakeCompute>,
    registry: Arc<FakeRegistry>,
    source_control: Arc<FakeSourceControl>,
    tcp: Arc<FakeTcp>,
    transport: Arc<ScriptedTransport>,
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_probes(ProbeSettings {
            running_attempts: 5,
            running_interval: Duration::from_millis(5),
            ssh_attempts: 3,
            ssh_interval: Duration::from_millis(5),
            ..ProbeSettings::default()
        })
        .with_timeouts(TimeoutSettings {
            abort_grace: Duration::from_secs(2),
            ..TimeoutSettings::default()
        })
        .with_login_public_key("ssh-ed25519 AAAAservicekey provisiond")
}

fn harness_with(
    compute: FakeCompute,
    source_control: FakeSourceControl,
    tcp_reachable: bool,
    transport: ScriptedTransport,
) -> Harness {
    let compute = Arc::new(compute);
    let registry = Arc::new(FakeRegistry::default());
    let source_control = Arc::new(source_control);
    let tcp = Arc::new(FakeTcp {
        reachable: tcp_reachable,
        probes: AtomicU32::new(0),
    });
    let transport = Arc::new(transport);

    let ctx = ProvisioningContext::new(
        compute.clone(),
        registry.clone(),
        source_control.clone(),
        Arc::new(FakeIdentities),
        transport.clone(),
        fast_config(),
    )
    .with_tcp_probe(tcp.clone());

    Harness {
        provisioner: Provisioner::new(Arc::new(ctx)),
        compute,
        registry,
        source_control,
        tcp,
        transport,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeCompute::running_on(3),
        FakeSourceControl::responding(Ok(true)),
        true,
        ScriptedTransport::new(),
    )
}

fn owner() -> Owner {
    Owner::new("u-1", "org-1")
}

fn request(name: &str) -> ProvisionRequest {
    ProvisionRequest {
        owner: owner(),
        record_id: "rec-1".to_string(),
        name: name.to_string(),
        project: "proj".to_string(),
        zone: "us-central1-a".to_string(),
        machine_type: None,
        image: None,
        disk_size_gb: None,
        repository: None,
        boot_script: None,
    }
}

fn repository() -> Option<RepoBootstrap> {
    Some(RepoBootstrap {
        repository: "acme/widgets".to_string(),
        directory: None,
        branch: None,
    })
}

async fn run_to_end(h: &Harness, request: ProvisionRequest) -> Vec<ProgressEvent> {
    let id = h.provisioner.start_provisioning(request).unwrap();
    let stream = h.provisioner.subscribe(id).unwrap();
    tokio::time::timeout(Duration::from_secs(20), stream.collect::<Vec<_>>())
        .await
        .expect("provisioning should reach a terminal stage")
}

fn stages(events: &[ProgressEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter(|e| e.kind == ProgressKind::Stage)
        .map(|e| e.stage)
        .collect()
}

fn warnings(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind == ProgressKind::Warning)
        .map(|e| e.message.clone())
        .collect()
}

fn output(events: &[ProgressEvent], stream: OutputStream) -> String {
    events
        .iter()
        .filter_map(|e| e.output.as_ref())
        .filter(|o| o.stream == stream)
        .map(|o| o.text.as_str())
        .collect()
}

/// Stage events only move forward and nothing follows a terminal event.
fn assert_well_formed(events: &[ProgressEvent]) {
    let order = [
        Stage::Preparing,
        Stage::Creating,
        Stage::Configuring,
        Stage::Installing,
        Stage::Finalizing,
        Stage::Complete,
    ];
    let mut last: Option<usize> = None;
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64, "sequence numbers are contiguous");
        if event.kind != ProgressKind::Stage || event.stage == Stage::Error {
            continue;
        }
        let pos = order.iter().position(|s| *s == event.stage).unwrap();
        if let Some(prev) = last {
            assert!(pos > prev, "stage {} revisited", event.stage);
        }
        last = Some(pos);
    }
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "exactly one terminal event");
    assert!(events.last().unwrap().is_terminal(), "terminal event is last");
}

mod workflow {
    use super::*;

    #[tokio::test]
    async fn test_plain_instance_reaches_complete() {
        let h = harness();

        let events = run_to_end(&h, request("box1")).await;

        assert_well_formed(&events);
        assert_eq!(
            stages(&events),
            vec![
                Stage::Preparing,
                Stage::Creating,
                Stage::Configuring,
                Stage::Finalizing,
                Stage::Complete
            ]
        );
        assert_eq!(h.compute.polls(), 3);
        assert_eq!(h.tcp.probes.load(Ordering::SeqCst), 1);
        assert!(warnings(&events).is_empty());
        assert!(h.transport.seen().is_empty());

        let complete = events.last().unwrap();
        assert_eq!(complete.instance_id.as_deref(), Some("4242"));
        assert!(complete.message.contains("box1"));
    }

    #[tokio::test]
    async fn test_instance_facts_recorded_and_spec_built() {
        let h = harness();

        run_to_end(&h, request("box1")).await;

        let writes = h.registry.writes.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![
                ("instance_id".to_string(), "rec-1".to_string(), "4242".to_string()),
                ("public_address".to_string(), "rec-1".to_string(), "127.0.0.1".to_string()),
            ]
        );

        let created = h.compute.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "box1");
        assert_eq!(created[0].machine_type, "e2-medium");
        assert_eq!(
            created[0].ssh_keys,
            vec!["login-u-1:ssh-ed25519 AAAAservicekey provisiond".to_string()]
        );
        assert_eq!(created[0].labels["organization"], "org-1");
    }

    #[tokio::test]
    async fn test_running_budget_exhausted_fails_run() {
        let h = harness_with(
            FakeCompute::running_on(u32::MAX),
            FakeSourceControl::responding(Ok(true)),
            true,
            ScriptedTransport::new(),
        );
        let mut req = request("box1");
        req.boot_script = Some("echo never".to_string());

        let events = run_to_end(&h, req).await;

        assert_well_formed(&events);
        assert_eq!(
            stages(&events),
            vec![Stage::Preparing, Stage::Creating, Stage::Configuring, Stage::Error]
        );
        assert_eq!(h.compute.polls(), 5);
        assert!(events.last().unwrap().message.contains("not running after 5"));
        assert!(h.transport.seen().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_instance_fails_without_retrying() {
        let h = harness();

        let events = run_to_end(&h, request("missing")).await;

        assert_well_formed(&events);
        assert_eq!(
            stages(&events),
            vec![Stage::Preparing, Stage::Creating, Stage::Configuring, Stage::Error]
        );
        assert_eq!(h.compute.polls(), 1);
        assert!(events.last().unwrap().message.contains("Not found"));
    }

    #[tokio::test]
    async fn test_ssh_unreachable_is_advisory() {
        let h = harness_with(
            FakeCompute::running_on(1),
            FakeSourceControl::responding(Ok(true)),
            false,
            ScriptedTransport::new(),
        );

        let events = run_to_end(&h, request("box1")).await;

        assert_well_formed(&events);
        assert_eq!(stages(&events).last(), Some(&Stage::Complete));
        assert_eq!(h.tcp.probes.load(Ordering::SeqCst), 3);
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not reachable after 3 attempts"));
    }

    #[tokio::test]
    async fn test_creation_failure_ends_in_error() {
        let mut compute = FakeCompute::running_on(1);
        compute.create_error = Some(ProviderError::Permanent("quota exceeded".to_string()));
        let h = harness_with(
            compute,
            FakeSourceControl::responding(Ok(true)),
            true,
            ScriptedTransport::new(),
        );

        let events = run_to_end(&h, request("box1")).await;

        assert_well_formed(&events);
        assert_eq!(
            stages(&events),
            vec![Stage::Preparing, Stage::Creating, Stage::Error]
        );
        assert!(events.last().unwrap().message.contains("quota exceeded"));
        assert_eq!(h.compute.polls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_tracking() {
        let h = harness();

        let err = h.provisioner.start_provisioning(request("Not_Valid")).unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(h.provisioner.context().tracker.is_empty());
        assert!(h.compute.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_matches_subscription() {
        let h = harness();
        let id = h.provisioner.start_provisioning(request("box1")).unwrap();
        let streamed: Vec<_> = h.provisioner.subscribe(id).unwrap().collect().await;

        let poll = h.provisioner.get_progress(id, 0).unwrap();
        assert!(poll.finished);
        assert_eq!(poll.events.len(), streamed.len());
        assert_eq!(poll.next_cursor, streamed.len() as u64);

        let tail = h.provisioner.get_progress(id, poll.next_cursor).unwrap();
        assert!(tail.events.is_empty());
        assert_eq!(h.provisioner.stage(id).unwrap(), Stage::Complete);
    }
}

mod repository_bootstrap {
    use super::*;

    #[tokio::test]
    async fn test_key_registered_and_repository_cloned() {
        let h = harness();
        let mut req = request("box1");
        req.repository = repository();

        let events = run_to_end(&h, req).await;

        assert_well_formed(&events);
        assert_eq!(
            stages(&events),
            vec![
                Stage::Preparing,
                Stage::Creating,
                Stage::Configuring,
                Stage::Installing,
                Stage::Finalizing,
                Stage::Complete
            ]
        );
        assert!(warnings(&events).is_empty());

        let keys = h.source_control.keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "u-1");
        assert!(keys[0].1.starts_with("box1-"));
        assert_eq!(keys[0].2, PUBLIC_KEY);

        let seen = h.transport.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("ssh-keygen"));
        assert!(seen[1].contains("git@github.com:acme/widgets.git"));
        assert!(output(&events, OutputStream::Stdout).contains("cloned"));
    }

    #[tokio::test]
    async fn test_key_registration_failure_still_runs_boot_script() {
        let h = harness_with(
            FakeCompute::running_on(1),
            FakeSourceControl::responding(Err(ProviderError::Auth("bad credentials".to_string()))),
            true,
            ScriptedTransport::new(),
        );
        let mut req = request("box1");
        req.repository = repository();
        req.boot_script = Some("echo boot done".to_string());

        let events = run_to_end(&h, req).await;

        assert_well_formed(&events);
        assert_eq!(stages(&events).last(), Some(&Stage::Complete));
        let warnings = warnings(&events);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Key registration failed"));
        assert!(warnings[0].contains("bad credentials"));

        let seen = h.transport.seen();
        assert_eq!(seen.len(), 2, "keygen and boot script, no clone");
        assert_eq!(seen[1], "echo boot done");

        let boot_output: Vec<_> = events
            .iter()
            .filter(|e| e.kind == ProgressKind::Output)
            .filter(|e| e.output.as_ref().unwrap().text.contains("boot done"))
            .collect();
        assert_eq!(boot_output.len(), 1);
        assert_eq!(boot_output[0].stage, Stage::Installing);
    }

    #[tokio::test]
    async fn test_missing_key_line_is_a_warning() {
        let mut transport = ScriptedTransport::new();
        transport.keygen_output = "ssh-keygen: command not found\n".to_string();
        let h = harness_with(
            FakeCompute::running_on(1),
            FakeSourceControl::responding(Ok(true)),
            true,
            transport,
        );
        let mut req = request("box1");
        req.repository = repository();
        req.boot_script = Some("echo still here".to_string());

        let events = run_to_end(&h, req).await;

        assert_well_formed(&events);
        assert_eq!(stages(&events).last(), Some(&Stage::Complete));
        assert!(warnings(&events)[0].contains("No public key found"));
        assert!(h.source_control.keys.lock().unwrap().is_empty());
        assert!(output(&events, OutputStream::Stdout).contains("still here"));
    }

    #[tokio::test]
    async fn test_failing_boot_script_is_a_warning() {
        let h = harness();
        let mut req = request("box1");
        req.boot_script = Some("echo oops >&2; exit 7".to_string());

        let events = run_to_end(&h, req).await;

        assert_well_formed(&events);
        assert_eq!(stages(&events).last(), Some(&Stage::Complete));
        assert_eq!(warnings(&events), vec!["Boot script exited with code 7".to_string()]);
        assert_eq!(output(&events, OutputStream::Stderr), "oops\n");
    }
}

mod scripts {
    use super::*;

    fn script(instance: &str, body: &str, timeout: Duration) -> ScriptRequest {
        ScriptRequest {
            instance: InstanceRef::new("proj", "us-central1-a", instance),
            owner: owner(),
            script: body.to_string(),
            timeout: Some(timeout),
        }
    }

    #[tokio::test]
    async fn test_run_script_returns_result_and_unregisters() {
        let h = harness();

        let run = h
            .provisioner
            .run_script(script("box1", "echo hello; exit 2", Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(run.result.outcome, ScriptOutcome::Exited { code: 2 });
        assert_eq!(run.result.stdout, "hello\n");
        assert!(h.provisioner.context().sessions.get(run.session_id).is_none());
    }

    #[tokio::test]
    async fn test_dropping_handle_aborts_session() {
        let h = harness();

        let handle = h
            .provisioner
            .start_script(script("box1", "sleep 30", Duration::from_secs(60)))
            .await
            .unwrap();
        let session_id = handle.session_id;
        assert!(h.provisioner.context().sessions.get(session_id).is_some());

        drop(handle);

        let sessions = &h.provisioner.context().sessions;
        tokio::time::timeout(Duration::from_secs(5), async {
            while sessions.get(session_id).is_some() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session should end once its handle is dropped");
    }

    #[tokio::test]
    async fn test_timeout_aborts_promptly() {
        let h = harness();
        let started = Instant::now();

        let run = h
            .provisioner
            .run_script(script("box1", "sleep 10", Duration::from_secs(2)))
            .await
            .unwrap();

        assert_eq!(
            run.result.outcome,
            ScriptOutcome::Aborted {
                reason: AbortReason::TimedOut
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_abort_session_checks_owner_and_is_idempotent() {
        let h = harness();
        let mut handle = h
            .provisioner
            .start_script(script(
                "box1",
                "while true; do echo tick; sleep 0.05; done",
                Duration::from_secs(30),
            ))
            .await
            .unwrap();
        let session_id = handle.session_id;

        let first = handle.next_output().await.unwrap();
        assert_eq!(first.stream, OutputStream::Stdout);

        let listed = h.provisioner.sessions_for(&owner());
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session_id);
        assert_eq!(listed[0].instance_id, "box1");

        let stranger = Owner::new("u-2", "org-1");
        assert!(matches!(
            h.provisioner.abort_session(session_id, &stranger, None),
            Err(OrchestratorError::Forbidden(_))
        ));
        assert!(h
            .provisioner
            .abort_session(session_id, &owner(), Some("box1"))
            .unwrap());
        assert!(!h
            .provisioner
            .abort_session(session_id, &owner(), Some("box1"))
            .unwrap());

        let mut streamed = first.text;
        while let Some(chunk) = handle.next_output().await {
            streamed.push_str(&chunk.text);
        }
        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("aborted run returns within the grace period")
            .unwrap();

        assert_eq!(
            result.outcome,
            ScriptOutcome::Aborted {
                reason: AbortReason::Cancelled
            }
        );
        assert_eq!(result.stdout, streamed);
        assert!(h.provisioner.sessions_for(&owner()).is_empty());
    }

    #[tokio::test]
    async fn test_abort_unknown_session() {
        let h = harness();
        assert!(!h
            .provisioner
            .abort_session(Uuid::new_v4(), &owner(), None)
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let h = harness();
        let err = h
            .provisioner
            .run_script(script("missing", "true", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Exec(ExecError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_instance_without_public_address() {
        let mut compute = FakeCompute::running_on(1);
        compute.external_ip = None;
        let h = harness_with(
            compute,
            FakeSourceControl::responding(Ok(true)),
            true,
            ScriptedTransport::new(),
        );

        let err = h
            .provisioner
            .run_script(script("box1", "true", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoPublicAddress(name) if name == "box1"));
        assert!(h.provisioner.context().sessions.is_empty());
    }
}
