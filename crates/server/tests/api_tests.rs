use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use orchestrator::{
    LocalShellTransport, OrchestratorConfig, ProbeSettings, ProvisioningContext, ScriptRequest,
    TcpProbe,
};
use provision_core::{
    ComputeProvider, CreateInstanceSpec, CreatedInstance, InstanceInfo, InstanceRef,
    InstanceRegistry, InstanceStatus, NetworkInterface, Owner, ProviderError, SourceControl,
};
use serde_json::{json, Value};
use server::config::IdentityEntry;
use server::identity::StaticIdentities;
use server::{create_router, state::AppState};
use uuid::Uuid;

struct FakeCompute;

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn create_instance(
        &self,
        _spec: &CreateInstanceSpec,
    ) -> Result<CreatedInstance, ProviderError> {
        Ok(CreatedInstance {
            id: "4242".to_string(),
        })
    }

    async fn get_instance(&self, instance: &InstanceRef) -> Result<InstanceInfo, ProviderError> {
        match instance.instance_id.as_str() {
            "missing" => Err(ProviderError::NotFound(instance.to_string())),
            name => Ok(InstanceInfo {
                id: "4242".to_string(),
                name: name.to_string(),
                status: InstanceStatus::Running,
                network_interfaces: vec![NetworkInterface {
                    internal_ip: None,
                    external_ip: (name != "private").then(|| "127.0.0.1".to_string()),
                }],
            }),
        }
    }
}

struct NullRegistry;

#[async_trait]
impl InstanceRegistry for NullRegistry {
    async fn record_instance_id(&self, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn record_public_address(&self, _: &str, _: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

struct AcceptingSourceControl;

#[async_trait]
impl SourceControl for AcceptingSourceControl {
    async fn register_public_key(&self, _: &str, _: &str, _: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

struct OpenPort;

#[async_trait]
impl TcpProbe for OpenPort {
    async fn is_reachable(&self, _host: &str, _port: u16) -> Result<(), String> {
        Ok(())
    }
}

fn setup_state() -> AppState {
    let identities = StaticIdentities::new(vec![
        IdentityEntry {
            user_id: "u-1".to_string(),
            login: "alice".to_string(),
            email: "alice@example.com".to_string(),
            username: "Alice".to_string(),
        },
        IdentityEntry {
            user_id: "u-2".to_string(),
            login: "bob".to_string(),
            email: "bob@example.com".to_string(),
            username: "Bob".to_string(),
        },
    ]);
    let config = OrchestratorConfig::default().with_probes(ProbeSettings {
        running_interval: Duration::from_millis(5),
        ssh_interval: Duration::from_millis(5),
        ..ProbeSettings::default()
    });

    let ctx = ProvisioningContext::new(
        Arc::new(FakeCompute),
        Arc::new(NullRegistry),
        Arc::new(AcceptingSourceControl),
        Arc::new(identities),
        Arc::new(LocalShellTransport::default()),
        config,
    )
    .with_tcp_probe(Arc::new(OpenPort));

    AppState::new(ctx)
}

fn setup_test_server() -> (TestServer, AppState) {
    let state = setup_state();
    let app = create_router(state.clone());
    let server = TestServer::new(app).expect("Failed to create test server");
    (server, state)
}

fn as_user(request: TestRequest, user_id: &'static str) -> TestRequest {
    request
        .add_header(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static(user_id),
        )
        .add_header(
            HeaderName::from_static("x-org-id"),
            HeaderValue::from_static("org-1"),
        )
}

/// `(event name, data)` pairs from an SSE body.
fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event: ") {
                    name = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(v).ok();
                }
            }
            Some((name?, data?))
        })
        .collect()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _state) = setup_test_server();

        let response = server.get("/health").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tracked_runs"], 0);
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let (server, _state) = setup_test_server();

        let response = server.get("/api/openapi.json").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["paths"]["/api/provisioning"].is_object());
        assert!(body["paths"]["/api/sessions/{id}"].is_object());
    }
}

mod provisioning {
    use super::*;

    fn request_body(name: &str) -> Value {
        json!({
            "record_id": "rec-1",
            "name": name,
            "project": "proj",
            "zone": "us-central1-a",
            "boot_script": "echo booted"
        })
    }

    #[tokio::test]
    async fn test_start_returns_202_and_stream_completes() {
        let (server, _state) = setup_test_server();

        let response = as_user(server.post("/api/provisioning"), "u-1")
            .json(&request_body("box1"))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: Value = response.json();
        let tracking_id = body["tracking_id"].as_str().unwrap().to_string();

        let stream = server
            .get(&format!("/api/provisioning/{tracking_id}/stream"))
            .await;
        stream.assert_status_ok();
        let events = sse_events(&stream.text());

        let stages: Vec<_> = events
            .iter()
            .filter(|(name, _)| name == "stage")
            .map(|(_, data)| data["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            stages,
            vec!["preparing", "creating", "configuring", "installing", "finalizing", "complete"]
        );
        assert!(events
            .iter()
            .any(|(name, data)| name == "output"
                && data["output"]["text"].as_str().unwrap().contains("booted")));
        assert_eq!(events.last().unwrap().1["instance_id"], "4242");
    }

    #[tokio::test]
    async fn test_poll_with_cursor() {
        let (server, _state) = setup_test_server();

        let body: Value = as_user(server.post("/api/provisioning"), "u-1")
            .json(&request_body("box1"))
            .await
            .json();
        let tracking_id = body["tracking_id"].as_str().unwrap().to_string();

        // Drain the stream so the run is finished before polling.
        server
            .get(&format!("/api/provisioning/{tracking_id}/stream"))
            .await;

        let all: Value = server
            .get(&format!("/api/provisioning/{tracking_id}"))
            .await
            .json();
        assert_eq!(all["finished"], true);
        assert_eq!(all["stage"], "complete");
        let total = all["events"].as_array().unwrap().len() as u64;
        assert_eq!(all["next_cursor"], total);

        let tail: Value = server
            .get(&format!("/api/provisioning/{tracking_id}"))
            .add_query_param("cursor", total - 1)
            .await
            .json();
        let tail_events = tail["events"].as_array().unwrap();
        assert_eq!(tail_events.len(), 1);
        assert_eq!(tail_events[0]["seq"], total - 1);
    }

    #[tokio::test]
    async fn test_invalid_request_is_400() {
        let (server, state) = setup_test_server();

        let response = as_user(server.post("/api/provisioning"), "u-1")
            .json(&request_body("Bad_Name"))
            .await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert_eq!(body["error"], "validation_error");
        assert!(state.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_headers_is_400() {
        let (server, _state) = setup_test_server();

        let response = server
            .post("/api/provisioning")
            .json(&request_body("box1"))
            .await;

        response.assert_status_bad_request();
        let body: Value = response.json();
        assert!(body["message"].as_str().unwrap().contains("x-user-id"));
    }

    #[tokio::test]
    async fn test_unknown_tracking_id_is_404() {
        let (server, _state) = setup_test_server();
        let id = Uuid::new_v4();

        server
            .get(&format!("/api/provisioning/{id}"))
            .await
            .assert_status_not_found();
        server
            .get(&format!("/api/provisioning/{id}/stream"))
            .await
            .assert_status_not_found();
    }
}

mod scripts {
    use super::*;

    #[tokio::test]
    async fn test_script_streams_session_output_and_result() {
        let (server, _state) = setup_test_server();

        let response = as_user(server.post("/api/instances/box1/scripts"), "u-1")
            .json(&json!({
                "project": "proj",
                "zone": "us-central1-a",
                "script": "echo hello; echo oops >&2; exit 3"
            }))
            .await;

        response.assert_status_ok();
        let events = sse_events(&response.text());

        assert_eq!(events.first().unwrap().0, "session");
        assert!(events.first().unwrap().1["session_id"].is_string());
        assert!(events
            .iter()
            .any(|(name, data)| name == "output"
                && data["stream"] == "stdout"
                && data["text"].as_str().unwrap().contains("hello")));
        let (name, result) = events.last().unwrap();
        assert_eq!(name, "result");
        assert_eq!(result["outcome"]["kind"], "exited");
        assert_eq!(result["outcome"]["code"], 3);
        assert_eq!(result["stderr"], "oops\n");
    }

    #[tokio::test]
    async fn test_missing_instance_is_404() {
        let (server, _state) = setup_test_server();

        let response = as_user(server.post("/api/instances/missing/scripts"), "u-1")
            .json(&json!({"project": "proj", "zone": "z", "script": "true"}))
            .await;

        response.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_instance_without_address_is_409() {
        let (server, _state) = setup_test_server();

        let response = as_user(server.post("/api/instances/private/scripts"), "u-1")
            .json(&json!({"project": "proj", "zone": "z", "script": "true"}))
            .await;

        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_empty_script_is_400() {
        let (server, _state) = setup_test_server();

        let response = as_user(server.post("/api/instances/box1/scripts"), "u-1")
            .json(&json!({"project": "proj", "zone": "z", "script": "  "}))
            .await;

        response.assert_status_bad_request();
    }
}

mod sessions {
    use super::*;

    async fn start_long_script(state: &AppState) -> orchestrator::ScriptHandle {
        state
            .provisioner
            .start_script(ScriptRequest {
                instance: InstanceRef::new("proj", "us-central1-a", "box1"),
                owner: Owner::new("u-1", "org-1"),
                script: "sleep 30".to_string(),
                timeout: Some(Duration::from_secs(60)),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_only_shows_callers_sessions() {
        let (server, state) = setup_test_server();
        let handle = start_long_script(&state).await;

        let mine: Value = as_user(server.get("/api/sessions"), "u-1").await.json();
        assert_eq!(mine.as_array().unwrap().len(), 1);
        assert_eq!(mine[0]["id"], handle.session_id.to_string());
        assert_eq!(mine[0]["instance_id"], "box1");

        let theirs: Value = as_user(server.get("/api/sessions"), "u-2").await.json();
        assert!(theirs.as_array().unwrap().is_empty());

        state
            .provisioner
            .abort_session(handle.session_id, &Owner::new("u-1", "org-1"), None)
            .unwrap();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_checks_owner_and_reports_once() {
        let (server, state) = setup_test_server();
        let handle = start_long_script(&state).await;
        let path = format!("/api/sessions/{}", handle.session_id);

        let response = as_user(server.delete(&path), "u-2").await;
        response.assert_status(StatusCode::FORBIDDEN);

        let first: Value = as_user(server.delete(&path), "u-1").await.json();
        assert_eq!(first["aborted"], true);
        let second: Value = as_user(server.delete(&path), "u-1").await.json();
        assert_eq!(second["aborted"], false);

        let result = handle.wait().await.unwrap();
        assert!(result.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_unknown_session_is_false() {
        let (server, _state) = setup_test_server();

        let body: Value = as_user(server.delete(&format!("/api/sessions/{}", Uuid::new_v4())), "u-1")
            .await
            .json();

        assert_eq!(body["aborted"], false);
    }
}
