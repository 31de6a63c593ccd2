#![allow(clippy::unwrap_used, clippy::expect_used)]
//! `sessions.*` methods against a live engine.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    switchboard_agents::{
        AgentBackend, ModelRef, ReplyFragment, RunEvent, RunRequest, RunStream, StaticModelCatalog,
    },
    switchboard_channels::ChannelOutbound,
    switchboard_common::MsgContext,
    switchboard_config::SwitchboardConfig,
    switchboard_gateway::{ConnectedClient, Gateway},
    switchboard_protocol::{RequestFrame, ResponseFrame, error_codes, scopes},
    tempfile::TempDir,
};

/// Echoes its input, except that inputs containing "hold" never finish.
#[derive(Default)]
struct Backend {
    inputs: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl AgentBackend for Backend {
    async fn start_run(&self, request: RunRequest) -> anyhow::Result<RunStream> {
        self.inputs.lock().unwrap().push(request.input.clone());
        if request.input.contains("hold") {
            return Ok(Box::pin(futures::stream::pending()));
        }
        let events = vec![RunEvent::Fragment(ReplyFragment::final_text(format!(
            "echo: {}",
            request.input
        )))];
        Ok(Box::pin(tokio_stream::iter(events)))
    }

    async fn cancel_run(&self, session_id: &str) -> anyhow::Result<()> {
        self.cancelled.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct Outbox;

#[async_trait]
impl ChannelOutbound for Outbox {
    async fn send_text(&self, _account_id: &str, _to: &str, _text: &str) -> switchboard_channels::Result<()> {
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    gw: Gateway,
    backend: Arc<Backend>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness() -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = SwitchboardConfig::default();
    config.session.store = Some(dir.path().to_path_buf());
    let backend = Arc::new(Backend::default());
    let catalog = StaticModelCatalog::new(vec![
        ModelRef::new("openai", "gpt-4o"),
        ModelRef::new("anthropic", "claude-sonnet-4"),
    ]);
    let gw = Gateway::build(&config, backend.clone(), Arc::new(Outbox), Arc::new(catalog)).unwrap();
    gw.state
        .register_client(ConnectedClient::operator("admin", &[scopes::ADMIN]))
        .await;
    gw.state
        .register_client(ConnectedClient::operator("viewer", &[scopes::READ]))
        .await;
    Harness {
        _dir: dir,
        gw,
        backend,
    }
}

impl Harness {
    async fn call_as(&self, conn_id: &str, method: &str, params: Value) -> ResponseFrame {
        self.gw
            .methods
            .handle_frame(&self.gw.state, conn_id, RequestFrame::new("r1", method, params))
            .await
    }

    async fn call(&self, method: &str, params: Value) -> ResponseFrame {
        self.call_as("admin", method, params).await
    }

    async fn ok(&self, method: &str, params: Value) -> Value {
        let res = self.call(method, params).await;
        assert!(res.ok, "{method} failed: {:?}", res.error);
        res.payload.unwrap()
    }

    async fn inbound(&self, ctx: MsgContext) -> String {
        let outcome = self.gw.engine.handle_inbound(ctx).await.unwrap();
        outcome.session_key
    }

    async fn settle(&self, key: &str) {
        self.gw.engine.coordinator().wait_idle(key).await;
    }
}

fn direct(body: &str) -> MsgContext {
    MsgContext {
        from: "telegram:1001".into(),
        surface: Some("telegram".into()),
        chat_type: Some("direct".into()),
        body: body.into(),
        ..Default::default()
    }
}

fn group(id: &str, body: &str) -> MsgContext {
    MsgContext {
        from: format!("telegram:group:{id}"),
        surface: Some("telegram".into()),
        chat_type: Some("group".into()),
        body: body.into(),
        was_mentioned: Some(true),
        ..Default::default()
    }
}

#[tokio::test]
async fn list_filters_and_limits() {
    let h = harness().await;
    let key = h.inbound(direct("hello")).await;
    h.settle(&key).await;
    let key = h.inbound(group("-100", "hi all")).await;
    h.settle(&key).await;
    h.gw
        .engine
        .store()
        .update_last_route("global", "telegram", "x")
        .await
        .unwrap();

    let payload = h.ok("sessions.list", json!({})).await;
    assert_eq!(payload["count"], 2);
    assert!(payload["path"].as_str().unwrap().ends_with("sessions.json"));
    assert!(payload["ts"].as_u64().unwrap() > 0);
    let keys: Vec<&str> = payload["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["key"].as_str().unwrap())
        .collect();
    assert!(!keys.contains(&"global"));
    let group_row = payload["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["key"] == "telegram:group:-100")
        .unwrap();
    assert_eq!(group_row["kind"], "group");
    assert!(group_row["totalTokens"].is_u64());

    let payload = h.ok("sessions.list", json!({"includeGlobal": true})).await;
    assert_eq!(payload["count"], 3);

    let payload = h.ok("sessions.list", json!({"limit": 1})).await;
    assert_eq!(payload["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn patch_validates_and_applies() {
    let h = harness().await;
    let key = h.inbound(direct("hello")).await;
    h.settle(&key).await;

    let payload = h
        .ok("sessions.patch", json!({"key": "main", "thinkingLevel": "medium", "verboseLevel": "on"}))
        .await;
    assert_eq!(payload["entry"]["thinkingLevel"], "medium");
    let before = h.gw.engine.store().get("main").await.unwrap();

    let res = h
        .call("sessions.patch", json!({"key": "main", "thinkingLevel": "banana"}))
        .await;
    assert!(!res.ok);
    let err = res.error.unwrap();
    assert_eq!(err.code, error_codes::INVALID_REQUEST);
    assert!(err.message.to_lowercase().contains("invalid thinkinglevel"));
    assert_eq!(h.gw.engine.store().get("main").await.unwrap(), before);

    let payload = h
        .ok("sessions.patch", json!({"key": "main", "verboseLevel": null}))
        .await;
    assert!(payload["entry"].get("verboseLevel").is_none());
    assert_eq!(payload["entry"]["thinkingLevel"], "medium");
}

#[tokio::test]
async fn patch_model_goes_through_catalog() {
    let h = harness().await;

    let payload = h.ok("sessions.patch", json!({"key": "dm:1", "model": "gpt-4o"})).await;
    assert_eq!(payload["entry"]["providerOverride"], "openai");
    assert_eq!(payload["entry"]["modelOverride"], "gpt-4o");

    let res = h.call("sessions.patch", json!({"key": "dm:1", "model": "nope"})).await;
    let err = res.error.unwrap();
    assert_eq!(err.code, error_codes::INVALID_REQUEST);
    assert_eq!(err.message, "unknown model: nope");

    let payload = h.ok("sessions.patch", json!({"key": "dm:1", "model": null})).await;
    assert!(payload["entry"].get("providerOverride").is_none());
    assert!(payload["entry"].get("modelOverride").is_none());
}

#[tokio::test]
async fn read_scope_cannot_write() {
    let h = harness().await;
    let res = h.call_as("viewer", "sessions.list", json!({})).await;
    assert!(res.ok);

    let res = h
        .call_as("viewer", "sessions.reset", json!({"key": "main"}))
        .await;
    assert!(!res.ok);
    assert_eq!(res.error.unwrap().message, "missing scope: operator.write");
}

#[tokio::test]
async fn protected_sessions_cannot_be_deleted() {
    let h = harness().await;
    for key in ["main", "global"] {
        let res = h.call("sessions.delete", json!({"key": key})).await;
        assert!(!res.ok);
        let err = res.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_REQUEST);
        assert!(err.message.contains(key));
    }
}

#[tokio::test]
async fn delete_cancels_active_run_and_archives_transcript() {
    let h = harness().await;
    let key = h.inbound(group("-200", "hold this thought")).await;
    while h.backend.inputs.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let entry = h.gw.engine.store().get(&key).await.unwrap();
    let transcript = h.gw.engine.transcripts().path_for(&entry.session_id);
    assert!(transcript.exists());

    let payload = h.ok("sessions.delete", json!({"key": key})).await;
    assert_eq!(payload["deleted"], true);
    assert_eq!(payload["cancelled"], true);
    let archived = payload["archived"].as_str().unwrap();
    assert!(archived.contains(".deleted."));
    assert!(std::path::Path::new(archived).exists());

    assert_eq!(*h.backend.cancelled.lock().unwrap(), vec![entry.session_id]);
    assert!(!transcript.exists());
    assert!(h.gw.engine.store().get(&key).await.is_none());
    assert!(h.gw.engine.coordinator().snapshot(&key).is_none());
    assert!(h.gw.engine.history().is_empty(&key));
}

#[tokio::test]
async fn compact_keeps_tail_and_backs_up() {
    let h = harness().await;
    let payload = h
        .ok("sessions.patch", json!({"key": "telegram:group:7", "label": "ops"}))
        .await;
    let session_id = payload["entry"]["sessionId"].as_str().unwrap().to_string();
    let transcripts = h.gw.engine.transcripts();
    for i in 0..10 {
        transcripts
            .append(&session_id, &json!({"role": "user", "content": format!("m{i}")}))
            .await
            .unwrap();
    }

    let payload = h
        .ok("sessions.compact", json!({"key": "telegram:group:7", "maxLines": 3}))
        .await;
    assert_eq!(payload["compacted"], true);
    assert_eq!(payload["kept"], 3);

    let live = std::fs::read_to_string(transcripts.path_for(&session_id)).unwrap();
    assert_eq!(live.lines().count(), 3);
    assert!(live.contains("m9"));
    let backup = payload["backup"].as_str().unwrap();
    assert!(backup.contains(".bak."));
    assert_eq!(std::fs::read_to_string(backup).unwrap().lines().count(), 10);

    let payload = h
        .ok("sessions.compact", json!({"key": "telegram:group:7", "maxLines": 3}))
        .await;
    assert_eq!(payload["compacted"], false);
}

#[tokio::test]
async fn reset_issues_new_session_id() {
    let h = harness().await;
    let key = h.inbound(direct("hello")).await;
    h.settle(&key).await;
    let before = h.gw.engine.store().get("main").await.unwrap();

    let payload = h.ok("sessions.reset", json!({"key": "main"})).await;
    assert_eq!(payload["cancelled"], false);
    assert_ne!(payload["entry"]["sessionId"], before.session_id.as_str());
    assert!(payload["entry"]["updatedAt"].as_u64().unwrap() >= before.updated_at);
}

#[tokio::test]
async fn preview_returns_transcript_tail() {
    let h = harness().await;
    let key = h.inbound(direct("hello")).await;
    h.settle(&key).await;

    let payload = h
        .ok("sessions.preview", json!({"key": "main", "limit": 1}))
        .await;
    let lines = payload["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["role"], "assistant");
    assert_eq!(lines[0]["content"], "echo: hello");

    let payload = h.ok("sessions.preview", json!({"key": "nobody"})).await;
    assert_eq!(payload["lines"], json!([]));
}

#[tokio::test]
async fn bad_params_are_invalid_requests() {
    let h = harness().await;
    let res = h.call("sessions.delete", json!({})).await;
    assert_eq!(res.error.unwrap().code, error_codes::INVALID_REQUEST);

    let res = h.call("sessions.compact", json!({"key": "main", "maxLines": 0})).await;
    assert_eq!(res.error.unwrap().code, error_codes::INVALID_REQUEST);
}
