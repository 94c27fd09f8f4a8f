#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub const ACCOUNT: &str = "reef@example.com";
pub const PASSWORD: &str = "coral-reef";
pub const TOKEN: &str = "token-1";
pub const PRODUCT_KEY: &str = "pk-pump";

/// Model JSON in the layout the models directory uses.
pub const PUMP_MODEL_JSON: &str = r#"{
  "product_key": "pk-pump",
  "name": "Test pump",
  "attrs": [
    {
      "name": "power",
      "display_name": "Power",
      "data_type": "bool",
      "type": "status_writable",
      "position": { "byte_offset": 0, "bit_offset": 0, "len": 1, "unit": "bit" }
    },
    {
      "name": "mode",
      "display_name": "Mode",
      "data_type": "enum",
      "type": "status_writable",
      "enum": ["classic", "wave", "random"],
      "position": { "byte_offset": 0, "bit_offset": 1, "len": 3, "unit": "bit" }
    },
    {
      "name": "speed",
      "display_name": "Speed",
      "data_type": "uint8",
      "type": "status_writable",
      "uint_spec": { "min": 30, "max": 100, "step": 1 },
      "position": { "byte_offset": 1, "bit_offset": 0, "len": 1, "unit": "byte" }
    },
    {
      "name": "fault",
      "data_type": "bool",
      "type": "alert",
      "position": { "byte_offset": 2, "bit_offset": 0, "len": 1, "unit": "bit" }
    }
  ]
}"#;

/// Terminal that is never interactive, so output stays plain.
#[derive(Debug, Default)]
pub struct FakeTerminalClient;

impl jebao::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

/// One control request as the fake cloud received it.
#[derive(Debug, Clone)]
pub struct RecordedControl {
    pub did: String,
    pub application_id: Option<String>,
    pub user_token: Option<String>,
    pub body: Value,
}

#[derive(Debug, Default)]
struct FakeCloudState {
    bindings: Vec<Value>,
    latest: Vec<(String, Value)>,
    malformed_login: bool,
    controls: Mutex<Vec<RecordedControl>>,
}

/// In-process stand-in for the vendor cloud API.
#[derive(Debug)]
pub struct FakeCloud {
    addr: SocketAddr,
    state: Arc<FakeCloudState>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub struct FakeCloudBuilder {
    state: FakeCloudState,
}

impl FakeCloudBuilder {
    pub fn binding(mut self, did: &str, product_key: &str, alias: &str) -> Self {
        self.state.bindings.push(json!({
            "did": did,
            "product_key": product_key,
            "dev_alias": alias,
            "is_online": true,
        }));
        self
    }

    pub fn latest(mut self, did: &str, attr: Value) -> Self {
        self.state.latest.push((did.to_string(), attr));
        self
    }

    pub fn malformed_login(mut self) -> Self {
        self.state.malformed_login = true;
        self
    }

    pub async fn spawn(self) -> anyhow::Result<FakeCloud> {
        let state = Arc::new(self.state);
        let router = Router::new()
            .route("/app/smart_home/login/pwd", post(login))
            .route("/app/bindings", get(bindings))
            .route("/app/devdata/{did}/latest", get(latest))
            .route("/app/control/{did}", post(control))
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(FakeCloud { addr, state, task })
    }
}

impl FakeCloud {
    pub fn builder() -> FakeCloudBuilder {
        FakeCloudBuilder::default()
    }

    pub fn endpoints(&self) -> jebao::CloudEndpoints {
        let base = format!("http://{}", self.addr);
        jebao::CloudEndpoints::new(base.clone(), base)
    }

    pub fn controls(&self) -> Vec<RecordedControl> {
        self.state
            .controls
            .lock()
            .expect("control log lock should not be poisoned")
            .clone()
    }
}

impl Drop for FakeCloud {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn authorised(headers: &HeaderMap) -> bool {
    header(headers, "X-Gizwits-Application-Id").as_deref() == Some(jebao::APPLICATION_ID)
        && header(headers, "X-Gizwits-User-token").as_deref() == Some(TOKEN)
}

fn invalid_token() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error_code": 9004, "error_message": "token invalid" })),
    )
}

async fn login(
    State(state): State<Arc<FakeCloudState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if state.malformed_login {
        return (StatusCode::OK, Json(json!({ "data": {} })));
    }
    let data = &body["data"];
    if data["account"] == ACCOUNT && data["password"] == PASSWORD {
        (StatusCode::OK, Json(json!({ "data": { "userToken": TOKEN } })))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error_code": 9020, "error_message": "username or password error" })),
        )
    }
}

async fn bindings(
    State(state): State<Arc<FakeCloudState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorised(&headers) {
        return invalid_token();
    }
    (StatusCode::OK, Json(json!({ "devices": state.bindings })))
}

async fn latest(
    State(state): State<Arc<FakeCloudState>>,
    Path(did): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorised(&headers) {
        return invalid_token();
    }
    match state.latest.iter().find(|(known, _attr)| *known == did) {
        Some((_known, attr)) => (
            StatusCode::OK,
            Json(json!({ "did": did, "updated_at": 0, "attr": attr })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error_code": 9014, "error_message": "did not found" })),
        ),
    }
}

async fn control(
    State(state): State<Arc<FakeCloudState>>,
    Path(did): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorised(&headers) {
        return invalid_token();
    }
    state
        .controls
        .lock()
        .expect("control log lock should not be poisoned")
        .push(RecordedControl {
            did,
            application_id: header(&headers, "X-Gizwits-Application-Id"),
            user_token: header(&headers, "X-Gizwits-User-token"),
            body,
        });
    (StatusCode::OK, Json(json!({})))
}
