#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, on, post, put, MethodFilter};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use common::schemas::{
    ActionMsg, DlJobMap, DlStatusResp, ListObjectsMsg, ObjEntry, ObjectList,
};

use gateway::command::serve::build_router;
use gateway::core::bmd::Bmd;
use gateway::core::config::GatewayConfig;
use gateway::core::membership::JoinReq;
use gateway::core::node::{NodeKind, Snode};
use gateway::core::smap::Smap;
use gateway::core::state::GatewayState;

pub const TEST_SECRET: &str = "test-secret";

fn test_config() -> GatewayConfig {
    GatewayConfig {
        cplane_timeout: Duration::from_millis(2000),
        max_host_busy: Duration::from_millis(3000),
        long_timeout: Duration::from_millis(5000),
        list_objects_timeout: Duration::from_millis(3000),
        cluster_secret: TEST_SECRET.to_string(),
        ..GatewayConfig::default()
    }
}

pub struct TestGateway {
    pub state: GatewayState,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestGateway {
    pub async fn primary(id: &str) -> anyhow::Result<TestGateway> {
        TestGateway::spawn(id, true).await
    }

    /// A proxy with an empty map; call `join` to make it a member.
    pub async fn standalone(id: &str) -> anyhow::Result<TestGateway> {
        TestGateway::spawn(id, false).await
    }

    async fn spawn(id: &str, primary: bool) -> anyhow::Result<TestGateway> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);
        let me = Snode::new(id, NodeKind::Proxy, &url);

        let smap = if primary {
            let mut smap = Smap {
                version: 1,
                uuid: "test-cluster".to_string(),
                primary_id: me.id.clone(),
                ..Default::default()
            };
            smap.put_node(me.clone());
            smap.staff_ic();
            smap
        } else {
            Smap::default()
        };
        let state = GatewayState::new(me, test_config(), smap);
        if primary {
            state.mark_cluster_started();
        }

        let app = build_router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        Ok(TestGateway { state, addr, handle })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Register with `primary` and wait until the membership wave lands.
    pub async fn join(&self, client: &reqwest::Client, primary: &TestGateway) -> anyhow::Result<()> {
        let req = JoinReq { node: (*self.state.me).clone(), smap: None, bmd: None };
        let resp = client
            .post(format!("{}/v1/cluster/autoreg", primary.url()))
            .json(&req)
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "join failed: {}", resp.status());
        let id = self.state.me.id.clone();
        wait_until(5000, || {
            primary.state.owners.smap.get().contains_id(&id)
                && self.state.owners.smap.get().contains_id(&id)
        })
        .await
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

pub async fn wait_until(timeout_ms: u64, cond: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("condition not met within {}ms", timeout_ms)
}

//
// mock storage target
//

#[derive(Default)]
pub struct MockConfig {
    /// Sorted object names this target owns.
    pub objects: Vec<String>,
    pub bmd_reply: Option<Bmd>,
    pub dl_status: Option<DlStatusResp>,
    pub dl_jobs: Option<DlJobMap>,
    /// HEAD /v1/buckets/{name} status for remote lookups (e.g. 404, 410).
    pub head_bucket_status: u16,
    pub fail_set_primary: AtomicBool,
}

#[derive(Clone)]
struct TgtState {
    node: Snode,
    cfg: Arc<MockConfig>,
    /// Route tags in arrival order, e.g. "download-get".
    calls: Arc<Mutex<Vec<String>>>,
    /// smap versions seen in metasync waves.
    wave_versions: Arc<Mutex<Vec<i64>>>,
}

pub struct MockTarget {
    pub node: Snode,
    pub addr: SocketAddr,
    cfg: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<String>>>,
    wave_versions: Arc<Mutex<Vec<i64>>>,
    handle: JoinHandle<()>,
}

impl MockTarget {
    pub async fn spawn(id: &str, cfg: MockConfig) -> anyhow::Result<MockTarget> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let node = Snode::new(id, NodeKind::Target, &format!("http://{}", addr));
        let state = TgtState {
            node: node.clone(),
            cfg: Arc::new(cfg),
            calls: Arc::new(Mutex::new(Vec::new())),
            wave_versions: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/daemon", get(tgt_daemon))
            .route("/v1/daemon/proxy/{id}", put(tgt_set_primary))
            .route("/v1/daemon/unregister", delete(|| async { StatusCode::OK }))
            .route("/v1/metasync", put(tgt_metasync))
            .route(
                "/v1/buckets/{bucket}",
                on(MethodFilter::HEAD, tgt_head_bucket).post(tgt_bucket_post),
            )
            .route("/v1/download", get(tgt_download_admin).post(tgt_download_start))
            .route("/v1/download/{action}", delete(tgt_download_delete))
            .route("/v1/cluster", put(|| async { StatusCode::OK }))
            .with_state(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(MockTarget {
            node,
            addr,
            cfg: state.cfg,
            calls: state.calls,
            wave_versions: state.wave_versions,
            handle,
        })
    }

    pub async fn with_objects(id: &str, objects: &[&str]) -> anyhow::Result<MockTarget> {
        let mut objects: Vec<String> = objects.iter().map(|s| s.to_string()).collect();
        objects.sort();
        MockTarget::spawn(id, MockConfig { objects, ..Default::default() }).await
    }

    pub async fn join(&self, client: &reqwest::Client, primary: &TestGateway) -> anyhow::Result<()> {
        let req = JoinReq { node: self.node.clone(), smap: None, bmd: None };
        let resp = client
            .post(format!("{}/v1/cluster/autoreg", primary.url()))
            .json(&req)
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "target join failed: {}", resp.status());
        let id = self.node.id.clone();
        wait_until(5000, || primary.state.owners.smap.get().contains_id(&id)).await
    }

    pub fn calls(&self, tag: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == tag).count()
    }

    pub fn wave_versions(&self) -> Vec<i64> {
        self.wave_versions.lock().unwrap().clone()
    }

    pub fn set_fail_set_primary(&self, fail: bool) {
        self.cfg.fail_set_primary.store(fail, Ordering::SeqCst);
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

fn record(state: &TgtState, tag: &str) {
    state.calls.lock().unwrap().push(tag.to_string());
}

async fn tgt_daemon(State(state): State<TgtState>, uri: Uri) -> Response {
    record(&state, "daemon-get");
    let what = uri
        .query()
        .and_then(|q| {
            q.split('&').find_map(|p| p.strip_prefix("what=").map(|v| v.to_string()))
        })
        .unwrap_or_default();
    match what.as_str() {
        "snode" => axum::Json(&state.node).into_response(),
        "bmd" => match &state.cfg.bmd_reply {
            Some(bmd) => axum::Json(bmd).into_response(),
            None => axum::Json(Bmd::default()).into_response(),
        },
        _ => axum::Json(serde_json::json!({"node": state.node.id})).into_response(),
    }
}

async fn tgt_set_primary(
    Path(_id): Path<String>,
    State(state): State<TgtState>,
    uri: Uri,
) -> Response {
    let prepare = uri.query().is_some_and(|q| q.contains("prepare=true"));
    record(&state, if prepare { "set-primary-prepare" } else { "set-primary-commit" });
    if state.cfg.fail_set_primary.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response();
    }
    StatusCode::OK.into_response()
}

async fn tgt_metasync(State(state): State<TgtState>, body: Bytes) -> Response {
    record(&state, "metasync");
    if let Ok(env) = serde_json::from_slice::<serde_json::Value>(&body) {
        if let Some(v) = env
            .get("pairs")
            .and_then(|p| p.get("smap"))
            .and_then(|s| s.get("version"))
            .and_then(|v| v.as_i64())
        {
            state.wave_versions.lock().unwrap().push(v);
        }
    }
    StatusCode::OK.into_response()
}

async fn tgt_head_bucket(Path(_bucket): Path<String>, State(state): State<TgtState>) -> Response {
    record(&state, "head-bucket");
    let status = state.cfg.head_bucket_status;
    if status == 0 || status == 200 {
        return StatusCode::OK.into_response();
    }
    StatusCode::from_u16(status).unwrap_or(StatusCode::NOT_FOUND).into_response()
}

/// The listing half of a target: serve the configured sorted object set the
/// way a real target pages through its disks.
async fn tgt_bucket_post(
    Path(_bucket): Path<String>,
    State(state): State<TgtState>,
    body: Bytes,
) -> Response {
    record(&state, "bucket-post");
    let Ok(amsg) = serde_json::from_slice::<ActionMsg>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if amsg.action != common::schemas::ACT_LIST_OBJECTS {
        // xact start and friends: acknowledged, nothing to run here
        return StatusCode::OK.into_response();
    }
    let Ok(msg) = serde_json::from_value::<ListObjectsMsg>(amsg.value) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let page_size = if msg.page_size == 0 { 1000 } else { msg.page_size } as usize;
    let entries: Vec<ObjEntry> = state
        .cfg
        .objects
        .iter()
        .filter(|o| o.as_str() > msg.continuation_token.as_str())
        .filter(|o| o.starts_with(&msg.prefix))
        .take(page_size)
        .map(|o| ObjEntry::named(o))
        .collect();
    let continuation_token = if entries.len() >= page_size {
        entries.last().map(|e| e.name.clone()).unwrap_or_default()
    } else {
        String::new()
    };
    axum::Json(ObjectList { uuid: msg.uuid, entries, continuation_token }).into_response()
}

async fn tgt_download_admin(State(state): State<TgtState>, body: Bytes) -> Response {
    record(&state, "download-get");
    let id = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("id").and_then(|i| i.as_str()).map(String::from))
        .unwrap_or_default();
    if id.is_empty() {
        match &state.cfg.dl_jobs {
            Some(jobs) => axum::Json(jobs).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    } else {
        match &state.cfg.dl_status {
            Some(status) => axum::Json(status).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

async fn tgt_download_start(State(state): State<TgtState>) -> Response {
    record(&state, "download-post");
    StatusCode::OK.into_response()
}

async fn tgt_download_delete(
    Path(_action): Path<String>,
    State(state): State<TgtState>,
) -> Response {
    record(&state, "download-delete");
    axum::Json(serde_json::json!({})).into_response()
}

//
// client helpers
//

/// Re-export for test roots, where `mod common` shadows the crate name.
pub use ::common::schemas;

pub fn uname(bucket: &str, object: &str) -> String {
    schemas::Bck::local(bucket).make_uname(object)
}

pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

pub async fn create_bucket(
    client: &reqwest::Client,
    gateway_url: &str,
    name: &str,
) -> anyhow::Result<reqwest::StatusCode> {
    let msg = ActionMsg::new(common::schemas::ACT_CREATE_BUCKET);
    let resp = client
        .post(format!("{}/v1/buckets/{}", gateway_url, name))
        .json(&msg)
        .send()
        .await?;
    Ok(resp.status())
}
