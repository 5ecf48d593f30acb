#![allow(dead_code)]

pub mod fake_runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dockward_server::{
    api,
    auth::AdminCredential,
    db::{Database, DbConfig},
    hub::{EventHub, EventSource, EventStream, HubConfig, HubHandle, UpstreamError},
    runtime::RuntimeConfig,
    state::AppState,
    update::{GitWorkingCopy, RestartMode, UpdateConfig, UpdateStatus},
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse";

/// A feed that connects and then stays silent.
pub struct QuietSource;

#[async_trait]
impl EventSource for QuietSource {
    async fn open(&self) -> Result<EventStream, UpstreamError> {
        Ok(Box::pin(futures_util::stream::pending()))
    }
}

pub struct ApiFixture {
    pub base_url: String,
    pub db: Database,
    pub hub: HubHandle,
    pub host_root: PathBuf,
    pub shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

/// API with no runtime behind it.
pub async fn start_api(source: Arc<dyn EventSource>, hub_config: HubConfig) -> ApiFixture {
    let dir = tempfile::tempdir().unwrap();
    let runtime = RuntimeConfig {
        socket_path: dir.path().join("missing.sock"),
        host_root: dir.path().join("hostfs"),
        self_id: None,
    };
    start_api_in(dir, source, hub_config, runtime).await
}

/// API backed by [`fake_runtime`], optionally believing it runs in the
/// container `self_id`.
pub async fn start_api_with_runtime(self_id: Option<&str>) -> ApiFixture {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("runtime.sock");
    fake_runtime::serve(&socket_path).await;

    let runtime = RuntimeConfig {
        socket_path,
        host_root: dir.path().join("hostfs"),
        self_id: self_id.map(str::to_string),
    };
    start_api_in(dir, Arc::new(QuietSource), HubConfig::default(), runtime).await
}

async fn start_api_in(
    dir: TempDir,
    source: Arc<dyn EventSource>,
    hub_config: HubConfig,
    runtime: RuntimeConfig,
) -> ApiFixture {
    let db_config = DbConfig {
        database_url: format!("sqlite://{}", dir.path().join("api.db").display()),
        ..Default::default()
    };
    let db = Database::connect(&db_config).await.unwrap();
    db.run_migrations().await.unwrap();

    let (shutdown, shutdown_rx) = watch::channel(false);
    let hub = EventHub::new(source, hub_config);
    let hub_handle = hub.handle();
    tokio::spawn(async move { hub.run(shutdown_rx).await });

    let work_dir = dir.path().join("checkout");
    std::fs::create_dir_all(&work_dir).unwrap();
    let host_root = runtime.host_root.clone();
    std::fs::create_dir_all(&host_root).unwrap();

    let state = AppState::new(
        db.clone(),
        AdminCredential::new(ADMIN_USER, ADMIN_PASSWORD),
        hub_handle.clone(),
        runtime,
        UpdateStatus::disabled(),
        GitWorkingCopy::new(&update_config(work_dir)),
    );
    let app = api::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ApiFixture {
        base_url: format!("http://{addr}"),
        db,
        hub: hub_handle,
        host_root,
        shutdown,
        _dir: dir,
    }
}

/// Issue an access key through the admin surface and return its token.
pub async fn issue_token(client: &reqwest::Client, base_url: &str, label: &str) -> String {
    let body: serde_json::Value = client
        .post(format!("{base_url}/admin/keys"))
        .basic_auth(ADMIN_USER, Some(ADMIN_PASSWORD))
        .json(&serde_json::json!({ "label": label }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["token"].as_str().unwrap().to_string()
}

fn update_config(work_dir: PathBuf) -> UpdateConfig {
    UpdateConfig {
        enabled: false,
        repo_url: String::new(),
        branch: "main".to_string(),
        username: None,
        password: None,
        mirrors: Vec::new(),
        ssl_no_verify: false,
        interval: Duration::from_secs(60),
        work_dir,
        post_update_cmd: None,
        restart_mode: RestartMode::Exit,
        drain_timeout: Duration::from_secs(1),
    }
}
