//! Pass-through endpoints over the container runtime.

use std::collections::HashSet;
use std::io;

use axum::{
    body::Body,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::extract::ApiKeyAuth;
use crate::runtime::{
    list_dir, locate_download, resolve_container_path, resolve_volume_path, stack_names,
    BrowseError, ContainerAction, ContainerSummary, DownloadSource, FileEntry, MountPoint,
    COMPOSE_PROJECT_LABEL, SWARM_STACK_LABEL,
};
use crate::state::AppState;

/// Log lines returned when `tail` is not given.
const DEFAULT_LOG_TAIL: u32 = 2000;

const DOWNLOAD_CHUNK: usize = 64 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/containers", get(list_containers))
        .route("/containers/summary", get(container_summaries))
        .route("/ws/containers/summary", get(container_summaries_ws))
        .route(
            "/containers/{container_id}",
            get(get_container).delete(remove_container),
        )
        .route("/containers/{container_id}/files", get(container_files))
        .route("/containers/{container_id}/logs", get(container_logs))
        .route("/containers/{container_id}/download", get(download_file))
        .route("/containers/{container_id}/{action}", post(container_action))
        .route("/images", get(list_images))
        .route("/images/{*reference}", get(get_image))
        .route("/networks", get(list_networks))
        .route("/volumes", get(list_volumes))
        .route("/volumes/{name}", get(get_volume))
        .route("/volumes/{name}/files", get(volume_files))
        .route("/stacks", get(list_stacks))
        .route("/stacks/{name}/containers", get(stack_containers))
        .route("/runtime/version", get(runtime_version))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveQuery {
    #[serde(default = "default_true")]
    pub force: bool,
    #[serde(default)]
    pub v: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct FileListing {
    pub path: String,
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub id: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ContainerLogs {
    pub logs: String,
}

/// GET /containers
async fn list_containers(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .docker()
        .list_containers()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(entries))
}

/// GET /containers/summary
async fn container_summaries(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .docker()
        .list_containers()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(summaries(&state, &entries)))
}

/// GET /ws/containers/summary
///
/// Sends one summary per text frame, then closes.
async fn container_summaries_ws(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!(key_id = %auth.key_id, "Container summary WebSocket opened");
    ws.on_upgrade(move |socket| send_summaries(socket, state))
}

async fn send_summaries(mut socket: WebSocket, state: AppState) {
    let entries = match state.docker().list_containers().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to list containers for summary socket");
            let _ = socket.send(Message::Text(format!("Error: {e}").into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "runtime unavailable".into(),
                })))
                .await;
            return;
        }
    };

    for summary in summaries(&state, &entries) {
        let text = match serde_json::to_string(&summary) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, container_id = %summary.id, "Failed to encode summary");
                continue;
            }
        };
        if let Err(e) = socket.send(Message::Text(text.into())).await {
            debug!(error = %e, "Client went away");
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

fn summaries(state: &AppState, entries: &[Value]) -> Vec<ContainerSummary> {
    entries
        .iter()
        .map(|entry| ContainerSummary::from_list_entry(entry, state.self_id()))
        .collect()
}

/// GET /containers/{container_id}
async fn get_container(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(container_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let container = state
        .docker()
        .inspect_container(&container_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(container))
}

/// POST /containers/{container_id}/{action}
async fn container_action(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path((container_id, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let action: ContainerAction = action.parse().map_err(|e: String| {
        ApiError::bad_request("invalid_action", e).with_request_id(auth.request_id.clone())
    })?;

    state
        .docker()
        .container_action(&container_id, action)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    info!(
        container_id = %container_id,
        action = %action,
        key_id = %auth.key_id,
        "Container action applied"
    );
    Ok(Json(ActionResponse {
        id: container_id,
        action: action.to_string(),
    }))
}

/// DELETE /containers/{container_id}
async fn remove_container(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(container_id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .docker()
        .remove_container(&container_id, query.force, query.v)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    info!(container_id = %container_id, key_id = %auth.key_id, "Container removed");
    Ok(Json(serde_json::json!({ "id": container_id, "removed": true })))
}

/// GET /containers/{container_id}/files?path=
///
/// Only paths on the container's mounts are reachable.
async fn container_files(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(container_id): Path<String>,
    Query(query): Query<FilesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let container = state
        .docker()
        .inspect_container(&container_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    let mounts = MountPoint::from_inspect(&container);

    let path = match query.path.filter(|p| !p.is_empty()) {
        Some(path) => path,
        None => mounts
            .first()
            .map(|m| m.destination.clone())
            .ok_or_else(|| {
                ApiError::not_found("no_mounts", "Container has no mounted paths")
                    .with_request_id(auth.request_id.clone())
            })?,
    };

    let host_path = resolve_container_path(state.host_root(), &mounts, &path)
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    let entries = list_dir(&host_path)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    Ok(Json(FileListing { path, entries }))
}

/// GET /containers/{container_id}/logs?tail=
async fn container_logs(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(container_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state
        .docker()
        .container_logs(&container_id, query.tail.unwrap_or(DEFAULT_LOG_TAIL))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(ContainerLogs { logs }))
}

/// GET /containers/{container_id}/download?path=
///
/// Mounted files stream from the host. Other paths come from the runtime as
/// a tar archive.
async fn download_file(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(container_id): Path<String>,
    Query(query): Query<FilesQuery>,
) -> Result<Response, ApiError> {
    let path = query.path.filter(|p| p.starts_with('/')).ok_or_else(|| {
        ApiError::bad_request("invalid_path", "Path must be absolute, e.g. /data/config.json")
            .with_request_id(auth.request_id.clone())
    })?;

    let docker = state.docker();
    let container = docker
        .inspect_container(&container_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    let mounts = MountPoint::from_inspect(&container);
    let name = download_name(&path);

    let source = locate_download(state.host_root(), &mounts, &path)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    match source {
        DownloadSource::Host(host_path) => {
            let file = tokio::fs::File::open(&host_path).await.map_err(|e| {
                let err = if e.kind() == io::ErrorKind::NotFound {
                    BrowseError::NotFound
                } else {
                    BrowseError::Io(e)
                };
                ApiError::from(err).with_request_id(auth.request_id.clone())
            })?;
            info!(
                container_id = %container_id,
                path = %path,
                key_id = %auth.key_id,
                "Serving mounted file"
            );
            Ok(attachment(
                Body::from_stream(file_chunks(file)),
                "application/octet-stream",
                &name,
            ))
        }
        DownloadSource::Archive => {
            let archive = docker
                .container_archive(&container_id, &path)
                .await
                .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
            info!(
                container_id = %container_id,
                path = %path,
                key_id = %auth.key_id,
                "Serving archive from runtime"
            );
            Ok(attachment(
                Body::from_stream(archive),
                "application/x-tar",
                &format!("{name}.tar"),
            ))
        }
    }
}

fn file_chunks(file: tokio::fs::File) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures_util::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), file)))
    })
}

/// Last path component, safe to quote in a header.
fn download_name(path: &str) -> String {
    let name: String = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    if name.is_empty() {
        "download".to_string()
    } else {
        name
    }
}

fn attachment(body: Body, content_type: &'static str, name: &str) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}

/// GET /images
async fn list_images(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let images = state
        .docker()
        .list_images()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(images))
}

/// GET /images/{reference}
async fn get_image(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state
        .docker()
        .inspect_image(&reference)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(image))
}

/// GET /networks
async fn list_networks(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let networks = state
        .docker()
        .list_networks()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(networks))
}

/// GET /volumes
///
/// Each volume gains an `in_use` flag: true when any container mounts it.
async fn list_volumes(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let docker = state.docker();
    let (volumes, containers) = tokio::try_join!(docker.list_volumes(), docker.list_containers())
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    Ok(Json(mark_in_use(volumes, &containers)))
}

fn mark_in_use(volumes: Vec<Value>, containers: &[Value]) -> Vec<Value> {
    let used: HashSet<&str> = containers
        .iter()
        .filter_map(|c| c.get("Mounts").and_then(Value::as_array))
        .flatten()
        .filter(|m| m.get("Type").and_then(Value::as_str) == Some("volume"))
        .filter_map(|m| m.get("Name").and_then(Value::as_str))
        .collect();

    volumes
        .into_iter()
        .map(|mut volume| {
            let in_use = volume
                .get("Name")
                .and_then(Value::as_str)
                .is_some_and(|name| used.contains(name));
            if let Some(obj) = volume.as_object_mut() {
                obj.insert("in_use".to_string(), Value::Bool(in_use));
            }
            volume
        })
        .collect()
}

/// GET /volumes/{name}
async fn get_volume(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let volume = state
        .docker()
        .inspect_volume(&name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(volume))
}

/// GET /volumes/{name}/files?path=
async fn volume_files(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(name): Path<String>,
    Query(query): Query<FilesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let volume = state
        .docker()
        .inspect_volume(&name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    let path = query.path.unwrap_or_default();
    let mountpoint = volume.get("Mountpoint").and_then(Value::as_str);
    let host_path = resolve_volume_path(state.host_root(), mountpoint, &path)
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    let entries = list_dir(&host_path)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    let path = if path.is_empty() { "/".to_string() } else { path };
    Ok(Json(FileListing { path, entries }))
}

/// GET /stacks
async fn list_stacks(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let containers = state
        .docker()
        .list_containers()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(stack_names(&containers)))
}

/// GET /stacks/{name}/containers
///
/// Matches compose projects first, swarm stacks second.
async fn stack_containers(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let docker = state.docker();
    let mut containers = docker
        .list_containers_with_label(COMPOSE_PROJECT_LABEL, &name)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    if containers.is_empty() {
        containers = docker
            .list_containers_with_label(SWARM_STACK_LABEL, &name)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    }

    Ok(Json(summaries(&state, &containers)))
}

/// GET /runtime/version
async fn runtime_version(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .docker()
        .version()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(version))
}
