//! A stand-in for the runtime API, served on a Unix socket.
//!
//! Knows two containers. `web` bind-mounts `/srv/web` at `/data`.

use std::collections::HashMap;
use std::path::Path;

use axum::{
    extract::{Path as UrlPath, Query},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::UnixListener;

pub const WEB_ID: &str = "3f2a9c0d1e2f4a5b6c7d8e9f0a1b2c3d";
pub const WORKER_ID: &str = "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b";

/// Host directory behind `web`'s `/data` mount, relative to the host root.
pub const WEB_MOUNT_SOURCE: &str = "srv/web";

pub async fn serve(socket_path: &Path) {
    let listener = UnixListener::bind(socket_path).unwrap();
    let app = Router::new()
        .route("/containers/json", get(list_containers))
        .route("/containers/{id}/json", get(inspect_container))
        .route("/containers/{id}/logs", get(container_logs))
        .route("/containers/{id}/archive", get(container_archive));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

fn web() -> Value {
    json!({
        "Id": WEB_ID,
        "Names": ["/web"],
        "Image": "nginx:1.27",
        "State": "running",
        "Labels": { "com.docker.compose.project": "shop" },
        "Ports": [{ "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp" }],
        "Mounts": [{
            "Type": "bind",
            "Source": format!("/{WEB_MOUNT_SOURCE}"),
            "Destination": "/data"
        }]
    })
}

fn worker() -> Value {
    json!({
        "Id": WORKER_ID,
        "Names": ["/worker"],
        "Image": "busybox:1.36",
        "State": "exited",
        "Labels": {},
        "Ports": [],
        "Mounts": []
    })
}

fn lookup(id: &str) -> Option<Value> {
    match id {
        WEB_ID | "web" => Some(web()),
        WORKER_ID | "worker" => Some(worker()),
        _ => None,
    }
}

fn no_such_container(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("No such container: {id}") })),
    )
        .into_response()
}

async fn list_containers() -> Json<Vec<Value>> {
    Json(vec![web(), worker()])
}

async fn inspect_container(UrlPath(id): UrlPath<String>) -> Response {
    match lookup(&id) {
        Some(container) => Json(container).into_response(),
        None => no_such_container(&id),
    }
}

fn frame(stream: u8, text: &str) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(text.len() as u32).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

/// Multiplexed output whose first line echoes the requested tail.
async fn container_logs(
    UrlPath(id): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if lookup(&id).is_none() {
        return no_such_container(&id);
    }
    let tail = query.get("tail").cloned().unwrap_or_default();
    let mut body = frame(1, &format!("tail={tail}\n"));
    body.extend(frame(2, "2024-05-01T10:00:00Z worker booted\n"));
    (
        [(CONTENT_TYPE, "application/vnd.docker.multiplexed-stream")],
        body,
    )
        .into_response()
}

async fn container_archive(
    UrlPath(id): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if lookup(&id).is_none() {
        return no_such_container(&id);
    }
    let path = query.get("path").cloned().unwrap_or_default();
    if path == "/missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("Could not find the file {path} in container {id}") })),
        )
            .into_response();
    }
    ([(CONTENT_TYPE, "application/x-tar")], format!("TAR:{path}")).into_response()
}
