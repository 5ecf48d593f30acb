mod common;

use common::fake_runtime::{WEB_ID, WEB_MOUNT_SOURCE, WORKER_ID};
use common::{issue_token, start_api_with_runtime};
use reqwest::StatusCode;
use serde_json::Value;

async fn get(client: &reqwest::Client, url: String, token: &str) -> reqwest::Response {
    client
        .get(url)
        .header("X-API-Key", token)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn container_listing_and_summaries() {
    let fixture = start_api_with_runtime(None).await;
    let base_url = fixture.base_url.clone();
    let client = reqwest::Client::new();
    let token = issue_token(&client, &base_url, "ops").await;

    // The plain listing is the runtime's own document.
    let resp = get(&client, format!("{base_url}/containers"), &token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let raw: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0]["Names"][0], "/web");

    let resp = get(&client, format!("{base_url}/containers/summary"), &token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let summaries: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["id"], WEB_ID);
    assert_eq!(summaries[0]["name"], "web");
    assert_eq!(summaries[0]["stack"], "shop");
    assert_eq!(summaries[0]["ports"], "8080->80/tcp");
    assert_eq!(summaries[0]["is_self"], false);
    assert_eq!(summaries[1]["name"], "worker");
    assert_eq!(summaries[1]["status"], "exited");

    let resp = client
        .get(format!("{base_url}/containers/summary"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .get(format!("{base_url}/ws/containers/summary"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn container_logs_are_demultiplexed() {
    let fixture = start_api_with_runtime(None).await;
    let base_url = fixture.base_url.clone();
    let client = reqwest::Client::new();
    let token = issue_token(&client, &base_url, "ops").await;

    let resp = get(&client, format!("{base_url}/containers/web/logs?tail=5"), &token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["logs"], "tail=5\n2024-05-01T10:00:00Z worker booted\n");

    let resp = get(&client, format!("{base_url}/containers/web/logs"), &token).await;
    let body: Value = resp.json().await.unwrap();
    assert!(body["logs"].as_str().unwrap().starts_with("tail=2000\n"));

    let resp = get(&client, format!("{base_url}/containers/ghost/logs"), &token).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "runtime_not_found");
}

#[tokio::test]
async fn download_serves_mounted_files_and_archives() {
    let fixture = start_api_with_runtime(None).await;
    let base_url = fixture.base_url.clone();
    let client = reqwest::Client::new();
    let token = issue_token(&client, &base_url, "ops").await;

    let mount = fixture.host_root.join(WEB_MOUNT_SOURCE);
    std::fs::create_dir_all(mount.join("conf")).unwrap();
    std::fs::write(mount.join("conf/app.conf"), "listen 80;\n").unwrap();

    let download = |path: &str| {
        client
            .get(format!("{base_url}/containers/web/download"))
            .query(&[("path", path)])
            .header("X-API-Key", &token)
            .send()
    };

    let resp = download("/data/conf/app.conf").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"app.conf\""
    );
    assert_eq!(resp.text().await.unwrap(), "listen 80;\n");

    // Off the mounts, the runtime supplies a tar archive.
    let resp = download("/etc/os-release").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/x-tar");
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"os-release.tar\""
    );
    assert_eq!(resp.text().await.unwrap(), "TAR:/etc/os-release");

    let rejected = [
        ("/data/conf", StatusCode::BAD_REQUEST, "is_a_directory"),
        ("conf/app.conf", StatusCode::BAD_REQUEST, "invalid_path"),
        ("/data/../../etc/shadow", StatusCode::FORBIDDEN, "path_traversal"),
        ("/missing", StatusCode::NOT_FOUND, "runtime_not_found"),
    ];
    for (path, status, code) in rejected {
        let resp = download(path).await.unwrap();
        assert_eq!(resp.status(), status, "{path}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], code, "{path}");
    }
}

#[tokio::test]
async fn self_container_found_by_short_id() {
    let fixture = start_api_with_runtime(Some(&WEB_ID[..12])).await;
    let base_url = fixture.base_url.clone();
    let client = reqwest::Client::new();
    let token = issue_token(&client, &base_url, "ops").await;

    let resp = get(&client, format!("{base_url}/system/self"), &token).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["Id"], WEB_ID);

    let summaries: Vec<Value> = get(&client, format!("{base_url}/containers/summary"), &token)
        .await
        .json()
        .await
        .unwrap();
    let flags: Vec<(&str, bool)> = summaries
        .iter()
        .map(|s| (s["id"].as_str().unwrap(), s["is_self"].as_bool().unwrap()))
        .collect();
    assert_eq!(flags, vec![(WEB_ID, true), (WORKER_ID, false)]);
}

#[tokio::test]
async fn self_container_missing() {
    let fixture = start_api_with_runtime(None).await;
    let client = reqwest::Client::new();
    let token = issue_token(&client, &fixture.base_url, "ops").await;

    let resp = get(&client, format!("{}/system/self", fixture.base_url), &token).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "self_unknown");

    let fixture = start_api_with_runtime(Some("ffffffffffff")).await;
    let token = issue_token(&client, &fixture.base_url, "ops").await;
    let resp = get(&client, format!("{}/system/self", fixture.base_url), &token).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "self_not_found");
}
