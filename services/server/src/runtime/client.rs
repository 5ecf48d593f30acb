//! Runtime API client over a Unix socket.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use dockward_events::EventEnvelope;
use futures_core::Stream;
use futures_util::StreamExt;
use hyper::{header, Body, Client, Method, Request, Response, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::logs::decode_log_stream;
use super::RuntimeError;
use crate::hub::{EventSource, EventStream, UpstreamError};

/// Lifecycle actions forwarded verbatim to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Kill,
    Pause,
    Unpause,
}

impl ContainerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Kill => "kill",
            ContainerAction::Pause => "pause",
            ContainerAction::Unpause => "unpause",
        }
    }
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ContainerAction::Start),
            "stop" => Ok(ContainerAction::Stop),
            "restart" => Ok(ContainerAction::Restart),
            "kill" => Ok(ContainerAction::Kill),
            "pause" => Ok(ContainerAction::Pause),
            "unpause" => Ok(ContainerAction::Unpause),
            other => Err(format!("unknown container action: {other}")),
        }
    }
}

/// Runtime API client.
#[derive(Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    client: Client<UnixConnector>,
}

impl DockerClient {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            client: Client::unix(),
        }
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Runtime version information.
    pub async fn version(&self) -> Result<Value, RuntimeError> {
        self.get_json(&endpoint(&["version"], &[])?).await
    }

    /// All containers, running or not, as the runtime lists them.
    pub async fn list_containers(&self) -> Result<Vec<Value>, RuntimeError> {
        self.get_json(&endpoint(&["containers", "json"], &[("all", "true")])?)
            .await
    }

    /// All containers carrying `label=value`.
    pub async fn list_containers_with_label(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<Value>, RuntimeError> {
        let filters = serde_json::json!({ "label": [format!("{label}={value}")] }).to_string();
        self.get_json(&endpoint(
            &["containers", "json"],
            &[("all", "true"), ("filters", &filters)],
        )?)
        .await
    }

    pub async fn inspect_container(&self, id: &str) -> Result<Value, RuntimeError> {
        self.get_json(&endpoint(&["containers", id, "json"], &[])?)
            .await
    }

    pub async fn container_action(
        &self,
        id: &str,
        action: ContainerAction,
    ) -> Result<(), RuntimeError> {
        self.send(
            Method::POST,
            &endpoint(&["containers", id, action.as_str()], &[])?,
        )
        .await
    }

    pub async fn remove_container(
        &self,
        id: &str,
        force: bool,
        volumes: bool,
    ) -> Result<(), RuntimeError> {
        let force = force.to_string();
        let volumes = volumes.to_string();
        self.send(
            Method::DELETE,
            &endpoint(&["containers", id], &[("force", &force), ("v", &volumes)])?,
        )
        .await
    }

    pub async fn list_images(&self) -> Result<Vec<Value>, RuntimeError> {
        self.get_json(&endpoint(&["images", "json"], &[])?).await
    }

    /// Image by id or reference. References may contain `/`, which the
    /// runtime expects unescaped.
    pub async fn inspect_image(&self, reference: &str) -> Result<Value, RuntimeError> {
        let mut segments = vec!["images"];
        segments.extend(reference.split('/').filter(|s| !s.is_empty()));
        segments.push("json");
        self.get_json(&endpoint(&segments, &[])?).await
    }

    pub async fn list_networks(&self) -> Result<Vec<Value>, RuntimeError> {
        self.get_json(&endpoint(&["networks"], &[])?).await
    }

    pub async fn list_volumes(&self) -> Result<Vec<Value>, RuntimeError> {
        let body: Value = self.get_json(&endpoint(&["volumes"], &[])?).await?;
        Ok(body
            .get("Volumes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn inspect_volume(&self, name: &str) -> Result<Value, RuntimeError> {
        self.get_json(&endpoint(&["volumes", name], &[])?).await
    }

    /// The last `tail` log lines of a container, stdout and stderr
    /// interleaved, each prefixed with its timestamp.
    pub async fn container_logs(&self, id: &str, tail: u32) -> Result<String, RuntimeError> {
        let tail = tail.to_string();
        let path = endpoint(
            &["containers", id, "logs"],
            &[
                ("stdout", "true"),
                ("stderr", "true"),
                ("timestamps", "true"),
                ("tail", &tail),
            ],
        )?;
        let body = hyper::body::to_bytes(self.get(&path).await?.into_body()).await?;
        Ok(decode_log_stream(&body))
    }

    /// A tar archive of `path` inside the container, streamed as the runtime
    /// produces it.
    pub async fn container_archive(&self, id: &str, path: &str) -> Result<Body, RuntimeError> {
        let path = endpoint(&["containers", id, "archive"], &[("path", path)])?;
        Ok(self.get(&path).await?.into_body())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let body = hyper::body::to_bytes(self.get(path).await?.into_body()).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET `path`, returning the response only if the runtime accepted it.
    async fn get(&self, path: &str) -> Result<Response<Body>, RuntimeError> {
        debug!(path = %path, "GET request to runtime API");

        let request = Request::builder()
            .method(Method::GET)
            .uri(Uri::new(&self.socket_path, path))
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = hyper::body::to_bytes(response.into_body()).await?;
        Err(api_error(status, &body))
    }

    async fn send(&self, method: Method, path: &str) -> Result<(), RuntimeError> {
        debug!(method = %method, path = %path, "Request to runtime API");

        let request = Request::builder()
            .method(method)
            .uri(Uri::new(&self.socket_path, path))
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();

        // 304: the container was already in the requested state.
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }

        let body = hyper::body::to_bytes(response.into_body()).await?;
        Err(api_error(status, &body))
    }
}

#[async_trait]
impl EventSource for DockerClient {
    async fn open(&self) -> Result<EventStream, UpstreamError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(Uri::new(&self.socket_path, "/events"))
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .unwrap_or_default();
            let message = error_message(&body);
            warn!(status = %status, message = %message, "Runtime refused event feed");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Box::pin(ndjson_events(response.into_body())))
    }
}

/// Build a request path with percent-encoded segments and query.
fn endpoint(segments: &[&str], query: &[(&str, &str)]) -> Result<String, RuntimeError> {
    let invalid = |detail: String| RuntimeError::Api {
        status: 400,
        message: detail,
    };

    let mut url = reqwest::Url::parse("http://runtime/").map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("runtime base url cannot carry a path".to_string()))?
        .clear()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    })
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    RuntimeError::Api {
        status: status.as_u16(),
        message: error_message(body),
    }
}

/// The runtime reports errors as `{"message": "..."}`.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

struct LineFeed<S> {
    body: S,
    buffer: Vec<u8>,
    done: bool,
}

/// Split a chunked body into newline-delimited JSON events.
///
/// A read error is yielded once and ends the stream.
pub(crate) fn ndjson_events<S, E>(
    body: S,
) -> impl Stream<Item = Result<EventEnvelope, UpstreamError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display,
{
    let feed = LineFeed {
        body,
        buffer: Vec::new(),
        done: false,
    };

    futures_util::stream::unfold(feed, |mut feed| async move {
        loop {
            if let Some(pos) = feed.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = feed.buffer.drain(..=pos).collect();
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                let item = EventEnvelope::from_slice(line).map_err(UpstreamError::from);
                return Some((item, feed));
            }

            if feed.done {
                return None;
            }

            match feed.body.next().await {
                Some(Ok(chunk)) => feed.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    feed.done = true;
                    feed.buffer.clear();
                    return Some((Err(UpstreamError::Read(e.to_string())), feed));
                }
                None => {
                    feed.done = true;
                    let rest = std::mem::take(&mut feed.buffer);
                    let rest = rest.trim_ascii();
                    if rest.is_empty() {
                        return None;
                    }
                    let item = EventEnvelope::from_slice(rest).map_err(UpstreamError::from);
                    return Some((item, feed));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        futures_util::stream::iter(
            parts
                .iter()
                .copied()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_ndjson_split_across_chunks() {
        let body = chunks(&[
            "{\"Type\":\"container\",\"Action\":\"st",
            "art\",\"Actor\":{\"ID\":\"a\"}}\n\n{\"Type\":\"network\",",
            "\"Action\":\"connect\",\"Actor\":{\"ID\":\"n\"}}\n",
        ]);

        let events: Vec<_> = ndjson_events(body).collect().await;
        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.event_type, "start");
        assert_eq!(first.actor_id, "a");
        assert_eq!(events[1].as_ref().unwrap().event_type, "connect");
    }

    #[tokio::test]
    async fn test_ndjson_trailing_line_without_newline() {
        let body = chunks(&["{\"Action\":\"die\",\"id\":\"c\"}"]);
        let events: Vec<_> = ndjson_events(body).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().event_type, "die");
    }

    #[tokio::test]
    async fn test_ndjson_read_error_ends_stream() {
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"Action\":\"start\",\"id\":\"a\"}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"{\"Action\":\"stop\",\"id\":\"a\"}\n")),
        ]);

        let events: Vec<_> = ndjson_events(body).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(UpstreamError::Read(_))));
    }

    #[tokio::test]
    async fn test_ndjson_garbage_is_decode_error() {
        let body = chunks(&["not json\n"]);
        let events: Vec<_> = ndjson_events(body).collect().await;
        assert!(matches!(events[0], Err(UpstreamError::Decode(_))));
    }

    #[rstest]
    #[case("start", ContainerAction::Start)]
    #[case("stop", ContainerAction::Stop)]
    #[case("restart", ContainerAction::Restart)]
    #[case("kill", ContainerAction::Kill)]
    #[case("pause", ContainerAction::Pause)]
    #[case("unpause", ContainerAction::Unpause)]
    fn test_action_parse(#[case] raw: &str, #[case] expected: ContainerAction) {
        assert_eq!(raw.parse::<ContainerAction>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn test_unknown_action() {
        assert!("exec".parse::<ContainerAction>().is_err());
    }

    #[test]
    fn test_endpoint_encoding() {
        assert_eq!(
            endpoint(&["containers", "json"], &[("all", "true")]).unwrap(),
            "/containers/json?all=true"
        );
        assert_eq!(
            endpoint(&["volumes", "a b"], &[]).unwrap(),
            "/volumes/a%20b"
        );
        let filtered = endpoint(&["containers", "json"], &[("filters", "{\"label\":[\"x=y\"]}")])
            .unwrap();
        assert!(filtered.starts_with("/containers/json?filters="));
        assert!(!filtered.contains('{'));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(br#"{"message":"No such container: abc"}"#),
            "No such container: abc"
        );
        assert_eq!(error_message(b"plain failure\n"), "plain failure");
    }
}
