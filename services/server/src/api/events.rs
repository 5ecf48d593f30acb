//! Live runtime events, over a WebSocket or as newline-delimited JSON.
//!
//! Each connection owns one hub subscription. Closing the connection drops
//! the subscription, which unsubscribes it.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::CONTENT_TYPE, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::api::extract::ApiKeyAuth;
use crate::hub::Subscription;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/events", get(events_ws))
        .route("/events/stream", get(events_ndjson))
}

/// GET /ws/events
async fn events_ws(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let subscription = state.hub().subscribe();
    info!(
        subscriber_id = %subscription.id(),
        key_id = %auth.key_id,
        "Event WebSocket subscribed"
    );
    ws.on_upgrade(move |socket| forward_events(socket, subscription))
}

async fn forward_events(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let subscriber_id = subscription.id().clone();

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else {
                    debug!(subscriber_id = %subscriber_id, "Subscription ended, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&*event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, subscriber_id = %subscriber_id, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text.into())).await {
                    debug!(error = %e, subscriber_id = %subscriber_id, "Client went away");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, subscriber_id = %subscriber_id, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    info!(
        subscriber_id = %subscriber_id,
        dropped = subscription.dropped(),
        "Event WebSocket closed"
    );
}

/// GET /events/stream
async fn events_ndjson(State(state): State<AppState>, auth: ApiKeyAuth) -> Response {
    let subscription = state.hub().subscribe();
    info!(
        subscriber_id = %subscription.id(),
        key_id = %auth.key_id,
        "Event stream subscribed"
    );

    let stream = subscription.into_stream().filter_map(|event| async move {
        match serde_json::to_string(&*event) {
            Ok(line) => Some(Ok::<Bytes, Infallible>(Bytes::from(format!("{line}\n")))),
            Err(e) => {
                warn!(error = %e, "Failed to encode event");
                None
            }
        }
    });

    let mut response = Body::from_stream(stream).into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    response
}
