//! Event envelope - the decoded form of one runtime notification.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventError, ResourceKind};

/// The actor block of a runtime event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawActor {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

/// Wire shape of a runtime event.
///
/// Older daemons only send `status`/`id`/`from`; newer ones send
/// `Type`/`Action`/`Actor` and may also send the legacy fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,

    #[serde(rename = "Action", default)]
    pub action: Option<String>,

    #[serde(rename = "Actor", default)]
    pub actor: Option<RawActor>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub time: Option<i64>,

    #[serde(rename = "timeNano", default)]
    pub time_nano: Option<i64>,
}

impl RawEvent {
    /// The action, falling back to the legacy `status` field.
    pub fn action(&self) -> Option<&str> {
        self.action
            .as_deref()
            .or(self.status.as_deref())
            .filter(|a| !a.is_empty())
    }

    /// The id of the object the event is about.
    pub fn actor_id(&self) -> &str {
        self.actor
            .as_ref()
            .map(|a| a.id.as_str())
            .filter(|id| !id.is_empty())
            .or(self.id.as_deref())
            .unwrap_or_default()
    }

    fn timestamp(&self) -> Result<DateTime<Utc>, EventError> {
        if let Some(nanos) = self.time_nano {
            return Ok(Utc.timestamp_nanos(nanos));
        }
        match self.time {
            Some(secs) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or(EventError::InvalidTimestamp(secs)),
            None => Ok(Utc::now()),
        }
    }
}

/// A decoded runtime event, ready for fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The action tag, e.g. `start` or `exec_start: sh`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// What kind of object the event is about.
    pub kind: ResourceKind,

    /// Id of that object (container id, image ref, network id...).
    pub actor_id: String,

    /// When the runtime recorded the event.
    pub timestamp: DateTime<Utc>,

    /// The event exactly as the runtime sent it.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Decodes one JSON value from the feed.
    pub fn from_value(payload: serde_json::Value) -> Result<Self, EventError> {
        if !payload.is_object() {
            return Err(EventError::Malformed("expected a JSON object".to_string()));
        }

        let raw = RawEvent::deserialize(&payload)?;
        let event_type = raw.action().ok_or(EventError::MissingAction)?.to_string();
        let kind = raw
            .kind
            .as_deref()
            .map(ResourceKind::from_wire)
            .unwrap_or(ResourceKind::Container);
        let actor_id = raw.actor_id().to_string();
        let timestamp = raw.timestamp()?;

        Ok(Self {
            event_type,
            kind,
            actor_id,
            timestamp,
            payload,
        })
    }

    /// Decodes one line of the newline-delimited feed.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// A runtime attribute of the actor, such as `name` or `image`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.payload
            .get("Actor")
            .and_then(|a| a.get("Attributes"))
            .and_then(|attrs| attrs.get(key))
            .and_then(|v| v.as_str())
    }
}
