//! Resource kinds and well-known actions.

use serde::{Deserialize, Serialize};

/// Well-known runtime action names.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const DIE: &str = "die";
    pub const DESTROY: &str = "destroy";
    pub const HEALTH_STATUS: &str = "health_status";

    // Emitted for every `exec` into a container, often several per second
    // under health checks.
    pub const EXEC_CREATE: &str = "exec_create";
    pub const EXEC_START: &str = "exec_start";
    pub const EXEC_DIE: &str = "exec_die";

    /// Actions ignored when no explicit ignore-set is configured.
    pub const DEFAULT_IGNORED: &[&str] = &[EXEC_CREATE, EXEC_START, EXEC_DIE];
}

/// The kind of runtime object an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Container,
    Image,
    Network,
    Volume,
    Daemon,
    Plugin,
    Service,
    Node,
    Secret,
    Config,
    #[default]
    #[serde(other)]
    Other,
}

impl ResourceKind {
    /// Maps the runtime's `Type` field onto a kind.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "container" => ResourceKind::Container,
            "image" => ResourceKind::Image,
            "network" => ResourceKind::Network,
            "volume" => ResourceKind::Volume,
            "daemon" => ResourceKind::Daemon,
            "plugin" => ResourceKind::Plugin,
            "service" => ResourceKind::Service,
            "node" => ResourceKind::Node,
            "secret" => ResourceKind::Secret,
            "config" => ResourceKind::Config,
            _ => ResourceKind::Other,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Container => "container",
            ResourceKind::Image => "image",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::Daemon => "daemon",
            ResourceKind::Plugin => "plugin",
            ResourceKind::Service => "service",
            ResourceKind::Node => "node",
            ResourceKind::Secret => "secret",
            ResourceKind::Config => "config",
            ResourceKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_wire() {
        assert_eq!(ResourceKind::from_wire("container"), ResourceKind::Container);
        assert_eq!(ResourceKind::from_wire("volume"), ResourceKind::Volume);
        assert_eq!(ResourceKind::from_wire("builder"), ResourceKind::Other);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ResourceKind::Network).unwrap(),
            "\"network\""
        );
        let other: ResourceKind = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(other, ResourceKind::Other);
    }
}
