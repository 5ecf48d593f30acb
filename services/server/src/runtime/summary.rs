//! Compact container listings.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

/// Label the compose tool puts on every container of a project.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label swarm puts on containers of a stack.
pub const SWARM_STACK_LABEL: &str = "com.docker.stack.namespace";

/// One line of a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub stack: String,
    pub image: String,
    pub ports: String,
    /// True for the container this service runs in.
    pub is_self: bool,
}

impl ContainerSummary {
    /// Build from one entry of the runtime's container list.
    pub fn from_list_entry(entry: &Value, self_id: Option<&str>) -> Self {
        let id = str_field(entry, "Id").to_string();
        let name = entry
            .get("Names")
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let stack = stack_label(entry).unwrap_or_default().to_string();

        let ports = entry
            .get("Ports")
            .and_then(Value::as_array)
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|p| {
                        let public = p.get("PublicPort")?.as_u64()?;
                        let private = p.get("PrivatePort")?.as_u64()?;
                        let proto = p.get("Type").and_then(Value::as_str).unwrap_or("tcp");
                        Some(format!("{public}->{private}/{proto}"))
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        let is_self = self_id.is_some_and(|me| ids_match(&id, me));

        Self {
            name,
            status: str_field(entry, "State").to_lowercase(),
            stack,
            image: str_field(entry, "Image").to_string(),
            ports,
            is_self,
            id,
        }
    }
}

/// Stack names of a container list, sorted and deduplicated.
pub fn stack_names(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(stack_label)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Compose project, or swarm stack when there is none.
fn stack_label(entry: &Value) -> Option<&str> {
    let labels = entry.get("Labels")?;
    [COMPOSE_PROJECT_LABEL, SWARM_STACK_LABEL]
        .iter()
        .filter_map(|label| labels.get(*label).and_then(Value::as_str))
        .find(|value| !value.is_empty())
}

/// Full id of the listed container that `id` names, by full or short id.
pub fn find_container_id<'a>(entries: &'a [Value], id: &str) -> Option<&'a str> {
    entries
        .iter()
        .map(|entry| str_field(entry, "Id"))
        .find(|full| ids_match(full, id))
}

/// Id of the container this process runs in, if it runs in one.
///
/// Read from the cgroup path first; the hostname (the short id by default)
/// is the fallback.
pub fn self_container_id() -> Option<String> {
    if let Ok(cgroup) = std::fs::read_to_string("/proc/self/cgroup") {
        if let Some(id) = container_id_from_cgroup(&cgroup) {
            return Some(id);
        }
    }

    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn container_id_from_cgroup(cgroup: &str) -> Option<String> {
    cgroup
        .lines()
        .filter(|line| line.contains("docker"))
        .filter_map(|line| line.rsplit(':').next())
        .filter_map(|path| path.trim().rsplit('/').next())
        .map(|segment| {
            segment
                .trim_start_matches("docker-")
                .trim_end_matches(".scope")
                .to_string()
        })
        .find(|id| !id.is_empty())
}

/// Full and short ids refer to the same container when one prefixes the other.
fn ids_match(container_id: &str, self_id: &str) -> bool {
    !container_id.is_empty()
        && !self_id.is_empty()
        && (container_id.starts_with(self_id) || self_id.starts_with(container_id))
}

fn str_field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> Value {
        json!({
            "Id": "3f2a9c0d1e2f",
            "Names": ["/web-1"],
            "Image": "nginx:1.27",
            "State": "Running",
            "Labels": { COMPOSE_PROJECT_LABEL: "shop" },
            "Ports": [
                { "PrivatePort": 80, "PublicPort": 8080, "Type": "tcp" },
                { "PrivatePort": 443, "Type": "tcp" }
            ]
        })
    }

    #[test]
    fn test_summary_fields() {
        let summary = ContainerSummary::from_list_entry(&entry(), None);
        assert_eq!(summary.name, "web-1");
        assert_eq!(summary.status, "running");
        assert_eq!(summary.stack, "shop");
        assert_eq!(summary.ports, "8080->80/tcp");
        assert!(!summary.is_self);
    }

    #[test]
    fn test_is_self_by_short_id() {
        let summary = ContainerSummary::from_list_entry(&entry(), Some("3f2a9c"));
        assert!(summary.is_self);
        let other = ContainerSummary::from_list_entry(&entry(), Some("ffff"));
        assert!(!other.is_self);
    }

    #[test]
    fn test_stack_names_sorted_unique() {
        let entries = vec![
            json!({"Labels": {COMPOSE_PROJECT_LABEL: "b"}}),
            json!({"Labels": {COMPOSE_PROJECT_LABEL: "a"}}),
            json!({"Labels": {COMPOSE_PROJECT_LABEL: "b"}}),
            json!({"Labels": {}}),
            json!({"Labels": {SWARM_STACK_LABEL: "c"}}),
            json!({"Labels": null}),
        ];
        assert_eq!(stack_names(&entries), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_find_container_by_short_id() {
        let entries = vec![
            json!({"Id": "aaaa1111bbbb2222"}),
            entry(),
            json!({"Names": ["/no-id"]}),
        ];
        assert_eq!(find_container_id(&entries, "3f2a9c"), Some("3f2a9c0d1e2f"));
        assert_eq!(find_container_id(&entries, "aaaa1111bbbb2222"), Some("aaaa1111bbbb2222"));
        assert_eq!(find_container_id(&entries, "cccc"), None);
        assert_eq!(find_container_id(&entries, ""), None);
    }

    #[test]
    fn test_cgroup_v1_and_systemd_paths() {
        let v1 = "12:pids:/docker/3f2a9c0d1e2f\n0::/\n";
        assert_eq!(container_id_from_cgroup(v1).as_deref(), Some("3f2a9c0d1e2f"));

        let systemd = "0::/system.slice/docker-abc123.scope\n";
        assert_eq!(container_id_from_cgroup(systemd).as_deref(), Some("abc123"));

        assert_eq!(container_id_from_cgroup("0::/\n"), None);
    }
}
