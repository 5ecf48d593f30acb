//! Process configuration, read once from the environment at startup.
//!
//! Each subsystem gets its own section, handed to its constructor. Nothing
//! reads the environment after `Config::from_env` returns.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::auth::AdminCredential;
use crate::db::DbConfig;
use crate::hub::{BackoffPolicy, HubConfig};
use crate::runtime::{self_container_id, RuntimeConfig};
use crate::update::{RestartMode, UpdateConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub database: DbConfig,
    pub admin: AdminCredential,
    pub hub: HubConfig,
    pub runtime: RuntimeConfig,
    pub update: UpdateConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or("DOCKWARD_LISTEN_ADDR", "0.0.0.0:8000")
            .parse()
            .context("DOCKWARD_LISTEN_ADDR is not a socket address")?;

        let log_level = env_or("DOCKWARD_LOG_LEVEL", "info");

        let admin = AdminCredential::new(
            env_or("ADMIN_USER", "admin"),
            env_or("ADMIN_PASSWORD", "password"),
        );

        Ok(Self {
            listen_addr,
            log_level,
            database: DbConfig::from_env(),
            admin,
            hub: hub_from_env(),
            runtime: runtime_from_env(),
            update: update_from_env()?,
        })
    }
}

fn hub_from_env() -> HubConfig {
    let defaults = HubConfig::default();
    let backoff = BackoffPolicy {
        initial: Duration::from_millis(env_parse(
            "DOCKWARD_BACKOFF_INITIAL_MS",
            defaults.backoff.initial.as_millis() as u64,
        )),
        max: Duration::from_millis(env_parse(
            "DOCKWARD_BACKOFF_MAX_MS",
            defaults.backoff.max.as_millis() as u64,
        )),
        multiplier: env_parse("DOCKWARD_BACKOFF_MULTIPLIER", defaults.backoff.multiplier),
    };

    HubConfig {
        ignored: match std::env::var("IGNORED_EVENTS") {
            Ok(csv) => dockward_events::IgnoreSet::from_csv(&csv),
            Err(_) => defaults.ignored,
        },
        queue_capacity: env_parse("DOCKWARD_SUBSCRIBER_QUEUE", defaults.queue_capacity).max(1),
        backoff,
    }
}

fn runtime_from_env() -> RuntimeConfig {
    RuntimeConfig {
        socket_path: PathBuf::from(env_or("DOCKER_SOCKET", "/var/run/docker.sock")),
        host_root: PathBuf::from(env_or("HOST_FILESYSTEM_ROOT", "/hostfs")),
        self_id: non_empty(std::env::var("DOCKWARD_SELF_ID").ok()).or_else(self_container_id),
    }
}

fn update_from_env() -> Result<UpdateConfig> {
    let work_dir = match std::env::var("GIT_WORK_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::current_dir().context("cannot resolve current directory")?,
    };

    let restart_mode = match env_or("DOCKWARD_RESTART_MODE", "exit").as_str() {
        "exec" => RestartMode::Exec,
        _ => RestartMode::Exit,
    };

    Ok(UpdateConfig {
        enabled: env_bool("GIT_AUTO_UPDATE"),
        repo_url: env_or("GIT_REPO_URL", ""),
        branch: env_or("GIT_BRANCH", "main"),
        username: non_empty(std::env::var("GIT_USER").ok()),
        password: non_empty(std::env::var("GIT_PASSWORD").ok()),
        mirrors: env_or("GIT_MIRROR_URLS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        ssl_no_verify: env_bool("GIT_SSL_NO_VERIFY"),
        interval: Duration::from_secs(env_parse("GIT_CHECK_INTERVAL", 60u64).max(1)),
        work_dir,
        post_update_cmd: non_empty(std::env::var("DOCKWARD_POST_UPDATE_CMD").ok()),
        restart_mode,
        drain_timeout: Duration::from_secs(env_parse("DOCKWARD_DRAIN_TIMEOUT_SECS", 10u64)),
    })
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(Some("x".into())), Some("x".to_string()));
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("DOCKWARD_TEST_PARSE_GARBAGE", "sixty");
        assert_eq!(env_parse("DOCKWARD_TEST_PARSE_GARBAGE", 60u64), 60);
        std::env::set_var("DOCKWARD_TEST_PARSE_GARBAGE", " 15 ");
        assert_eq!(env_parse("DOCKWARD_TEST_PARSE_GARBAGE", 60u64), 15);
        std::env::remove_var("DOCKWARD_TEST_PARSE_GARBAGE");
    }
}
