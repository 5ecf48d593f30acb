//! Container runtime access.
//!
//! The runtime's own HTTP API is reached over its Unix socket. Most calls are
//! plain pass-through; this module adds the event feed used by the hub,
//! container summaries, log decoding and host-side access to mounted paths.

mod client;
mod files;
mod logs;
mod summary;

pub use client::{ContainerAction, DockerClient};
pub use files::{
    list_dir, locate_download, resolve_container_path, resolve_volume_path, BrowseError,
    DownloadSource, FileEntry, FileKind, MountPoint,
};
pub use logs::decode_log_stream;
pub use summary::{
    find_container_id, self_container_id, stack_names, ContainerSummary, COMPOSE_PROJECT_LABEL,
    SWARM_STACK_LABEL,
};

use std::path::PathBuf;

use thiserror::Error;

/// Runtime connection settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Unix socket of the runtime API.
    pub socket_path: PathBuf,

    /// Where the host's root filesystem is mounted inside this process's view.
    pub host_root: PathBuf,

    /// Id of the container hosting this process, if any.
    pub self_id: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            host_root: PathBuf::from("/hostfs"),
            self_id: None,
        }
    }
}

/// Errors from runtime API calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime connection failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid runtime request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("invalid runtime response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("runtime returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl RuntimeError {
    /// Status reported by the runtime, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RuntimeError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
