//! Application state shared across request handlers.

use std::path::Path;
use std::sync::Arc;

use crate::auth::{AdminCredential, AuthGate};
use crate::db::Database;
use crate::hub::HubHandle;
use crate::runtime::{DockerClient, RuntimeConfig};
use crate::update::{GitWorkingCopy, UpdateStatus};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    gate: AuthGate,
    hub: HubHandle,
    docker: DockerClient,
    runtime: RuntimeConfig,
    updates: UpdateStatus,
    working_copy: GitWorkingCopy,
}

impl AppState {
    pub fn new(
        db: Database,
        admin: AdminCredential,
        hub: HubHandle,
        runtime: RuntimeConfig,
        updates: UpdateStatus,
        working_copy: GitWorkingCopy,
    ) -> Self {
        let gate = AuthGate::new(db.keys(), admin);
        let docker = DockerClient::new(&runtime.socket_path);
        Self {
            inner: Arc::new(AppStateInner {
                db,
                gate,
                hub,
                docker,
                runtime,
                updates,
                working_copy,
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn gate(&self) -> &AuthGate {
        &self.inner.gate
    }

    pub fn hub(&self) -> &HubHandle {
        &self.inner.hub
    }

    pub fn docker(&self) -> &DockerClient {
        &self.inner.docker
    }

    /// Host filesystem mount used for file browsing.
    pub fn host_root(&self) -> &Path {
        &self.inner.runtime.host_root
    }

    pub fn updates(&self) -> &UpdateStatus {
        &self.inner.updates
    }

    pub fn working_copy(&self) -> &GitWorkingCopy {
        &self.inner.working_copy
    }

    /// Id of the container hosting this process, if any.
    pub fn self_id(&self) -> Option<&str> {
        self.inner.runtime.self_id.as_deref()
    }
}
