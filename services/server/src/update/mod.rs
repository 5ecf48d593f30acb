//! Self-update control loop.
//!
//! On every tick the controller asks its [`RevisionSource`] for the remote
//! revision of the tracked branch and compares it with the local one. When
//! they differ it applies the remote revision and, on success, asks the
//! [`Restarter`] to bring the process back on the new code.
//!
//! A failed apply is rolled back to the revision held before the attempt.
//! If that also fails the controller marks itself broken: it stops
//! checking and never restarts into a half-updated tree.

mod git;
mod restart;

pub use git::{GitWorkingCopy, RevisionInfo};
pub use restart::{
    restart_process, ChannelRestarter, RestartMode, RestartRequest, Restarter, RESTART_EXIT_CODE,
};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Update settings, fixed at startup.
#[derive(Clone)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub repo_url: String,
    pub branch: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fallback remotes, tried in order after `repo_url`.
    pub mirrors: Vec<String>,
    pub ssl_no_verify: bool,
    pub interval: Duration,
    pub work_dir: PathBuf,
    /// Shell command run in `work_dir` after the tree is reset.
    pub post_update_cmd: Option<String>,
    pub restart_mode: RestartMode,
    /// Upper bound on the graceful drain before a restart.
    pub drain_timeout: Duration,
}

impl std::fmt::Debug for UpdateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateConfig")
            .field("enabled", &self.enabled)
            .field("repo_url", &self.repo_url)
            .field("branch", &self.branch)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("mirrors", &self.mirrors)
            .field("ssl_no_verify", &self.ssl_no_verify)
            .field("interval", &self.interval)
            .field("work_dir", &self.work_dir)
            .field("post_update_cmd", &self.post_update_cmd)
            .field("restart_mode", &self.restart_mode)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl UpdateConfig {
    /// Whether the loop should run at all.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.repo_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// Could not learn the remote revision. Retried next tick.
    #[error("update check failed: {0}")]
    Check(String),

    /// Could not bring the working copy to the new revision.
    #[error("update apply failed: {0}")]
    Apply(String),

    /// Could not return the working copy to the previous revision.
    #[error("rollback failed: {0}")]
    Rollback(String),
}

/// Where revisions come from and how the working copy moves between them.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Revision currently checked out, `None` for an empty working copy.
    async fn local_revision(&self) -> Result<Option<String>, UpdateError>;

    /// Latest revision of the tracked branch. Must not touch the checkout.
    async fn fetch_remote_revision(&self) -> Result<String, UpdateError>;

    /// Move the checkout to `revision`, all or nothing from the caller's view.
    async fn apply(&self, revision: &str) -> Result<(), UpdateError>;

    /// Move the checkout back to `revision` after a failed apply, redoing any
    /// post-update work so its effects match the restored tree.
    async fn rollback(&self, revision: &str) -> Result<(), UpdateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Applying,
    Restarting,
    /// Rollback failed; no further checks and no restart.
    Broken,
}

/// Process-wide update status. Only the controller writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateState {
    pub last_checked: Option<String>,
    pub last_applied: Option<String>,
    pub in_progress: bool,
    pub phase: UpdatePhase,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another cycle was running, or the controller is finished.
    Skipped,
    CheckFailed,
    UpToDate,
    Applied { revision: String },
    RolledBack,
    Broken,
}

/// Read-only view of the controller's state.
#[derive(Clone)]
pub struct UpdateStatus {
    rx: watch::Receiver<UpdateState>,
}

impl UpdateStatus {
    /// Status for a process without an update controller. Stays at the
    /// default state forever.
    pub fn disabled() -> Self {
        let (_, rx) = watch::channel(UpdateState::default());
        Self { rx }
    }

    pub fn snapshot(&self) -> UpdateState {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<UpdateState> {
        self.rx.clone()
    }
}

/// Clears the in-progress flag however the cycle ends.
struct CycleGuard<'a> {
    controller: &'a UpdateController,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.controller.in_progress.store(false, Ordering::Release);
        self.controller.state.send_modify(|s| s.in_progress = false);
    }
}

pub struct UpdateController {
    source: Arc<dyn RevisionSource>,
    restarter: Arc<dyn Restarter>,
    interval: Duration,
    in_progress: AtomicBool,
    state: watch::Sender<UpdateState>,
}

impl UpdateController {
    pub fn new(
        source: Arc<dyn RevisionSource>,
        restarter: Arc<dyn Restarter>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(UpdateState::default());
        Self {
            source,
            restarter,
            interval,
            in_progress: AtomicBool::new(false),
            state,
        }
    }

    pub fn status(&self) -> UpdateStatus {
        UpdateStatus {
            rx: self.state.subscribe(),
        }
    }

    /// Tick on the configured interval until shutdown, a restart request,
    /// or a failed rollback.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting update controller");

        if let Ok(Some(revision)) = self.source.local_revision().await {
            info!(revision = %revision, "Running from revision");
            self.state
                .send_modify(|s| s.last_applied = Some(revision.clone()));
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        TickOutcome::Applied { .. } => {
                            info!("Update applied, controller stopping");
                            break;
                        }
                        TickOutcome::Broken => {
                            error!("Update controller halted after failed rollback");
                            break;
                        }
                        _ => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Update controller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one check/apply cycle unless one is already running.
    pub async fn tick(&self) -> TickOutcome {
        let phase = self.state.borrow().phase;
        if matches!(phase, UpdatePhase::Restarting | UpdatePhase::Broken) {
            debug!(phase = ?phase, "Update controller finished, tick skipped");
            return TickOutcome::Skipped;
        }

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Update cycle already in progress, tick skipped");
            return TickOutcome::Skipped;
        }
        let _guard = CycleGuard { controller: self };

        self.state.send_modify(|s| {
            s.in_progress = true;
            s.phase = UpdatePhase::Checking;
        });

        self.cycle().await
    }

    async fn cycle(&self) -> TickOutcome {
        let checked = async {
            let local = self.source.local_revision().await?;
            let remote = self.source.fetch_remote_revision().await?;
            Ok::<_, UpdateError>((local, remote))
        }
        .await;

        let (local, remote) = match checked {
            Ok(revisions) => revisions,
            Err(e) => {
                warn!(error = %e, "Update check failed");
                self.state.send_modify(|s| {
                    s.phase = UpdatePhase::Idle;
                    s.last_checked_at = Some(Utc::now());
                    s.last_error = Some(e.to_string());
                });
                return TickOutcome::CheckFailed;
            }
        };

        self.state.send_modify(|s| {
            s.last_checked = Some(remote.clone());
            s.last_checked_at = Some(Utc::now());
            if s.last_applied.is_none() {
                s.last_applied = local.clone();
            }
        });

        if local.as_deref() == Some(remote.as_str()) {
            debug!(revision = %remote, "Up to date");
            self.state.send_modify(|s| {
                s.phase = UpdatePhase::Idle;
                s.last_error = None;
            });
            return TickOutcome::UpToDate;
        }

        info!(
            from = local.as_deref().unwrap_or("none"),
            to = %remote,
            "Update available, applying"
        );
        self.state.send_modify(|s| s.phase = UpdatePhase::Applying);

        match self.source.apply(&remote).await {
            Ok(()) => {
                info!(revision = %remote, "Update applied");
                self.state.send_modify(|s| {
                    s.phase = UpdatePhase::Restarting;
                    s.last_applied = Some(remote.clone());
                    s.last_error = None;
                });
                self.restarter.restart(RestartRequest {
                    revision: remote.clone(),
                });
                TickOutcome::Applied { revision: remote }
            }
            Err(apply_err) => {
                error!(error = %apply_err, revision = %remote, "Update apply failed, rolling back");
                self.roll_back(local.as_deref(), apply_err).await
            }
        }
    }

    async fn roll_back(&self, previous: Option<&str>, apply_err: UpdateError) -> TickOutcome {
        let result = match previous {
            Some(previous) => self.source.rollback(previous).await,
            None => Err(UpdateError::Rollback(
                "no previous revision to return to".to_string(),
            )),
        };

        match result {
            Ok(()) => {
                info!(revision = previous.unwrap_or_default(), "Rolled back");
                self.state.send_modify(|s| {
                    s.phase = UpdatePhase::Idle;
                    s.last_error = Some(apply_err.to_string());
                });
                TickOutcome::RolledBack
            }
            Err(rollback_err) => {
                error!(error = %rollback_err, "Rollback failed, refusing to restart");
                self.state.send_modify(|s| {
                    s.phase = UpdatePhase::Broken;
                    s.last_error = Some(format!("{apply_err}; {rollback_err}"));
                });
                TickOutcome::Broken
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-memory working copy with scriptable failures.
    struct FakeSource {
        local: Mutex<Option<String>>,
        remote: Mutex<Result<String, UpdateError>>,
        fail_apply: AtomicBool,
        fail_rollback: AtomicBool,
        applies: Mutex<Vec<String>>,
        apply_delay: Option<Duration>,
    }

    impl FakeSource {
        fn at(local: &str, remote: &str) -> Self {
            Self {
                local: Mutex::new(Some(local.to_string())),
                remote: Mutex::new(Ok(remote.to_string())),
                fail_apply: AtomicBool::new(false),
                fail_rollback: AtomicBool::new(false),
                applies: Mutex::new(Vec::new()),
                apply_delay: None,
            }
        }

        fn local(&self) -> Option<String> {
            self.local.lock().unwrap().clone()
        }

        fn applies(&self) -> Vec<String> {
            self.applies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RevisionSource for FakeSource {
        async fn local_revision(&self) -> Result<Option<String>, UpdateError> {
            Ok(self.local())
        }

        async fn fetch_remote_revision(&self) -> Result<String, UpdateError> {
            self.remote.lock().unwrap().clone()
        }

        async fn apply(&self, revision: &str) -> Result<(), UpdateError> {
            self.applies.lock().unwrap().push(revision.to_string());
            if let Some(delay) = self.apply_delay {
                tokio::time::sleep(delay).await;
            }
            // Half-applied tree before the failure point.
            *self.local.lock().unwrap() = Some(format!("{revision}-partial"));
            if self.fail_apply.load(Ordering::SeqCst) {
                return Err(UpdateError::Apply("post-update command exited 1".into()));
            }
            *self.local.lock().unwrap() = Some(revision.to_string());
            Ok(())
        }

        async fn rollback(&self, revision: &str) -> Result<(), UpdateError> {
            if self.fail_rollback.load(Ordering::SeqCst) {
                return Err(UpdateError::Rollback("reset failed".into()));
            }
            *self.local.lock().unwrap() = Some(revision.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRestarter {
        requests: Mutex<Vec<RestartRequest>>,
    }

    impl Restarter for RecordingRestarter {
        fn restart(&self, request: RestartRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    fn controller(
        source: Arc<FakeSource>,
    ) -> (UpdateController, Arc<RecordingRestarter>) {
        let restarter = Arc::new(RecordingRestarter::default());
        let controller =
            UpdateController::new(source, restarter.clone(), Duration::from_secs(60));
        (controller, restarter)
    }

    #[tokio::test]
    async fn test_equal_revisions_never_apply() {
        let source = Arc::new(FakeSource::at("aaa", "aaa"));
        let (controller, restarter) = controller(source.clone());

        assert_eq!(controller.tick().await, TickOutcome::UpToDate);
        assert_eq!(controller.tick().await, TickOutcome::UpToDate);

        assert!(source.applies().is_empty());
        assert!(restarter.requests.lock().unwrap().is_empty());
        let state = controller.status().snapshot();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert_eq!(state.last_checked.as_deref(), Some("aaa"));
        assert_eq!(state.last_applied.as_deref(), Some("aaa"));
        assert!(!state.in_progress);
    }

    #[tokio::test]
    async fn test_new_revision_applied_then_restart() {
        let source = Arc::new(FakeSource::at("aaa", "bbb"));
        let (controller, restarter) = controller(source.clone());

        assert_eq!(
            controller.tick().await,
            TickOutcome::Applied {
                revision: "bbb".into()
            }
        );
        assert_eq!(source.local().as_deref(), Some("bbb"));
        assert_eq!(
            restarter.requests.lock().unwrap().as_slice(),
            &[RestartRequest {
                revision: "bbb".into()
            }]
        );

        let state = controller.status().snapshot();
        assert_eq!(state.phase, UpdatePhase::Restarting);
        assert_eq!(state.last_applied.as_deref(), Some("bbb"));

        // Waiting for the restart; no more cycles.
        assert_eq!(controller.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_failed_apply_restores_previous_revision() {
        let source = Arc::new(FakeSource::at("aaa", "bbb"));
        source.fail_apply.store(true, Ordering::SeqCst);
        let (controller, restarter) = controller(source.clone());

        let before = source.local();
        assert_eq!(controller.tick().await, TickOutcome::RolledBack);
        assert_eq!(source.local(), before);

        assert!(restarter.requests.lock().unwrap().is_empty());
        let state = controller.status().snapshot();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert_eq!(state.last_applied.as_deref(), Some("aaa"));
        assert!(state.last_error.unwrap().contains("apply failed"));

        // Still retries on later ticks.
        source.fail_apply.store(false, Ordering::SeqCst);
        assert!(matches!(controller.tick().await, TickOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn test_failed_rollback_halts_without_restart() {
        let source = Arc::new(FakeSource::at("aaa", "bbb"));
        source.fail_apply.store(true, Ordering::SeqCst);
        source.fail_rollback.store(true, Ordering::SeqCst);
        let (controller, restarter) = controller(source.clone());

        assert_eq!(controller.tick().await, TickOutcome::Broken);
        assert!(restarter.requests.lock().unwrap().is_empty());
        assert_eq!(controller.status().snapshot().phase, UpdatePhase::Broken);
        assert_eq!(controller.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_check_failure_is_not_fatal() {
        let source = Arc::new(FakeSource::at("aaa", "aaa"));
        *source.remote.lock().unwrap() = Err(UpdateError::Check("network unreachable".into()));
        let (controller, _) = controller(source.clone());

        assert_eq!(controller.tick().await, TickOutcome::CheckFailed);
        let state = controller.status().snapshot();
        assert_eq!(state.phase, UpdatePhase::Idle);
        assert!(state.last_checked_at.is_some());
        assert!(state.last_error.is_some());

        *source.remote.lock().unwrap() = Ok("aaa".into());
        assert_eq!(controller.tick().await, TickOutcome::UpToDate);
        assert!(controller.status().snapshot().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_run_one_cycle() {
        let source = Arc::new(FakeSource {
            apply_delay: Some(Duration::from_secs(5)),
            ..FakeSource::at("aaa", "bbb")
        });
        let (controller, _) = controller(source.clone());

        let (first, second, third) =
            tokio::join!(controller.tick(), controller.tick(), controller.tick());

        let outcomes = [first, second, third];
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, TickOutcome::Applied { .. }))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| **o == TickOutcome::Skipped)
            .count();
        assert_eq!(applied, 1);
        assert_eq!(skipped, 2);
        assert_eq!(source.applies(), vec!["bbb".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_apply() {
        let source = Arc::new(FakeSource::at("aaa", "bbb"));
        let (controller, restarter) = controller(source);
        let (_stop_tx, stop_rx) = watch::channel(false);

        tokio::time::timeout(Duration::from_secs(120), controller.run(stop_rx))
            .await
            .expect("run returns after applying");
        assert_eq!(restarter.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(FakeSource::at("aaa", "aaa"));
        let (controller, _) = controller(source);
        let (stop_tx, stop_rx) = watch::channel(false);

        let stopper = async {
            tokio::time::sleep(Duration::from_secs(150)).await;
            stop_tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(300), async {
            tokio::join!(controller.run(stop_rx), stopper)
        })
        .await
        .expect("run returns on shutdown");
    }
}
