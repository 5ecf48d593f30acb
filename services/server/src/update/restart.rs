//! Process restart after an update.
//!
//! The controller only asks for a restart. `main` owns the actual exit so it
//! can drain the HTTP server and stop workers first.

use std::convert::Infallible;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Exit status telling the supervisor to start the service again.
pub const RESTART_EXIT_CODE: i32 = 75;

/// How the process comes back after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Exit with [`RESTART_EXIT_CODE`] and let the supervisor restart us.
    Exit,
    /// Replace the process image with the current executable.
    Exec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    /// Revision the working copy now holds.
    pub revision: String,
}

/// Receives restart requests from the update controller.
pub trait Restarter: Send + Sync {
    fn restart(&self, request: RestartRequest);
}

/// Forwards restart requests to whoever holds the receiver.
#[derive(Clone)]
pub struct ChannelRestarter {
    tx: mpsc::UnboundedSender<RestartRequest>,
}

impl ChannelRestarter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RestartRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Restarter for ChannelRestarter {
    fn restart(&self, request: RestartRequest) {
        info!(revision = %request.revision, "Restart requested");
        if self.tx.send(request).is_err() {
            warn!("Restart request dropped, nobody is listening");
        }
    }
}

/// Leave the current process according to `mode`. Only returns on failure.
pub fn restart_process(mode: RestartMode) -> std::io::Result<Infallible> {
    match mode {
        RestartMode::Exit => {
            info!(code = RESTART_EXIT_CODE, "Exiting for restart");
            std::process::exit(RESTART_EXIT_CODE)
        }
        RestartMode::Exec => exec_self(),
    }
}

#[cfg(unix)]
fn exec_self() -> std::io::Result<Infallible> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    info!(exe = %exe.display(), "Re-executing");
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err)
}

#[cfg(not(unix))]
fn exec_self() -> std::io::Result<Infallible> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "exec restart is only available on unix",
    ))
}
