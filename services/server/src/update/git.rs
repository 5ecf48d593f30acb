//! Git working copy driven through the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{RevisionSource, UpdateConfig, UpdateError};

/// Upper bound for a single git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// A remote as git sees it and as logs may show it.
#[derive(Clone)]
struct Remote {
    url: String,
    display: String,
}

/// Commit checked out in the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionInfo {
    pub branch: String,
    pub commit_hash: String,
    pub short_hash: String,
    pub commit_message: String,
    pub author: String,
    pub date: String,
}

#[derive(Clone)]
pub struct GitWorkingCopy {
    work_dir: PathBuf,
    branch: String,
    remotes: Vec<Remote>,
    ssl_no_verify: bool,
    post_update_cmd: Option<String>,
}

impl GitWorkingCopy {
    pub fn new(config: &UpdateConfig) -> Self {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        };

        let remotes = std::iter::once(&config.repo_url)
            .chain(config.mirrors.iter())
            .filter(|url| !url.trim().is_empty())
            .map(|url| Remote {
                url: authenticated_url(url, credentials),
                display: redact_url(url),
            })
            .collect();

        Self {
            work_dir: config.work_dir.clone(),
            branch: config.branch.clone(),
            remotes,
            ssl_no_verify: config.ssl_no_verify,
            post_update_cmd: config.post_update_cmd.clone(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }

    /// Describe HEAD. `None` when the directory is not a repository or has
    /// no commits yet.
    pub async fn describe(&self) -> Result<Option<RevisionInfo>, UpdateError> {
        if !self.is_repository() {
            return Ok(None);
        }
        let Some(commit_hash) = self.head().await else {
            return Ok(None);
        };

        let log = self
            .git(&["log", "-1", "--format=%s%x00%an%x00%cI", "HEAD"])
            .await
            .map_err(UpdateError::Check)?;
        let mut fields = log.splitn(3, '\0');
        let commit_message = fields.next().unwrap_or_default().trim().to_string();
        let author = fields.next().unwrap_or_default().to_string();
        let date = fields.next().unwrap_or_default().trim().to_string();

        let branch = match self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Ok(name) if name != "HEAD" => name,
            _ => "detached".to_string(),
        };

        Ok(Some(RevisionInfo {
            branch,
            short_hash: commit_hash.chars().take(7).collect(),
            commit_hash,
            commit_message,
            author,
            date,
        }))
    }

    fn is_repository(&self) -> bool {
        self.work_dir.join(".git").exists()
    }

    async fn ensure_repository(&self) -> Result<(), String> {
        if self.is_repository() {
            return Ok(());
        }
        info!(work_dir = %self.work_dir.display(), "Initializing git working copy");
        self.git(&["init", "--quiet"]).await.map(|_| ())
    }

    async fn head(&self) -> Option<String> {
        self.git(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .ok()
            .filter(|rev| !rev.is_empty())
    }

    async fn reset_hard(&self, revision: &str) -> Result<(), String> {
        self.git(&["reset", "--hard", "--quiet", revision])
            .await
            .map(|_| ())
    }

    async fn run_post_update(&self) -> Result<(), String> {
        let Some(cmd) = &self.post_update_cmd else {
            return Ok(());
        };
        info!(command = %cmd, "Running post-update command");

        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd).current_dir(&self.work_dir);
        let output = run(command).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "post-update command exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }

    /// Run git in the working copy and return trimmed stdout.
    async fn git(&self, args: &[&str]) -> Result<String, String> {
        let mut command = Command::new("git");
        if self.ssl_no_verify {
            command.args(["-c", "http.sslVerify=false"]);
        }
        command
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run(command).await.map_err(|e| self.redact(&e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let shown: Vec<String> = args.iter().map(|a| self.redact(a)).collect();
            return Err(self.redact(&format!(
                "git {} failed: {}",
                shown.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Replace every credential-bearing URL with its display form.
    fn redact(&self, text: &str) -> String {
        self.remotes
            .iter()
            .fold(text.to_string(), |acc, r| acc.replace(&r.url, &r.display))
    }
}

#[async_trait]
impl RevisionSource for GitWorkingCopy {
    async fn local_revision(&self) -> Result<Option<String>, UpdateError> {
        if !self.is_repository() {
            return Ok(None);
        }
        Ok(self.head().await)
    }

    async fn fetch_remote_revision(&self) -> Result<String, UpdateError> {
        if self.remotes.is_empty() {
            return Err(UpdateError::Check("no remote configured".to_string()));
        }
        self.ensure_repository().await.map_err(UpdateError::Check)?;

        let refspec = format!("+refs/heads/{}:{}", self.branch, self.remote_ref());
        let mut failures = Vec::new();

        for remote in &self.remotes {
            debug!(remote = %remote.display, branch = %self.branch, "Fetching");
            match self
                .git(&["fetch", "--quiet", "--no-tags", &remote.url, &refspec])
                .await
            {
                Ok(_) => {
                    let revision = self
                        .git(&["rev-parse", "--verify", &self.remote_ref()])
                        .await
                        .map_err(UpdateError::Check)?;
                    return Ok(revision);
                }
                Err(e) => {
                    warn!(remote = %remote.display, error = %e, "Fetch failed, trying next remote");
                    failures.push(e);
                }
            }
        }

        Err(UpdateError::Check(failures.join("; ")))
    }

    async fn apply(&self, revision: &str) -> Result<(), UpdateError> {
        self.reset_hard(revision).await.map_err(UpdateError::Apply)?;
        self.run_post_update().await.map_err(UpdateError::Apply)
    }

    /// The post-update command runs again so whatever it built or deployed
    /// from the failed revision is replaced by the restored tree's output.
    async fn rollback(&self, revision: &str) -> Result<(), UpdateError> {
        self.reset_hard(revision)
            .await
            .map_err(UpdateError::Rollback)?;
        self.run_post_update().await.map_err(UpdateError::Rollback)
    }
}

async fn run(mut command: Command) -> Result<std::process::Output, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(GIT_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("failed to spawn command: {e}")),
        Err(_) => Err(format!("command timed out after {}s", GIT_TIMEOUT.as_secs())),
    }
}

/// Embed percent-encoded credentials into an http(s) remote URL. Other
/// remotes are returned as given.
fn authenticated_url(url: &str, credentials: Option<(&str, &str)>) -> String {
    let Some((user, pass)) = credentials else {
        return url.to_string();
    };
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return url.to_string();
    }
    if parsed.set_username(user).is_err() || parsed.set_password(Some(pass)).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

/// Strip any userinfo from a URL for display.
fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    if parsed.username().is_empty() && parsed.password().is_none() {
        return url.to_string();
    }
    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.to_string()
}
