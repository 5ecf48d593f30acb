//! Host-side browsing of container mounts and volumes.
//!
//! Paths are resolved lexically under the host filesystem mount. A request
//! may never climb above the mount it starts in.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("path must be absolute")]
    NotAbsolute,

    #[error("path traversal detected")]
    Traversal,

    #[error("path is not on a mounted volume")]
    NotMounted,

    #[error("volume has no host mountpoint")]
    NoMountpoint,

    #[error("path not found")]
    NotFound,

    #[error("path is not a directory")]
    NotDirectory,

    #[error("cannot download a directory, name a file")]
    IsDirectory,

    #[error("failed to read directory: {0}")]
    Io(#[from] io::Error),
}

/// A bind or volume mount of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Path on the host.
    pub source: String,
    /// Path inside the container.
    pub destination: String,
}

impl MountPoint {
    /// Mounts listed in a container inspect document.
    pub fn from_inspect(container: &Value) -> Vec<MountPoint> {
        container
            .get("Mounts")
            .and_then(Value::as_array)
            .map(|mounts| {
                mounts
                    .iter()
                    .filter_map(|m| {
                        Some(MountPoint {
                            source: m.get("Source")?.as_str()?.to_string(),
                            destination: m.get("Destination")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_symlink: bool,
}

/// Host path of `path` inside a volume whose host mountpoint is `mountpoint`.
pub fn resolve_volume_path(
    host_root: &Path,
    mountpoint: Option<&str>,
    path: &str,
) -> Result<PathBuf, BrowseError> {
    let mountpoint = mountpoint
        .filter(|m| !m.is_empty())
        .ok_or(BrowseError::NoMountpoint)?;
    join_within(&on_host(host_root, mountpoint), path)
}

/// Host path of the absolute container path `path`, through the container
/// mount with the longest matching destination.
pub fn resolve_container_path(
    host_root: &Path,
    mounts: &[MountPoint],
    path: &str,
) -> Result<PathBuf, BrowseError> {
    if !path.starts_with('/') {
        return Err(BrowseError::NotAbsolute);
    }
    let wanted = path.trim_end_matches('/');

    let (mount, destination) = mounts
        .iter()
        .map(|m| (m, m.destination.trim_end_matches('/')))
        .filter(|(_, dest)| {
            wanted == *dest
                || wanted
                    .strip_prefix(dest)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|(_, dest)| dest.len())
        .ok_or(BrowseError::NotMounted)?;

    let relative = &wanted[destination.len()..];
    join_within(&on_host(host_root, &mount.source), relative)
}

/// List a directory, sorted by name. Unreadable entries are skipped.
pub async fn list_dir(path: &Path) -> Result<Vec<FileEntry>, BrowseError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(BrowseError::NotFound),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(BrowseError::NotDirectory);
    }

    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let Ok(link_meta) = tokio::fs::symlink_metadata(entry.path()).await else {
            continue;
        };
        // Dangling links still get listed, described by the link itself.
        let meta = tokio::fs::metadata(entry.path())
            .await
            .unwrap_or_else(|_| link_meta.clone());

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind: if meta.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            },
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_symlink: link_meta.file_type().is_symlink(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Where a container file download is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// A regular file on a mount, read from the host.
    Host(PathBuf),
    /// Not reachable on the host; the runtime must archive it.
    Archive,
}

/// Decide how to serve the container file at `path`.
///
/// Mounted files are read from the host directly. Anything else, including a
/// mounted path that does not exist on the host, falls back to the runtime.
pub async fn locate_download(
    host_root: &Path,
    mounts: &[MountPoint],
    path: &str,
) -> Result<DownloadSource, BrowseError> {
    let host_path = match resolve_container_path(host_root, mounts, path) {
        Ok(host_path) => host_path,
        Err(BrowseError::NotMounted) => return Ok(DownloadSource::Archive),
        Err(e) => return Err(e),
    };

    match tokio::fs::metadata(&host_path).await {
        Ok(meta) if meta.is_dir() => Err(BrowseError::IsDirectory),
        Ok(_) => Ok(DownloadSource::Host(host_path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DownloadSource::Archive),
        Err(e) => Err(e.into()),
    }
}

fn on_host(host_root: &Path, absolute: &str) -> PathBuf {
    host_root.join(absolute.trim_start_matches('/'))
}

/// Join `relative` onto `base`, refusing any result outside `base`.
fn join_within(base: &Path, relative: &str) -> Result<PathBuf, BrowseError> {
    let mut parts = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(BrowseError::Traversal);
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut out = base.to_path_buf();
    out.extend(parts);
    Ok(out)
}
