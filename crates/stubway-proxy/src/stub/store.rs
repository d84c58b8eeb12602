//! Filesystem store for recorded responses.
//!
//! Captures are addressed by [`StubIdentity`] and written through a
//! temporary file that is renamed into place, so a concurrent reader
//! never observes a torn or partial capture. Concurrent writes to one
//! identity are not serialized; the last rename wins. A missing file is
//! a normal outcome, not an error.

use super::identity::StubIdentity;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

static CAPTURE_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct StubStore {
    root: PathBuf,
}

impl StubStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path a capture for `identity` lives at. The admin UI
    /// uses the same mapping, so the files it deletes are exactly the
    /// ones request handling would look up.
    pub fn path_for(&self, identity: &StubIdentity) -> PathBuf {
        self.root.join(identity.relative_path())
    }

    /// Open a stored capture for streaming. `Ok(None)` means no stub is
    /// available, which drives fallback rather than an error.
    pub async fn open(&self, identity: &StubIdentity) -> std::io::Result<Option<fs::File>> {
        match fs::File::open(self.path_for(identity)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, identity: &StubIdentity) -> bool {
        fs::metadata(self.path_for(identity)).await.is_ok()
    }

    /// Write a complete capture, creating parent directories as needed.
    /// Overwrites any prior capture at the same identity.
    pub async fn write(&self, identity: &StubIdentity, body: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(identity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path(&path);
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &path).await
    }

    /// Delete a stored capture. Absence is not an error.
    pub async fn delete(&self, identity: &StubIdentity) -> std::io::Result<()> {
        match fs::remove_file(self.path_for(identity)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Start an incremental capture. Chunks are handed off to a writer
    /// task, so a slow disk never blocks response delivery. The capture
    /// becomes visible only when [`CaptureHandle::commit`] is called;
    /// dropping the handle without committing discards it.
    pub fn begin_capture(&self, identity: &StubIdentity) -> CaptureHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(capture_writer(self.path_for(identity), rx));
        CaptureHandle { tx }
    }
}

enum CaptureMsg {
    Chunk(Bytes),
    Commit,
}

/// Sending side of an in-progress capture.
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<CaptureMsg>,
}

impl CaptureHandle {
    /// Queue a body chunk. Never blocks; errors from the writer task
    /// are logged there and must not affect response delivery.
    pub fn write(&self, chunk: Bytes) {
        let _ = self.tx.send(CaptureMsg::Chunk(chunk));
    }

    /// Mark the capture complete, making it visible atomically.
    pub fn commit(self) {
        let _ = self.tx.send(CaptureMsg::Commit);
    }
}

async fn capture_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<CaptureMsg>) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            warn!("capture aborted, cannot create {}: {e}", parent.display());
            return;
        }
    }

    let tmp = temp_path(&path);
    let mut file = match fs::File::create(&tmp).await {
        Ok(f) => f,
        Err(e) => {
            warn!("capture aborted, cannot create {}: {e}", tmp.display());
            return;
        }
    };

    let mut failed = false;
    let mut committed = false;
    while let Some(msg) = rx.recv().await {
        match msg {
            CaptureMsg::Chunk(chunk) => {
                if !failed {
                    if let Err(e) = file.write_all(&chunk).await {
                        warn!("capture write failed for {}: {e}", path.display());
                        failed = true;
                    }
                }
            }
            CaptureMsg::Commit => {
                committed = !failed;
                break;
            }
        }
    }

    if committed {
        if let Err(e) = file.flush().await {
            warn!("capture flush failed for {}: {e}", path.display());
            committed = false;
        }
    }
    drop(file);

    if committed {
        match fs::rename(&tmp, &path).await {
            Ok(()) => debug!("captured {}", path.display()),
            Err(e) => {
                warn!("capture rename failed for {}: {e}", path.display());
                let _ = fs::remove_file(&tmp).await;
            }
        }
    } else {
        // Abandoned or failed: a partial capture must never be visible.
        let _ = fs::remove_file(&tmp).await;
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let seq = CAPTURE_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".{}.{seq}.tmp", std::process::id()));
    path.with_file_name(name)
}
