//! Configuration file watcher for hot reload.
//!
//! The notify watcher is an event source only; a single consumer task
//! owns the reload. Bursts of events for one logical edit are coalesced
//! and deduplicated by comparing the file's modification timestamp, so
//! a single save does not trigger redundant rebuilds. A reload that
//! fails to parse keeps the previous snapshot live.

use super::{Config, ConfigHandle, RoutingSnapshot};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Settle time after the first event of a burst before reloading.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watch `path` and swap a fresh snapshot into `handle` on each change.
///
/// Returns the watcher; dropping it stops the event source.
pub fn spawn_config_watcher(
    path: &Path,
    handle: Arc<ConfigHandle>,
) -> notify::Result<RecommendedWatcher> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher =
        RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("config watch error: {e}"),
            },
            notify::Config::default(),
        )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    tokio::spawn(reload_loop(path.to_path_buf(), handle, rx));
    info!(path = %path.display(), "config watcher started");
    Ok(watcher)
}

async fn reload_loop(
    path: PathBuf,
    handle: Arc<ConfigHandle>,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    let mut last_modified = modified_at(&path);

    while rx.recv().await.is_some() {
        // Let the burst for this edit settle, then drain it.
        tokio::time::sleep(DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        let modified = modified_at(&path);
        if modified.is_some() && modified == last_modified {
            debug!("config unchanged since last reload, skipping");
            continue;
        }

        match Config::from_file(&path) {
            Ok(config) => {
                let snapshot = RoutingSnapshot::from_config(&config);
                let hosts = snapshot.len();
                handle.swap(snapshot);
                last_modified = modified;
                info!(hosts, "config reloaded");
            }
            Err(e) => {
                // Previous snapshot stays live.
                error!("config reload failed, keeping current configuration: {e}");
            }
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
