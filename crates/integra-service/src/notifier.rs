//! File-system change notifications for file objects.
//!
//! A notifier is armed per object slot (the object's index in the list).
//! Events are delivered on a tokio channel as [`ChangeEvent`]s; the monitor
//! decides what to verify.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("change notifications are not supported for {0}")]
    Unsupported(String),
    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub slot: usize,
    /// The watch is gone (its root was removed) and must be armed again.
    pub rearm: bool,
}

pub trait ChangeNotifier: Send {
    fn arm(&mut self, slot: usize, path: &Path) -> Result<(), NotifyError>;

    fn disarm(&mut self, slot: usize);

    fn rearm(&mut self, slot: usize, path: &Path) -> Result<(), NotifyError> {
        self.disarm(slot);
        self.arm(slot, path)
    }
}

/// Used when change notifications are turned off; every arm fails.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn arm(&mut self, _slot: usize, path: &Path) -> Result<(), NotifyError> {
        Err(NotifyError::Unsupported(path.display().to_string()))
    }

    fn disarm(&mut self, _slot: usize) {}
}

type Roots = Arc<RwLock<HashMap<usize, PathBuf>>>;

/// Notifier backed by the platform watcher (`ReadDirectoryChangesW`,
/// inotify, FSEvents).
pub struct NotifyWatcher {
    watcher: RecommendedWatcher,
    roots: Roots,
}

impl NotifyWatcher {
    pub fn new(tx: mpsc::UnboundedSender<ChangeEvent>) -> Result<Self, NotifyError> {
        let roots: Roots = Arc::default();
        let lookup = roots.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in classify_event(&event, &lookup.read()) {
                        if tx.send(change).is_err() {
                            debug!("change receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => error!("file watcher error: {}", e),
            },
            Config::default(),
        )?;
        Ok(Self { watcher, roots })
    }
}

impl ChangeNotifier for NotifyWatcher {
    fn arm(&mut self, slot: usize, path: &Path) -> Result<(), NotifyError> {
        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher.watch(path, mode)?;
        self.roots.write().insert(slot, path.to_path_buf());
        debug!(slot, path = %path.display(), "watching");
        Ok(())
    }

    fn disarm(&mut self, slot: usize) {
        if let Some(path) = self.roots.write().remove(&slot) {
            // fails when the root is already gone; nothing left to release then
            let _ = self.watcher.unwatch(&path);
        }
    }
}

/// Maps a raw event to the slots whose roots contain the touched paths.
/// Reads do not count as changes; verification itself reads every file.
fn classify_event(event: &Event, roots: &HashMap<usize, PathBuf>) -> Vec<ChangeEvent> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any => {}
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    }

    let mut changes: Vec<ChangeEvent> = Vec::new();
    for path in &event.paths {
        for (slot, root) in roots {
            if !path.starts_with(root) {
                continue;
            }
            let rearm = matches!(event.kind, EventKind::Remove(_)) && path == root;
            match changes.iter_mut().find(|c| c.slot == *slot) {
                Some(existing) => existing.rearm |= rearm,
                None => changes.push(ChangeEvent { slot: *slot, rearm }),
            }
        }
    }
    changes.sort_by_key(|c| c.slot);
    changes
}
