mod debounce;
mod native;
mod polling;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::event::{ChangeKind, EntryKind, FileMeta, WatchEvent};
use crate::lifecycle::Lifecycle;

/// Construction options for a [`DirectoryWatcher`].
///
/// `polling_interval` selects the engine: `None` uses the native
/// OS-notification engine, `Some(interval)` uses the polling engine at that
/// interval. Out-of-process factory/CLI construction is not this crate's
/// concern -- callers build these option structs directly.
#[derive(Debug, Clone, Default)]
pub struct DirectoryWatcherOptions {
    pub polling_interval: Option<Duration>,
}

enum Engine {
    Native(native::NativeEngine),
    Polling(polling::PollingEngine),
}

impl Engine {
    async fn close(self) {
        match self {
            Engine::Native(e) => e.close().await,
            Engine::Polling(e) => e.close().await,
        }
    }
}

/// Watches one directory's immediate children and emits `add`/`remove`/
/// `change` events, backed by either the native or polling engine.
pub struct DirectoryWatcher {
    path: PathBuf,
    children: Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    lifecycle: Arc<Lifecycle>,
    events_rx: mpsc::UnboundedReceiver<WatchEvent>,
    engine: Option<Engine>,
}

impl DirectoryWatcher {
    /// Construct a watcher for `path` and wait for the initial scan to
    /// complete, folding the distilled contract's two-step "construct, then
    /// await ready" into a single async constructor.
    pub async fn new(path: impl Into<PathBuf>, options: DirectoryWatcherOptions) -> Result<Self> {
        let path = path.into();
        let children: Arc<Mutex<HashMap<PathBuf, FileMeta>>> = Arc::new(Mutex::new(HashMap::new()));
        let lifecycle = Arc::new(Lifecycle::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let scan_result = match options.polling_interval {
            Some(interval) => polling::initial_scan(&path, &children, interval).await,
            None => native::initial_scan(&path, &children).await,
        };

        if let Err(e) = scan_result {
            // Error doesn't implement Clone (it wraps notify::Error /
            // globset::Error), so rebuild an equivalent for the lifecycle
            // signal and return the original to the caller.
            lifecycle.fail_init(match &e {
                crate::error::Error::NotFound(p) => crate::error::Error::NotFound(p.clone()),
                crate::error::Error::NotADirectory(p) => crate::error::Error::NotADirectory(p.clone()),
                _ => crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
            });
            return Err(e);
        }

        let engine = match options.polling_interval {
            Some(interval) => Engine::Polling(
                polling::PollingEngine::spawn(
                    path.clone(),
                    Arc::clone(&children),
                    Arc::clone(&lifecycle),
                    tx.clone(),
                    interval,
                )
                .await?,
            ),
            None => Engine::Native(
                native::NativeEngine::spawn(
                    path.clone(),
                    Arc::clone(&children),
                    Arc::clone(&lifecycle),
                    tx.clone(),
                )
                .await?,
            ),
        };

        lifecycle.mark_alive();

        Ok(Self {
            path,
            children,
            lifecycle,
            events_rx: rx,
            engine: Some(engine),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A snapshot of currently known children. Locks briefly; does not hold
    /// a reference into internal state.
    pub fn children(&self) -> HashMap<PathBuf, FileMeta> {
        self.children.lock().unwrap().clone()
    }

    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.events_rx
    }

    pub fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    /// Idempotent. Stops the underlying engine, clears `children`, and
    /// transitions to Disposed. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.lifecycle.is_disposed() {
            return;
        }
        self.lifecycle.dispose();
        if let Some(engine) = self.engine.take() {
            engine.close().await;
        }
        self.children.lock().unwrap().clear();
    }
}

/// Classify a path's transition from `prev` to `curr` per the reconciliation
/// table shared by both engines:
///
/// | prev               | curr                    | action  |
/// |---------------------|--------------------------|---------|
/// | absent              | present                  | add     |
/// | present (non-dir)    | present (non-dir, changed)| change |
/// | present (directory) | present (directory)      | none    |
/// | present              | absent                    | remove |
/// | absent               | absent                    | none    |
pub(crate) fn classify(prev: Option<&FileMeta>, curr: Option<&FileMeta>) -> Option<ChangeKind> {
    match (prev, curr) {
        (None, Some(_)) => Some(ChangeKind::Add),
        (Some(p), Some(c)) => {
            if p.kind == EntryKind::Directory && c.kind == EntryKind::Directory {
                None
            } else if p == c {
                None
            } else {
                Some(ChangeKind::Change)
            }
        }
        (Some(_), None) => Some(ChangeKind::Remove),
        (None, None) => None,
    }
}
