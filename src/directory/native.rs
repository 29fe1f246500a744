// Native engine: backed by `notify`'s platform-recommended backend
// (inotify/FSEvents/ReadDirectoryChangesW), watched non-recursively per
// directory. Recursion and reconciliation are this crate's job, not the OS
// watcher's -- each `NativeEngine` watches exactly one directory's immediate
// children, matching the "Directory Watcher watches one directory" framing.
//
// `notify-debouncer-mini` is deliberately not used here: it has no "clear
// pending" hook for the close() path, so the debounce queue in
// `super::debounce` is reimplemented directly instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::directory::debounce::{DEBOUNCE_WINDOW, PendingQueue};
use crate::error::{Error, Result};
use crate::event::{self, ChangeKind, FileMeta, WatchEvent};
use crate::lifecycle::Lifecycle;

type Children = Arc<Mutex<HashMap<PathBuf, FileMeta>>>;

pub struct NativeEngine {
    _watcher: RecommendedWatcher,
    reconcile_task: tokio::task::JoinHandle<()>,
}

impl NativeEngine {
    pub async fn spawn(
        dir: PathBuf,
        children: Children,
        lifecycle: Arc<Lifecycle>,
        out: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Self> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Option<PathBuf>>();

        let watch_dir = dir.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    if event.paths.is_empty() {
                        // No filename hint: rescan the whole directory.
                        let _ = raw_tx.send(None);
                    } else {
                        for path in event.paths {
                            let _ = raw_tx.send(Some(path));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("native watch error on {}: {}", watch_dir.display(), e);
                }
            },
            notify::Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let reconcile_task = tokio::spawn(reconcile_loop(dir, children, lifecycle, raw_rx, out));

        Ok(Self {
            _watcher: watcher,
            reconcile_task,
        })
    }

    pub async fn close(self) {
        self.reconcile_task.abort();
        let _ = self.reconcile_task.await;
    }
}

/// Query `dir`'s current children and apply each against `children`,
/// enqueuing the resulting add/remove/change into `queue`. Used both for the
/// initial scan and for whole-directory rescans triggered by a null filename
/// hint.
pub async fn scan_directory(
    dir: &Path,
    children: &Children,
    queue: Option<&mut PendingQueue>,
) -> std::io::Result<()> {
    let mut seen = std::collections::HashSet::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;

    let mut queue_owned = queue;

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        seen.insert(path.clone());
        reconcile_one(&path, children, queue_owned.as_deref_mut()).await;
    }

    let stale: Vec<PathBuf> = {
        let guard = children.lock().unwrap();
        guard.keys().filter(|p| !seen.contains(*p)).cloned().collect()
    };
    for path in stale {
        reconcile_one(&path, children, queue_owned.as_deref_mut()).await;
    }

    Ok(())
}

/// Compare `path`'s current metadata against the recorded entry in
/// `children`, update `children`, and (if a queue is given) merge the
/// resulting change into the debounce queue.
async fn reconcile_one(path: &Path, children: &Children, queue: Option<&mut PendingQueue>) {
    let curr = match event::stat(path).await {
        Ok(meta) => meta,
        Err(e) => {
            log::debug!("stat failed for {}: {}", path.display(), e);
            None
        }
    };

    let prev = children.lock().unwrap().get(path).copied();
    let change = super::classify(prev.as_ref(), curr.as_ref());

    match curr {
        Some(meta) => {
            children.lock().unwrap().insert(path.to_path_buf(), meta);
        }
        None => {
            children.lock().unwrap().remove(path);
        }
    }

    if let (Some(kind), Some(queue)) = (change, queue) {
        let stat = match kind {
            ChangeKind::Remove => prev.unwrap_or(curr.unwrap_or(event::FileMeta {
                size: 0,
                mtime: std::time::UNIX_EPOCH,
                kind: crate::event::EntryKind::Other,
                device_id: 0,
                inode: 0,
            })),
            _ => curr.unwrap_or_else(|| prev.unwrap()),
        };
        queue.merge(path.to_path_buf(), kind, stat);
    }
}

async fn reconcile_loop(
    dir: PathBuf,
    children: Children,
    lifecycle: Arc<Lifecycle>,
    mut raw_rx: mpsc::UnboundedReceiver<Option<PathBuf>>,
    out: mpsc::UnboundedSender<WatchEvent>,
) {
    let mut queue = PendingQueue::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            maybe_path = raw_rx.recv() => {
                let Some(hint) = maybe_path else { break };
                if lifecycle.is_disposed() {
                    continue;
                }
                match hint {
                    Some(path) => reconcile_one(&path, &children, Some(&mut queue)).await,
                    None => {
                        if let Err(e) = scan_directory(&dir, &children, Some(&mut queue)).await {
                            let _ = out.send(WatchEvent::Error(e.to_string()));
                        }
                    }
                }
                if !queue.is_empty() {
                    deadline = Some(Instant::now() + DEBOUNCE_WINDOW);
                }
            }

            _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                deadline = None;
                if lifecycle.is_disposed() {
                    queue.clear();
                    continue;
                }
                for (kind, event) in queue.flush() {
                    let wrapped = match kind {
                        ChangeKind::Add => WatchEvent::Add(event),
                        ChangeKind::Remove => WatchEvent::Remove(event),
                        ChangeKind::Change => WatchEvent::Change(event),
                    };
                    if out.send(wrapped).is_err() {
                        return;
                    }
                }
            }
        }

        if lifecycle.is_disposed() {
            queue.clear();
            break;
        }
    }
}

pub async fn initial_scan(dir: &Path, children: &Children) -> Result<()> {
    if !dir.exists() {
        return Err(Error::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(Error::NotADirectory(dir.to_path_buf()));
    }
    scan_directory(dir, children, None).await?;
    Ok(())
}
