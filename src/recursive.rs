// Composes per-directory `DirectoryWatcher`s into a single, glob-filtered
// recursive view: spawning a child watcher when a subdirectory appears,
// tearing one down when its directory disappears, and re-emitting only the
// file events that pass the compiled glob matcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::directory::{DirectoryWatcher, DirectoryWatcherOptions};
use crate::error::Result;
use crate::event::{EntryKind, FileEvent, FileMeta, WatchEvent};
use crate::glob::GlobMatcher;
use crate::lifecycle::Lifecycle;

/// Construction options for a [`RecursiveGlobWatcher`].
#[derive(Debug, Clone, Default)]
pub struct RecursiveGlobWatcherOptions {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub cwd: PathBuf,
    pub polling_interval: Option<Duration>,
}

struct ChildWatcher {
    handle: tokio::task::JoinHandle<()>,
    closer: mpsc::UnboundedSender<()>,
}

/// An entry in the `watchers` table. `Pending` is registered immediately
/// when a directory is admitted, before its `DirectoryWatcher` is
/// constructed, so a concurrent admission for the same path dedupes against
/// it instead of racing a second construction.
enum WatcherEntry {
    Pending,
    Ready(ChildWatcher),
}

type Watchers = Arc<Mutex<HashMap<PathBuf, WatcherEntry>>>;

/// A glob-filtered recursive view over a set of base directories, built by
/// composing one [`DirectoryWatcher`] per observed directory.
pub struct RecursiveGlobWatcher {
    lifecycle: Arc<Lifecycle>,
    files: Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    watchers: Watchers,
    events_rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl RecursiveGlobWatcher {
    pub async fn new(options: RecursiveGlobWatcherOptions) -> Result<Self> {
        let matcher = Arc::new(GlobMatcher::new(
            &options.includes,
            &options.excludes,
            &options.cwd,
        )?);
        let lifecycle = Arc::new(Lifecycle::new());
        let files: Arc<Mutex<HashMap<PathBuf, FileMeta>>> = Arc::new(Mutex::new(HashMap::new()));
        let watchers: Watchers = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut bases = matcher.base_directories();
        if bases.is_empty() {
            bases.push(options.cwd.clone());
        }

        for base in bases {
            let full = if base.is_absolute() {
                base
            } else {
                options.cwd.join(base)
            };
            add_directory(
                full,
                Arc::clone(&matcher),
                Arc::clone(&lifecycle),
                Arc::clone(&files),
                Arc::clone(&watchers),
                tx.clone(),
                options.polling_interval,
            )
            .await;
        }

        lifecycle.mark_alive();

        Ok(Self {
            lifecycle,
            files,
            watchers,
            events_rx: rx,
        })
    }

    /// A snapshot of files admitted so far.
    pub fn stats(&self) -> HashMap<PathBuf, FileMeta> {
        self.files.lock().unwrap().clone()
    }

    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.events_rx
    }

    pub fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    /// Idempotent. Closes every child watcher concurrently and ignores
    /// their individual errors, mirroring a fan-out broadcast.
    pub async fn close(&mut self) {
        if self.lifecycle.is_disposed() {
            return;
        }
        self.lifecycle.dispose();

        let children: Vec<ChildWatcher> = {
            let mut guard = self.watchers.lock().unwrap();
            guard
                .drain()
                .filter_map(|(_, entry)| match entry {
                    WatcherEntry::Ready(c) => Some(c),
                    WatcherEntry::Pending => None,
                })
                .collect()
        };

        log::debug!(
            "closing recursive glob watcher: {} child watcher(s)",
            children.len()
        );

        let closers: Vec<_> = children
            .iter()
            .map(|c| {
                let _ = c.closer.send(());
            })
            .collect();
        drop(closers);

        for child in children {
            let _ = child.handle.await;
        }
    }
}

/// Recursively drive a [`DirectoryWatcher`] for `dir`: skip if excluded or
/// already present, register an in-flight placeholder so concurrent callers
/// dedupe, wait for the child to become ready, then admit its existing
/// children and subscribe to its future events.
#[allow(clippy::too_many_arguments)]
fn add_directory(
    dir: PathBuf,
    matcher: Arc<GlobMatcher>,
    lifecycle: Arc<Lifecycle>,
    files: Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    watchers: Watchers,
    out: mpsc::UnboundedSender<WatchEvent>,
    polling_interval: Option<Duration>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        if matcher.should_skip(&dir) {
            log::debug!("pruning excluded subtree: {}", dir.display());
            return;
        }

        // Register the in-flight placeholder before constructing anything,
        // so a concurrent admission for the same path dedupes against it
        // rather than racing a second `DirectoryWatcher::new`.
        {
            let mut guard = watchers.lock().unwrap();
            if guard.contains_key(&dir) {
                return;
            }
            guard.insert(dir.clone(), WatcherEntry::Pending);
        }

        log::debug!("spawning directory watcher: {}", dir.display());

        let (closer_tx, mut closer_rx) = mpsc::unbounded_channel::<()>();

        let options = DirectoryWatcherOptions { polling_interval };

        let mut child = match DirectoryWatcher::new(dir.clone(), options).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("failed to watch {}: {}", dir.display(), e);
                watchers.lock().unwrap().remove(&dir);
                let _ = out.send(WatchEvent::Error(e.to_string()));
                return;
            }
        };

        if lifecycle.is_disposed() {
            log::debug!("watcher disposed mid-construction, closing {}", dir.display());
            child.close().await;
            watchers.lock().unwrap().remove(&dir);
            return;
        }

        // Admit everything the child already found before we attached.
        let initial: Vec<(PathBuf, FileMeta)> = child.children().into_iter().collect();
        for (path, meta) in &initial {
            match meta.kind {
                EntryKind::File | EntryKind::Other => {
                    add_file(&files, &matcher, &lifecycle, &out, path.clone(), *meta);
                }
                EntryKind::Directory => {
                    add_directory(
                        path.clone(),
                        Arc::clone(&matcher),
                        Arc::clone(&lifecycle),
                        Arc::clone(&files),
                        Arc::clone(&watchers),
                        out.clone(),
                        polling_interval,
                    )
                    .await;
                }
            }
        }

        let task_matcher = Arc::clone(&matcher);
        let task_lifecycle = Arc::clone(&lifecycle);
        let task_files = Arc::clone(&files);
        let task_watchers = Arc::clone(&watchers);
        let task_out = out.clone();
        let task_dir = dir.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = closer_rx.recv() => {
                        child.close().await;
                        break;
                    }
                    maybe_event = child.events().recv() => {
                        let Some(event) = maybe_event else { break };
                        handle_child_event(
                            event,
                            &task_matcher,
                            &task_lifecycle,
                            &task_files,
                            &task_watchers,
                            &task_out,
                            polling_interval,
                        )
                        .await;
                    }
                }
            }
            log::debug!("directory watcher task for {} stopped", task_dir.display());
        });

        watchers.lock().unwrap().insert(
            dir,
            WatcherEntry::Ready(ChildWatcher {
                handle,
                closer: closer_tx,
            }),
        );
    })
}

async fn handle_child_event(
    event: WatchEvent,
    matcher: &Arc<GlobMatcher>,
    lifecycle: &Arc<Lifecycle>,
    files: &Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    watchers: &Watchers,
    out: &mpsc::UnboundedSender<WatchEvent>,
    polling_interval: Option<Duration>,
) {
    match event {
        WatchEvent::Add(FileEvent { path, stat }) => match stat.kind {
            EntryKind::File | EntryKind::Other => add_file(files, matcher, lifecycle, out, path, stat),
            EntryKind::Directory => {
                add_directory(
                    path,
                    Arc::clone(matcher),
                    Arc::clone(lifecycle),
                    Arc::clone(files),
                    Arc::clone(watchers),
                    out.clone(),
                    polling_interval,
                )
                .await;
            }
        },
        WatchEvent::Remove(FileEvent { path, stat }) => match stat.kind {
            EntryKind::File | EntryKind::Other => remove_file(files, lifecycle, out, &path),
            EntryKind::Directory => remove_directory(files, watchers, lifecycle, out, &path).await,
        },
        WatchEvent::Change(FileEvent { path, stat }) => {
            change_file(files, lifecycle, out, path, stat);
        }
        WatchEvent::Error(e) => {
            log::warn!("propagating watch error: {}", e);
            let _ = out.send(WatchEvent::Error(e));
        }
    }
}

fn add_file(
    files: &Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    matcher: &Arc<GlobMatcher>,
    lifecycle: &Arc<Lifecycle>,
    out: &mpsc::UnboundedSender<WatchEvent>,
    path: PathBuf,
    meta: FileMeta,
) {
    let mut guard = files.lock().unwrap();
    if guard.contains_key(&path) || !matcher.is_match(&path) {
        return;
    }
    guard.insert(path.clone(), meta);
    drop(guard);

    if lifecycle.is_alive() {
        let _ = out.send(WatchEvent::Add(FileEvent { path, stat: meta }));
    }
}

fn remove_file(
    files: &Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    lifecycle: &Arc<Lifecycle>,
    out: &mpsc::UnboundedSender<WatchEvent>,
    path: &Path,
) {
    let removed = files.lock().unwrap().remove(path);
    if let Some(stat) = removed {
        if lifecycle.is_alive() {
            let _ = out.send(WatchEvent::Remove(FileEvent {
                path: path.to_path_buf(),
                stat,
            }));
        }
    }
}

fn change_file(
    files: &Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    lifecycle: &Arc<Lifecycle>,
    out: &mpsc::UnboundedSender<WatchEvent>,
    path: PathBuf,
    meta: FileMeta,
) {
    let mut guard = files.lock().unwrap();
    if !guard.contains_key(&path) {
        return;
    }
    guard.insert(path.clone(), meta);
    drop(guard);

    if lifecycle.is_alive() {
        let _ = out.send(WatchEvent::Change(FileEvent { path, stat: meta }));
    }
}

async fn remove_directory(
    files: &Arc<Mutex<HashMap<PathBuf, FileMeta>>>,
    watchers: &Watchers,
    lifecycle: &Arc<Lifecycle>,
    out: &mpsc::UnboundedSender<WatchEvent>,
    dir: &Path,
) {
    let entry = watchers.lock().unwrap().remove(dir);
    let child = match entry {
        Some(WatcherEntry::Ready(c)) => c,
        Some(WatcherEntry::Pending) => {
            log::warn!(
                "directory removed while still being admitted: {}",
                dir.display()
            );
            return;
        }
        None => return,
    };

    log::debug!("tearing down directory watcher: {}", dir.display());

    // Emit removes for any still-admitted files under this directory before
    // tearing the child watcher down.
    let nested_files: Vec<PathBuf> = {
        let guard = files.lock().unwrap();
        guard
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    };
    for path in nested_files {
        remove_file(files, lifecycle, out, &path);
    }

    // A deeper subdirectory may have its own watcher entry; tear those down
    // too so closing an ancestor doesn't leak descendant watchers.
    let nested_dirs: Vec<PathBuf> = {
        let guard = watchers.lock().unwrap();
        guard
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    };
    for nested_dir in nested_dirs {
        if let Some(WatcherEntry::Ready(nested_child)) = watchers.lock().unwrap().remove(&nested_dir) {
            let _ = nested_child.closer.send(());
            let _ = nested_child.handle.await;
        }
    }

    let _ = child.closer.send(());
    let _ = child.handle.await;
}
