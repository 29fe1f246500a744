// The debounced pending-event queue used by the native engine.
//
// This is deliberately not built on a generic debounce utility (and not on
// `notify-debouncer-mini`): the close() path needs a "clear pending" hook
// that a black-box debounce function doesn't expose, so the queue and its
// flush timer are reimplemented directly here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::event::{ChangeKind, FileEvent, FileMeta};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
struct Pending {
    kind: ChangeKind,
    stat: FileMeta,
}

/// Per-path pending slots awaiting the next debounce flush.
///
/// Merge rules for a path whose pending entry is `P` and whose freshly
/// observed entry is `N`:
///
/// | P \ N  | add    | change | remove        |
/// |--------|--------|--------|---------------|
/// | (none) | add    | change | remove        |
/// | add    | add    | add    | drop both      |
/// | change | change | change | remove         |
/// | remove | change | change | remove         |
#[derive(Default)]
pub struct PendingQueue {
    slots: HashMap<PathBuf, Pending>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Merge a freshly observed `(kind, stat)` for `path` into the queue.
    pub fn merge(&mut self, path: PathBuf, kind: ChangeKind, stat: FileMeta) {
        use ChangeKind::*;

        let merged = match self.slots.get(&path).map(|p| &p.kind) {
            None => Some((kind, stat)),
            Some(Add) => match kind {
                Add | Change => Some((Add, stat)),
                Remove => None, // add-then-remove cancels out entirely
            },
            Some(Change) => match kind {
                Add | Change => Some((Change, stat)),
                Remove => Some((Remove, stat)),
            },
            Some(Remove) => match kind {
                Add | Change => Some((Change, stat)),
                Remove => Some((Remove, stat)),
            },
        };

        match merged {
            Some((kind, stat)) => {
                self.slots.insert(path, Pending { kind, stat });
            }
            None => {
                self.slots.remove(&path);
            }
        }
    }

    /// Discard all pending entries without emitting them. Used by close().
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Drain the queue into a batch of events, clearing it in the process.
    pub fn flush(&mut self) -> Vec<(ChangeKind, FileEvent)> {
        self.slots
            .drain()
            .map(|(path, pending)| {
                (
                    pending.kind,
                    FileEvent {
                        path,
                        stat: pending.stat,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EntryKind;
    use std::time::SystemTime;

    fn meta(size: u64) -> FileMeta {
        FileMeta {
            size,
            mtime: SystemTime::now(),
            kind: EntryKind::File,
            device_id: 0,
            inode: 0,
        }
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut q = PendingQueue::new();
        let p = PathBuf::from("/a/b");
        q.merge(p.clone(), ChangeKind::Add, meta(5));
        q.merge(p.clone(), ChangeKind::Remove, meta(5));
        assert!(q.is_empty());
    }

    #[test]
    fn add_then_change_stays_add_with_newest_stat() {
        let mut q = PendingQueue::new();
        let p = PathBuf::from("/a/b");
        q.merge(p.clone(), ChangeKind::Add, meta(5));
        q.merge(p.clone(), ChangeKind::Change, meta(13));
        let flushed = q.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, ChangeKind::Add);
        assert_eq!(flushed[0].1.stat.size, 13);
    }

    #[test]
    fn remove_then_add_becomes_change() {
        let mut q = PendingQueue::new();
        let p = PathBuf::from("/a/b");
        q.merge(p.clone(), ChangeKind::Remove, meta(5));
        q.merge(p.clone(), ChangeKind::Add, meta(5));
        let flushed = q.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, ChangeKind::Change);
    }

    #[test]
    fn clear_discards_without_emitting() {
        let mut q = PendingQueue::new();
        q.merge(PathBuf::from("/a"), ChangeKind::Add, meta(1));
        q.clear();
        assert!(q.is_empty());
        assert!(q.flush().is_empty());
    }
}
