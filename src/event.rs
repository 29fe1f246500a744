use std::path::PathBuf;
use std::time::SystemTime;

/// What kind of filesystem entry a [`FileMeta`] snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// An immutable metadata snapshot for a single path.
///
/// `device_id`/`inode` exist only to support the "absent sentinel" check used
/// by the polling engine: a snapshot with both equal to zero is treated as if
/// the path does not exist, which is how some platform stat primitives report
/// a file that disappeared between listing and querying. On Windows there is
/// no stable inode-equivalent exposed by `std::fs::Metadata`, so both fields
/// are always synthesized as zero there and absence is detected instead via
/// `io::ErrorKind::NotFound` at the query site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub mtime: SystemTime,
    pub kind: EntryKind,
    pub device_id: u64,
    pub inode: u64,
}

impl FileMeta {
    /// True iff this snapshot is the zero-valued absence sentinel.
    pub fn is_absent_sentinel(&self) -> bool {
        self.device_id == 0 && self.inode == 0
    }

    pub fn from_std(meta: &std::fs::Metadata) -> Self {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        #[cfg(unix)]
        let (device_id, inode) = {
            use std::os::unix::fs::MetadataExt;
            (meta.dev(), meta.ino())
        };
        #[cfg(not(unix))]
        let (device_id, inode) = (0, 0);

        Self {
            size: meta.len(),
            mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
            kind,
            device_id,
            inode,
        }
    }
}

/// Queries the metadata for `path`, translating a not-found error into `Ok(None)`.
///
/// Any other I/O error is propagated. This is the "`ENOENT` is a non-fatal
/// signal interpreted as absence" rule applied uniformly at the query site.
pub async fn stat(path: &std::path::Path) -> std::io::Result<Option<FileMeta>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(FileMeta::from_std(&meta))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// One of the three observable changes a watcher can report for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
    Change,
}

/// A single `{path, stat}` record tagged with its change kind.
///
/// `stat` carries the metadata relevant to the event: the new snapshot for
/// `Add`/`Change`, and the last-known snapshot for `Remove` (the path no
/// longer exists by the time the event is emitted).
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub stat: FileMeta,
}

/// The full event surface exposed by both watcher types: the three change
/// kinds plus an out-of-band error channel.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Add(FileEvent),
    Remove(FileEvent),
    Change(FileEvent),
    Error(String),
}
