// Cross-platform filesystem watching core.
//
// Watches a single directory's immediate children (`DirectoryWatcher`) or a
// glob-filtered recursive subtree (`RecursiveGlobWatcher`), reconciling
// coarse OS or polling signals into a debounced add/remove/change event
// stream. Two interchangeable engines -- native OS notifications and fixed
// interval polling -- implement the same contract; see `directory` for the
// reconciliation and debounce logic both share.

pub mod directory;
pub mod error;
pub mod event;
pub mod glob;
pub mod lifecycle;
pub mod recursive;

pub use directory::{DirectoryWatcher, DirectoryWatcherOptions};
pub use error::{Error, Result};
pub use event::{ChangeKind, EntryKind, FileEvent, FileMeta, WatchEvent};
pub use glob::GlobMatcher;
pub use lifecycle::WatchState;
pub use recursive::{RecursiveGlobWatcher, RecursiveGlobWatcherOptions};
