use std::path::PathBuf;

/// Errors surfaced by the watcher core.
///
/// Variants mirror the platform-portable codes callers expect to match on
/// (`NotFound`, `NotADirectory`); everything else is forwarded as-is from the
/// underlying filesystem or notification primitive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Glob(#[from] globset::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
