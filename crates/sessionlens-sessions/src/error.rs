use std::path::PathBuf;

use thiserror::Error;

/// Failures that leave no meaningful partial result.
///
/// Malformed lines, unreadable individual transcripts and missing directories
/// are not represented here; they degrade to fewer or zero sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot read projects directory {path:?}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Watch root does not exist: {0:?}")]
    WatchRootMissing(PathBuf),

    #[error("File watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher must be started inside a tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, SessionError>;
