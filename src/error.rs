use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Every way a session, a scan or a follow can end badly.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested channel is not present in the inventory. The display
    /// text is what viewers receive in the `error` field.
    #[error("Unknown logfile")]
    UnknownChannel(String),
    #[error("failed to scan log root {}: {source}", root.display())]
    Inventory {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("file stat: {0}")]
    Stat(#[source] io::Error),
    #[error("tail start: {0}")]
    Open(#[source] io::Error),
    #[error("tail run: {0}")]
    Follow(#[source] io::Error),
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("transport: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to watch file: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    pub(crate) fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Transport(Box::new(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
