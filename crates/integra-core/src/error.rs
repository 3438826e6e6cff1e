use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ResolveError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("object '{0}' already exists")]
    AlreadyExists(String),

    #[error("object '{0}' is not in the object list")]
    NotFound(String),

    #[error("snapshot of object '{name}' failed: {source}")]
    SnapshotFailed {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("invalid registry path '{0}': expected ROOT\\sub\\key (ex. HKEY_USERS\\User\\Key)")]
    InvalidRegistryPath(String),

    #[error("object list {} cannot be accessed", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("object list {} is too large ({size} bytes)", .path.display())]
    DocumentTooLarge { path: PathBuf, size: u64 },

    #[error("failed to parse object list: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("object list has an invalid shape: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to persist object list: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl Error {
    /// Splits JSON errors into syntax problems and shape problems.
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data => Error::Schema(err.to_string()),
            _ => Error::Parse(err),
        }
    }
}
