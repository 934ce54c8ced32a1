mod from;

use std::{fmt::Display, io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("`{0}` must be set")]
    MissingEnvVar(&'static str),

    #[error("`{name}` is invalid: {reason}")]
    InvalidEnvVar { name: &'static str, reason: String },

    #[error("`{0}` contains `..`, path traversal is not allowed")]
    PathTraversal(PathBuf),

    #[error("directory `{0}` does not exist")]
    DirectoryDoesNotExist(PathBuf),

    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("can't write to directory `{path}`: {source}")]
    DirectoryNotWritable { path: PathBuf, source: io::Error },

    #[error("retention must be a positive number of days, got {0}")]
    InvalidRetention(i64),

    #[error("can't write archive `{path}`: {source}")]
    ArchiveOutput { path: PathBuf, source: io::Error },

    #[error("container `{0}` already exists and belongs to another account")]
    ContainerOwnedElsewhere(String),

    #[error("blob name `{0}` is invalid")]
    InvalidBlobName(String),

    #[error("blob `{name}` is {size} bytes, more than a multipart upload can hold")]
    BlobTooLarge { name: String, size: u64 },

    #[error("blob `{0}` has no last-modified time")]
    MissingLastModified(String),

    #[error("{failed} of {attempted} deletions failed")]
    DeletionsFailed { failed: usize, attempted: usize },

    #[error("{source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },

    #[error(transparent)]
    Other(AnyError),
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }

    /// Errors caused by the invocation itself rather than by the filesystem or
    /// the remote store.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::MissingEnvVar(_)
                | Error::InvalidEnvVar { .. }
                | Error::PathTraversal(_)
                | Error::DirectoryDoesNotExist(_)
                | Error::FileIsNotDirectory(_)
                | Error::DirectoryNotWritable { .. }
                | Error::InvalidRetention(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
