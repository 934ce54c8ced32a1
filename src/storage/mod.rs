mod local;
mod s3;
mod stats;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use crate::{
    error::{Error, Result},
    progress::UploadSource,
};

pub use self::{local::LocalStore, s3::S3Store, stats::StorageStats};

pub const CONTENT_TYPE: &str = "application/octet-stream";

pub type BoxedStore = Box<dyn BlobStore>;

/// Read-only view of a remote object, fetched fresh on every listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub name: String,
    pub container: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// Succeeds without changes if the container already exists and is ours.
    async fn create_container(&self, container: &str) -> Result<()>;

    /// Streams `source` into `container/name`, replacing any existing blob.
    /// `size` is the expected length of the stream.
    async fn upload(
        &self,
        container: &str,
        name: &str,
        source: Box<dyn UploadSource>,
        size: u64,
    ) -> Result<()>;

    async fn list(&self, container: &str) -> Result<Vec<BlobDescriptor>>;

    async fn delete(&self, container: &str, name: &str) -> Result<()>;

    fn stats(&self) -> StorageStats;

    async fn ensure_container(&self, container: &str) -> Result<()> {
        info!("checking whether container {container} exists");
        if self.container_exists(container).await? {
            info!("container {container} already exists");
        } else {
            info!("creating container {container}");
            self.create_container(container).await?;
            info!("container {container} created");
        }

        Ok(())
    }
}

/// Rejects names that can't be used as a single path segment.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if invalid {
        Err(Error::InvalidBlobName(name.to_owned()))
    } else {
        Ok(())
    }
}
