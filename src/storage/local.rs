use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use tokio::{fs, task::spawn_blocking};

use crate::{
    error::Result,
    format::format_path,
    progress::UploadSource,
};

use super::{validate_name, BlobDescriptor, BlobStore, StorageStats};

/// Keeps each container as a directory under `root` and each blob as a file.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    stats: Mutex<StorageStats>,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        LocalStore {
            root: root.into(),
            stats: Mutex::new(StorageStats::new()),
        }
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        validate_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.container_path(container)?.join(name))
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        let path = self.container_path(container)?;
        self.stats.lock().unwrap().add_request();

        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_container(&self, container: &str) -> Result<()> {
        let path = self.container_path(container)?;
        self.stats.lock().unwrap().add_request();

        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(path).await {
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            result => result,
        }?;
        Ok(())
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        mut source: Box<dyn UploadSource>,
        size: u64,
    ) -> Result<()> {
        let path = self.blob_path(container, name)?;
        let partial_path = self.container_path(container)?.join(format!(".{name}.partial"));

        let copy_path = partial_path.clone();
        let copied = spawn_blocking(move || -> io::Result<u64> {
            let mut file = File::create(&copy_path)?;
            let copied = io::copy(&mut source, &mut file)?;
            file.sync_all()?;
            Ok(copied)
        })
        .await?;

        let copied = match copied {
            Ok(copied) => copied,
            Err(err) => {
                discard_partial(&partial_path).await;
                return Err(err.into());
            }
        };

        if copied != size {
            warn!("{name} is {copied} bytes, expected {size}");
        }

        fs::rename(&partial_path, &path).await?;

        let mut stats = self.stats.lock().unwrap();
        stats.add_upload_part(copied);
        stats.add_upload();
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<BlobDescriptor>> {
        let path = self.container_path(container)?;
        self.stats.lock().unwrap().add_request();

        let mut entries = fs::read_dir(path).await?;
        let mut blobs = vec![];

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_name(&name).is_err() {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            blobs.push(BlobDescriptor {
                name,
                container: container.to_owned(),
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
                size: metadata.len(),
            });
        }

        blobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(blobs)
    }

    async fn delete(&self, container: &str, name: &str) -> Result<()> {
        let path = self.blob_path(container, name)?;
        fs::remove_file(path).await?;

        self.stats.lock().unwrap().add_delete();
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        *self.stats.lock().unwrap()
    }
}

async fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("couldn't remove {} ({err})", format_path(path));
        }
    }
}
