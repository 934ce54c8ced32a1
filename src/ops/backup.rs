use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::{fs, task::spawn_blocking};

use crate::{
    archive::{create_archive, ArchiveReport},
    config::BackupConfig,
    error::Result,
    format::{format_path, format_size},
    progress::{progress_bar, ProgressReader},
    size::size_of,
    storage::BlobStore,
};

const ARCHIVE_EXTENSION: &str = "tgz";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const FALLBACK_BASENAME: &str = "backup";

/// `<basename>_<YYYYMMDDHHMMSS>.tgz`, with the time in UTC.
pub fn archive_name(source_directory: &Path, time: &DateTime<Utc>) -> String {
    let basename = source_directory
        .file_name()
        .map_or_else(|| FALLBACK_BASENAME.into(), |name| name.to_string_lossy());
    format!(
        "{basename}_{}.{ARCHIVE_EXTENSION}",
        time.format(TIMESTAMP_FORMAT)
    )
}

/// One run of the backup pipeline. The same name is used for the local
/// archive and the uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub source_directory: PathBuf,
    pub output_path: PathBuf,
    pub blob_name: String,
    pub total_bytes: u64,
    /// Paths left out of the archive, in walk order. Reasons are in
    /// [`ArchiveReport::skipped`].
    pub skipped_entries: Vec<PathBuf>,
}

impl ArchiveJob {
    pub fn new(config: &BackupConfig, start_time: &DateTime<Utc>) -> Self {
        let blob_name = archive_name(&config.source_directory, start_time);
        ArchiveJob {
            source_directory: config.source_directory.clone(),
            output_path: config.output_directory.join(&blob_name),
            blob_name,
            total_bytes: 0,
            skipped_entries: vec![],
        }
    }
}

#[derive(Debug)]
pub struct BackupReport {
    pub job: ArchiveJob,
    pub archive: ArchiveReport,
}

/// Sizes the source tree, archives it, makes sure the container exists,
/// uploads the archive and removes the local copy.
///
/// The local archive is only removed after a successful upload; if any later
/// step fails it stays in the output directory.
pub async fn run_backup(
    config: &BackupConfig,
    store: &dyn BlobStore,
    start_time: DateTime<Utc>,
) -> Result<BackupReport> {
    let mut job = ArchiveJob::new(config, &start_time);
    let container = &config.remote.container;

    info!(
        "backing up {} to container {container}",
        format_path(&job.source_directory)
    );

    let source_directory = job.source_directory.clone();
    job.total_bytes = spawn_blocking(move || size_of(&source_directory)).await?;
    info!("source directory size is {}", format_size(job.total_bytes));

    let archive = archive_source(&job).await?;
    job.skipped_entries = archive.skipped.iter().map(|skip| skip.path.clone()).collect();

    store.ensure_container(container).await?;

    let bar = progress_bar(0, "uploading")?;
    upload_archive(store, container, &job, &bar).await?;

    fs::remove_file(&job.output_path).await?;
    info!("removed local archive {}", format_path(&job.output_path));

    Ok(BackupReport { job, archive })
}

async fn archive_source(job: &ArchiveJob) -> Result<ArchiveReport> {
    let bar = progress_bar(job.total_bytes, "archiving")?;
    let source_directory = job.source_directory.clone();
    let output_path = job.output_path.clone();
    let sink = bar.clone();

    let archived =
        spawn_blocking(move || create_archive(&source_directory, &output_path, sink)).await?;
    bar.finish_and_clear();

    match archived {
        Ok(report) => {
            if !report.skipped.is_empty() {
                warn!(
                    "{} entries were left out of {}",
                    report.skipped.len(),
                    job.blob_name
                );
            }
            Ok(report)
        }
        Err(err) => {
            discard_partial_archive(&job.output_path).await;
            Err(err)
        }
    }
}

async fn discard_partial_archive(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!("removed partial archive {}", format_path(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("couldn't remove partial archive {} ({err})", format_path(path)),
    }
}

/// Clears `bar` whether or not the upload succeeds.
async fn upload_archive(
    store: &dyn BlobStore,
    container: &str,
    job: &ArchiveJob,
    bar: &ProgressBar,
) -> Result<()> {
    let file = fs::File::open(&job.output_path).await?.into_std().await;
    let size = file.metadata()?.len();

    info!(
        "uploading {} ({}) as {}",
        format_path(&job.output_path),
        format_size(size),
        job.blob_name
    );

    bar.set_length(size);
    let source = ProgressReader::new(file, bar.clone());
    let uploaded = store
        .upload(container, &job.blob_name, Box::new(source), size)
        .await;
    bar.finish_and_clear();

    match uploaded {
        Ok(()) => {
            info!("uploaded {} to container {container}", job.blob_name);
            Ok(())
        }
        Err(err) => {
            warn!("upload failed, keeping {}", format_path(&job.output_path));
            Err(err)
        }
    }
}
