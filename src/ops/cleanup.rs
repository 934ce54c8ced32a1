use chrono::{DateTime, Utc};
use log::info;

use crate::{
    config::CleanupConfig,
    error::Result,
    retention::{delete_older_than, DeletionReport},
    storage::BlobStore,
};

/// Deletes blobs older than the configured retention period. Fails after the
/// sweep if any single deletion failed.
pub async fn run_cleanup(
    config: &CleanupConfig,
    store: &dyn BlobStore,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<DeletionReport> {
    let days = config.policy.retain_days();
    let container = &config.remote.container;
    if dry_run {
        info!("dry run, nothing will be deleted");
    }
    info!("removing blobs older than {days} days from container {container}");

    let cutoff = config.policy.cutoff(now);
    delete_older_than(store, container, cutoff, dry_run)
        .await?
        .into_result()
}
