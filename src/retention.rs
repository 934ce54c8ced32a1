use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info};

use crate::{
    error::{Error, Result},
    format::format_time,
    storage::BlobStore,
};

/// How many whole days of backups to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    retain_days: u32,
}

impl RetentionPolicy {
    pub fn new(retain_days: i64) -> Result<Self> {
        match u32::try_from(retain_days) {
            Ok(days) if days > 0 => Ok(RetentionPolicy { retain_days: days }),
            _ => Err(Error::InvalidRetention(retain_days)),
        }
    }

    pub fn retain_days(&self) -> u32 {
        self.retain_days
    }

    /// Blobs last modified strictly before the cutoff are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(TimeDelta::days(i64::from(self.retain_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDeletion {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub cutoff: DateTime<Utc>,
    pub dry_run: bool,
    pub examined: usize,
    pub retained: usize,
    /// Deleted blobs, or the blobs that would have been in a dry run.
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
}

impl DeletionReport {
    fn new(cutoff: DateTime<Utc>, dry_run: bool) -> Self {
        DeletionReport {
            cutoff,
            dry_run,
            examined: 0,
            retained: 0,
            deleted: vec![],
            failed: vec![],
        }
    }

    /// Fails if any individual deletion failed.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(Error::DeletionsFailed {
                failed: self.failed.len(),
                attempted: self.deleted.len() + self.failed.len(),
            })
        }
    }
}

/// Deletes every blob in `container` last modified before `cutoff`.
///
/// A failed listing aborts. A failed delete is logged and the sweep moves on
/// to the next blob; check [`DeletionReport::failed`] afterwards.
pub async fn delete_older_than(
    store: &dyn BlobStore,
    container: &str,
    cutoff: DateTime<Utc>,
    dry_run: bool,
) -> Result<DeletionReport> {
    info!(
        "looking for blobs in {container} last modified before {}",
        format_time(&cutoff)
    );

    let blobs = store.list(container).await?;
    let mut report = DeletionReport::new(cutoff, dry_run);

    for blob in blobs {
        report.examined += 1;
        if blob.last_modified >= cutoff {
            report.retained += 1;
            continue;
        }

        let modified = format_time(&blob.last_modified);
        if dry_run {
            info!("would delete {} (last modified {modified})", blob.name);
            report.deleted.push(blob.name);
            continue;
        }

        match store.delete(container, &blob.name).await {
            Ok(()) => {
                info!("deleted {} (last modified {modified})", blob.name);
                report.deleted.push(blob.name);
            }
            Err(err) => {
                error!("couldn't delete {}: {err}", blob.name);
                report.failed.push(FailedDeletion {
                    name: blob.name,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        "examined {} blobs, {} {}, {} retained",
        report.examined,
        report.deleted.len(),
        if dry_run { "expired" } else { "deleted" },
        report.retained,
    );

    Ok(report)
}
