mod backup;
mod cleanup;

pub use {
    backup::{archive_name, run_backup, ArchiveJob, BackupReport},
    cleanup::run_cleanup,
};
