use clap::builder::styling::AnsiColor;
use humantime::format_duration;
use log::info;

use crate::{
    config::{BackupConfig, ProcessEnv},
    error::Result,
    format::{format_path, format_size},
    logger::LogHandle,
    ops::run_backup,
    stats::CommandStats,
};

use super::{print_log_stat, print_stat, BackupArgs};

pub async fn main(cli: BackupArgs, log: &LogHandle) -> Result<()> {
    let stats = CommandStats::new();
    let config = BackupConfig::new(&cli.directory, cli.output_dir, &ProcessEnv)?;
    let store = config.remote.store.connect().await;

    let report = run_backup(&config, store.as_ref(), stats.start_time).await?;

    let style = AnsiColor::Green.on_default();
    info!(
        "{style}backed up{style:#} {} to {}/{}",
        format_path(&config.source_directory),
        config.remote.container,
        report.job.blob_name
    );

    if cli.stats {
        let full_stats = stats.finalize(store.stats());
        print_stat("bytes read", format_size(report.archive.bytes_read));
        print_stat("files archived", report.archive.files);
        print_stat("directories archived", report.archive.directories);
        print_stat("entries skipped", report.archive.skipped.len());
        print_stat("archive size", format_size(report.archive.bytes_written));
        print_stat(
            "bytes uploaded",
            format_size(full_stats.storage.bytes_uploaded),
        );
        print_stat("requests", full_stats.storage.requests);
        print_stat("elapsed time", format_duration(full_stats.elapsed_time()));
        print_log_stat(log);
    }

    Ok(())
}
