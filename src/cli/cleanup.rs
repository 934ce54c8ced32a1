use humantime::format_duration;

use crate::{
    config::{CleanupConfig, ProcessEnv},
    error::Result,
    format::format_time,
    logger::LogHandle,
    ops::run_cleanup,
    stats::CommandStats,
};

use super::{print_log_stat, print_stat, CleanupArgs};

pub async fn main(cli: CleanupArgs, log: &LogHandle) -> Result<()> {
    let stats = CommandStats::new();
    let config = CleanupConfig::new(i64::from(cli.days), &ProcessEnv)?;
    let store = config.remote.store.connect().await;

    let report = run_cleanup(&config, store.as_ref(), stats.start_time, cli.dry_run).await?;

    if cli.stats {
        let full_stats = stats.finalize(store.stats());
        print_stat("cutoff", format_time(&report.cutoff));
        print_stat("blobs examined", report.examined);
        if cli.dry_run {
            print_stat("blobs expired", report.deleted.len());
        } else {
            print_stat("blobs deleted", full_stats.storage.blobs_deleted);
        }
        print_stat("blobs retained", report.retained);
        print_stat("requests", full_stats.storage.requests);
        print_stat("elapsed time", format_duration(full_stats.elapsed_time()));
        print_log_stat(log);
    }

    Ok(())
}
