use std::{ops::RangeInclusive, path::PathBuf};

use clap::Parser;

use super::{cli_styles, parse::parse_range_inclusive};

const RETAIN_DAYS_RANGE: RangeInclusive<u32> = 1..=u32::MAX;

fn parse_retain_days(s: &str) -> Result<u32, String> {
    parse_range_inclusive(s, RETAIN_DAYS_RANGE)
}

/// Archive a directory and upload it to blob storage
#[derive(Parser, Debug)]
#[command(name = "backup", version, long_about = None, styles = cli_styles())]
pub struct BackupArgs {
    /// Directory to back up
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Where to write the archive before uploading it
    /// [default: $BACKUP_OUTPUT_DIR or the current directory]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print stats after completion
    #[arg(long, default_value_t = false)]
    pub stats: bool,
}

/// Delete backups older than a number of days from blob storage
#[derive(Parser, Debug)]
#[command(name = "cleanup", version, long_about = None, styles = cli_styles())]
pub struct CleanupArgs {
    /// Number of days of backups to keep
    #[arg(
        value_name = "DAYS",
        value_parser = parse_retain_days,
        allow_negative_numbers = true,
    )]
    pub days: u32,

    /// Show blobs that would be deleted without deleting them
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Print stats after completion
    #[arg(long, default_value_t = false)]
    pub stats: bool,
}
