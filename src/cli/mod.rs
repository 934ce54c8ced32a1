mod args;
mod backup;
mod cleanup;
mod parse;

use std::{fmt::Display, process::ExitCode};

use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser,
};
use log::{debug, error, warn};

use crate::{
    config::ProcessEnv,
    error::Result,
    format::format_path,
    logger::{LogConfig, LogHandle},
};

pub use self::args::{BackupArgs, CleanupArgs};

const BACKUP_PROGRAM: &str = "backup";
const CLEANUP_PROGRAM: &str = "cleanup";

pub async fn backup_main() -> ExitCode {
    let args = match parse_args::<BackupArgs>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    let log = init_logger(BACKUP_PROGRAM);
    exit_code(backup::main(args, &log).await)
}

pub async fn cleanup_main() -> ExitCode {
    let args = match parse_args::<CleanupArgs>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    let log = init_logger(CLEANUP_PROGRAM);
    exit_code(cleanup::main(args, &log).await)
}

/// Help and version requests exit successfully, usage errors don't.
fn parse_args<P: Parser>() -> std::result::Result<P, ExitCode> {
    P::try_parse().map_err(|err| {
        let _ = err.print();
        if err.use_stderr() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    })
}

fn init_logger(program: &str) -> LogHandle {
    let dotenv = dotenvy::dotenv();
    let (config, config_err) = match LogConfig::from_vars(&ProcessEnv) {
        Ok(config) => (config, None),
        Err(err) => (LogConfig::console_only(), Some(err)),
    };
    let log = config.init(program);

    if let Some(err) = config_err {
        warn!("{err}, using console only");
    }
    match dotenv {
        Ok(path) => debug!("loaded environment from {}", format_path(&path)),
        Err(err) if err.not_found() => {}
        Err(err) => warn!("couldn't load .env file: {err}"),
    }
    log
}

fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.is_config() {
                error!("invalid configuration: {err}");
            } else {
                error!("{err}");
            }
            ExitCode::FAILURE
        }
    }
}

fn print_log_stat(log: &LogHandle) {
    if let Some(path) = &log.file {
        print_stat("log file", format_path(path));
    }
}

fn print_stat<T: Display>(name: &str, value: T) {
    let style = AnsiColor::BrightBlue.on_default();
    println!("{style}{name}:{style:#} {value}");
}

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightMagenta.on_default())
        .usage(AnsiColor::BrightMagenta.on_default())
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
}
