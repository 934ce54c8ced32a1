use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use env_logger::{fmt::Formatter, Target};
use log::{info, warn, Level, LevelFilter, Record};

use crate::{
    config::{VarSource, ENV_VAR_LOG_DIR},
    error::Result,
    format::format_path,
};

const CONTAINER_LOG_DIR: &str = "/var/log/stowaway";
const LOCAL_LOG_DIR: &str = "logs";
const CONTAINER_MARKER: &str = "/.dockerenv";
const WRITE_PROBE: &str = ".write_test";

/// SDK and transport crates that are chatty at info level.
const QUIET_MODULES: [&str; 5] = [
    "aws_config",
    "aws_smithy_runtime",
    "aws_smithy_runtime_api",
    "aws_sdk_s3",
    "hyper",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `None` disables file logging.
    pub file_directory: Option<PathBuf>,
    pub level: LevelFilter,
}

/// What [`LogConfig::init`] ended up doing.
#[derive(Debug, Default)]
pub struct LogHandle {
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Unset `LOG_DIR` picks a default, an empty one turns file logging off.
    pub fn from_vars(vars: &dyn VarSource) -> Result<Self> {
        let file_directory = match vars.var(ENV_VAR_LOG_DIR)? {
            Some(dir) if dir.is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(default_log_dir()),
        };

        Ok(LogConfig {
            file_directory,
            level: LevelFilter::Info,
        })
    }

    pub fn console_only() -> Self {
        LogConfig {
            file_directory: None,
            level: LevelFilter::Info,
        }
    }

    /// Installs the global logger. Falls back to console-only output with a
    /// warning if the log file can't be opened.
    pub fn init(&self, program: &str) -> LogHandle {
        let mut builder = env_logger::Builder::new();
        builder.format(format).filter_level(self.level);
        for module in QUIET_MODULES {
            builder.filter_module(module, LevelFilter::Warn);
        }

        let opened = self
            .file_directory
            .as_deref()
            .map(|dir| open_log_file(dir, program, Utc::now()).map_err(|err| (dir, err)));

        let mut handle = LogHandle::default();
        let mut failure = None;
        match opened {
            Some(Ok((path, file))) => {
                builder.target(Target::Pipe(Box::new(Tee { file })));
                handle.file = Some(path);
            }
            Some(Err((dir, err))) => failure = Some((dir.to_owned(), err)),
            None => {}
        }

        // a logger may already be installed when running under a test harness
        if builder.try_init().is_err() {
            return handle;
        }

        if let Some(path) = &handle.file {
            info!("logging to {}", format_path(path));
        }
        if let Some((dir, err)) = failure {
            warn!("can't log to {} ({err}), using console only", format_path(&dir));
        }

        handle
    }
}

fn default_log_dir() -> PathBuf {
    if Path::new(CONTAINER_MARKER).exists() {
        PathBuf::from(CONTAINER_LOG_DIR)
    } else {
        PathBuf::from(LOCAL_LOG_DIR)
    }
}

fn log_file_name(program: &str, date: &DateTime<Utc>) -> String {
    format!("{program}_{}.log", date.format("%Y-%m-%d"))
}

fn open_log_file(dir: &Path, program: &str, now: DateTime<Utc>) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(WRITE_PROBE);
    File::create(&probe)?;
    fs::remove_file(&probe)?;

    let path = dir.join(log_file_name(program, &now));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Copies every record to stderr and the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn format(f: &mut Formatter, record: &Record) -> io::Result<()> {
    let level = record.level();
    let prefix_style = f.default_level_style(level);
    let prefix = level_prefix(level);
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(
        f,
        "{timestamp} {prefix_style}{prefix}{prefix_style:#}{}",
        record.args()
    )
}

fn level_prefix(level: Level) -> &'static str {
    match level {
        Level::Debug | Level::Trace | Level::Info => "",
        Level::Warn => "warning: ",
        Level::Error => "error: ",
    }
}
