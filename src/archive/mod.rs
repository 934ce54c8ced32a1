mod entry;


use std::{
    fs::{self, File, Metadata, OpenOptions},
    io::{self, BufWriter, Write},
    os::unix::fs::{MetadataExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use log::{debug, info, warn};
use tar::{Builder, Header, HeaderMode};
use walkdir::WalkDir;

use crate::{
    error::{Error, Result},
    format::{format_path, format_size},
    progress::{ProgressReader, ProgressSink},
};

pub use self::entry::{SkipReason, SkippedEntry};

use self::entry::PaddedReader;

type TarWriter = Builder<GzEncoder<BufWriter<File>>>;

#[derive(Debug, Default)]
pub struct ArchiveReport {
    /// Size of the compressed archive on disk.
    pub bytes_written: u64,
    /// File content read from the source tree.
    pub bytes_read: u64,
    pub files: u64,
    pub directories: u64,
    pub skipped: Vec<SkippedEntry>,
}

/// Writes every file and directory under `root` into a gzipped tar at
/// `output_path`, named relative to `root`.
///
/// Symlinks are never followed or stored. Entries that vanish or can't be
/// read are recorded in [`ArchiveReport::skipped`] and the walk carries on;
/// only a bad `root` or a failure to write the output is an error.
pub fn create_archive<S: ProgressSink>(
    root: &Path,
    output_path: &Path,
    progress: S,
) -> Result<ArchiveReport> {
    create_archive_with(root, output_path, progress, open_no_follow)
}

/// Fails with `ELOOP` if `path` is a symlink.
pub(crate) fn open_no_follow(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
}

pub(crate) fn create_archive_with<S, F>(
    root: &Path,
    output_path: &Path,
    progress: S,
    mut open: F,
) -> Result<ArchiveReport>
where
    S: ProgressSink,
    F: FnMut(&Path) -> io::Result<File>,
{
    let root = validate_root(root)?;
    let output_err = |source| Error::ArchiveOutput {
        path: output_path.to_owned(),
        source,
    };

    let file = File::create(output_path).map_err(output_err)?;
    let own_path = output_path.canonicalize().map_err(output_err)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::best());
    let mut builder = Builder::new(encoder);
    let mut report = ArchiveReport::default();

    info!("archiving {}", format_path(&root));

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root.as_path()).to_owned();
                report.skipped.push(SkippedEntry::new(&path, (&err).into()));
                continue;
            }
        };

        let path = entry.path();
        if path == own_path {
            debug!("skipped the archive itself");
            continue;
        }

        let Ok(name) = path.strip_prefix(&root) else {
            continue;
        };

        let file_type = entry.file_type();
        let outcome = if file_type.is_symlink() {
            debug!("skipped symlink {}", format_path(path));
            continue;
        } else if file_type.is_dir() {
            append_dir(&mut builder, path, name, &mut report)
        } else if file_type.is_file() {
            append_file(&mut builder, path, name, &progress, &mut open, &mut report)
        } else {
            warn!("skipped special file {}", format_path(path));
            continue;
        };

        outcome.map_err(output_err)?;
    }

    let encoder = builder.into_inner().map_err(output_err)?;
    let mut writer = encoder.finish().map_err(output_err)?;
    writer.flush().map_err(output_err)?;
    let file = writer.into_inner().map_err(|err| output_err(err.into_error()))?;
    file.sync_all().map_err(output_err)?;
    report.bytes_written = file.metadata().map_err(output_err)?.len();

    info!(
        "archived {} files ({}) into {} ({})",
        report.files,
        format_size(report.bytes_read),
        format_path(output_path),
        format_size(report.bytes_written),
    );

    if !report.skipped.is_empty() {
        warn!("archive completed with {} skipped entries", report.skipped.len());
    }

    Ok(report)
}

pub(crate) fn validate_root(root: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(root).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::DirectoryDoesNotExist(root.to_owned()),
        _ => err.into(),
    })?;

    if !metadata.is_dir() {
        return Err(Error::FileIsNotDirectory(root.to_owned()));
    }

    Ok(root.canonicalize()?)
}

/// Source faults become skipped entries; the returned error is always a
/// failure to write the archive.
fn append_dir(
    builder: &mut TarWriter,
    path: &Path,
    name: &Path,
    report: &mut ArchiveReport,
) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            report.skipped.push(SkippedEntry::new(path, (&err).into()));
            return Ok(());
        }
    };

    let mut header = header_for(&metadata);
    header.set_size(0);
    builder.append_data(&mut header, name, io::empty())?;
    report.directories += 1;
    Ok(())
}

fn append_file<S, F>(
    builder: &mut TarWriter,
    path: &Path,
    name: &Path,
    progress: &S,
    open: &mut F,
    report: &mut ArchiveReport,
) -> io::Result<()>
where
    S: ProgressSink,
    F: FnMut(&Path) -> io::Result<File>,
{
    let opened = open(path).and_then(|file| {
        let metadata = file.metadata()?;
        check_still_regular(path, &metadata)?;
        Ok((file, metadata))
    });
    let (file, metadata) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            report.skipped.push(SkippedEntry::new(path, (&err).into()));
            return Ok(());
        }
    };

    let size = metadata.len();
    let mut header = header_for(&metadata);
    header.set_size(size);

    let mut reader = PaddedReader::new(ProgressReader::new(file, progress), size);
    builder.append_data(&mut header, name, &mut reader)?;

    if let Some(reason) = reader.finish() {
        report.skipped.push(SkippedEntry::new(path, reason));
    } else {
        report.files += 1;
        report.bytes_read += size;
        debug!("added {} ({})", format_path(name), format_size(size));
    }

    Ok(())
}

/// The opened file must still be the regular file sitting at `path`.
fn check_still_regular(path: &Path, opened: &Metadata) -> io::Result<()> {
    let current = fs::symlink_metadata(path)?;
    if current.file_type().is_symlink() {
        return Err(io::Error::from_raw_os_error(libc::ELOOP));
    }

    let same_file = current.dev() == opened.dev() && current.ino() == opened.ino();
    if !opened.is_file() || !same_file {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "replaced during backup",
        ));
    }

    Ok(())
}

fn header_for(metadata: &Metadata) -> Header {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header
}
