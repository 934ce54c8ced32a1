use std::{
    fs::Metadata,
    path::{Path, PathBuf},
};

use log::warn;
use walkdir::{DirEntry, WalkDir};

use crate::format::format_path;

#[derive(Debug, Default)]
pub(crate) struct TreeSize {
    pub total: u64,
    /// Entries that vanished or couldn't be read, in walk order.
    pub unreadable: Vec<PathBuf>,
}

/// Total size of the regular files under `root`. Symlinks are never counted,
/// and entries that can't be read are logged and left out.
pub fn size_of(root: &Path) -> u64 {
    measure_with(root, DirEntry::metadata).total
}

pub(crate) fn measure_with<F>(root: &Path, mut metadata: F) -> TreeSize
where
    F: FnMut(&DirEntry) -> walkdir::Result<Metadata>,
{
    let mut size = TreeSize::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                size.unreadable.push(warn_unreadable(root, &err));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        match metadata(&entry) {
            Ok(metadata) => size.total += metadata.len(),
            Err(err) => size.unreadable.push(warn_unreadable(entry.path(), &err)),
        }
    }

    size
}

fn warn_unreadable(fallback: &Path, err: &walkdir::Error) -> PathBuf {
    let reason = err
        .io_error()
        .map_or_else(|| err.to_string(), ToString::to_string);
    let path = err.path().unwrap_or(fallback);
    warn!(
        "can't access {} for size calculation ({reason})",
        format_path(path)
    );
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        os::unix::fs::{symlink, PermissionsExt},
    };

    use tempfile::tempdir;
    use walkdir::DirEntry;

    use super::{measure_with, size_of};

    #[test]
    fn empty_directory() {
        let dir = tempdir().unwrap();
        assert_eq!(size_of(dir.path()), 0);
    }

    #[test]
    fn sums_nested_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.txt"), vec![0; 10]).unwrap();
        fs::write(dir.path().join("a/mid.txt"), vec![0; 200]).unwrap();
        fs::write(dir.path().join("a/b/deep.txt"), vec![0; 3000]).unwrap();

        assert_eq!(size_of(dir.path()), 3210);
    }

    #[test]
    fn symlinks_are_not_counted() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.bin");
        fs::write(&target, vec![0; 512]).unwrap();
        symlink(&target, dir.path().join("valid-link")).unwrap();
        symlink(dir.path().join("missing"), dir.path().join("broken-link")).unwrap();

        let outside = tempdir().unwrap();
        fs::write(outside.path().join("big.bin"), vec![0; 4096]).unwrap();
        symlink(outside.path(), dir.path().join("dir-link")).unwrap();

        assert_eq!(size_of(dir.path()), 512);
    }

    #[test]
    fn missing_root_counts_nothing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        let size = measure_with(&missing, DirEntry::metadata);

        assert_eq!(size.total, 0);
        assert_eq!(size.unreadable, vec![missing]);
    }

    #[test]
    fn vanished_file_is_left_out() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.bin"), vec![0; 100]).unwrap();
        fs::write(dir.path().join("victim.bin"), vec![0; 900]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/also.bin"), vec![0; 20]).unwrap();

        let size = measure_with(dir.path(), |entry| {
            if entry.file_name() == "victim.bin" {
                fs::remove_file(entry.path()).unwrap();
            }
            entry.metadata()
        });

        assert_eq!(size.total, 120);
        assert_eq!(size.unreadable.len(), 1);
        assert!(size.unreadable[0].ends_with("victim.bin"));
    }

    #[test]
    fn unreadable_directory_is_left_out() {
        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.bin"), vec![0; 50]).unwrap();
        fs::write(dir.path().join("open.bin"), vec![0; 7]).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores directory permissions
        let readable = fs::read_dir(&locked).is_ok();
        let size = measure_with(dir.path(), DirEntry::metadata);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            assert_eq!(size.total, 57);
        } else {
            assert_eq!(size.total, 7);
            assert_eq!(size.unreadable, vec![locked]);
        }
    }
}
