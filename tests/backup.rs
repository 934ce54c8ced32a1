use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use stowaway::{
    config::BackupConfig,
    error::{Error, Result},
    ops::run_backup,
    progress::UploadSource,
    storage::{BlobDescriptor, BlobStore, LocalStore, StorageStats},
};
use tempfile::{tempdir, TempDir};

const CONTAINER: &str = "nightly";

struct Fixture {
    source: TempDir,
    output: TempDir,
    blobs: TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &[u8])]) -> Self {
        let fixture = Fixture {
            source: tempdir().unwrap(),
            output: tempdir().unwrap(),
            blobs: tempdir().unwrap(),
        };
        for (name, data) in files {
            let path = fixture.source.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        fixture
    }

    fn config(&self) -> BackupConfig {
        let vars: HashMap<String, String> = [
            ("BACKUP_CONTAINER", CONTAINER),
            ("BACKUP_LOCAL_STORE", self.blobs.path().to_str().unwrap()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        BackupConfig::new(self.source.path(), Some(self.output.path().to_owned()), &vars).unwrap()
    }

    fn output_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.output.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

fn read_archive(path: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    let mut files = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.header().entry_type().is_file() {
            let mut data = vec![];
            entry.read_to_end(&mut data).unwrap();
            files.insert(entry.path().unwrap().into_owned(), data);
        }
    }
    files
}

#[tokio::test]
async fn backup_uploads_and_cleans_up() {
    let fixture = Fixture::new(&[("notes.txt", b"remember"), ("photos/cat.jpg", &[7; 4096])]);
    let config = fixture.config();
    let store = LocalStore::new(fixture.blobs.path());
    let start_time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    let report = run_backup(&config, &store, start_time).await.unwrap();

    let basename = config.source_directory.file_name().unwrap().to_string_lossy();
    let expected_name = format!("{basename}_20240102030405.tgz");
    assert_eq!(report.job.blob_name, expected_name);
    assert_eq!(report.job.total_bytes, 8 + 4096);
    assert_eq!(report.archive.files, 2);
    assert!(report.archive.skipped.is_empty());
    assert!(report.job.skipped_entries.is_empty());

    assert!(fixture.output_files().is_empty());

    let blobs = store.list(CONTAINER).await.unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].name, expected_name);
    assert_eq!(blobs[0].size, report.archive.bytes_written);

    let files = read_archive(&fixture.blobs.path().join(CONTAINER).join(&expected_name));
    assert_eq!(files[Path::new("notes.txt")], b"remember");
    assert_eq!(files[Path::new("photos/cat.jpg")], vec![7; 4096]);
}

#[tokio::test]
async fn backup_of_empty_directory() {
    let fixture = Fixture::new(&[]);
    let config = fixture.config();
    let store = LocalStore::new(fixture.blobs.path());

    let report = run_backup(&config, &store, Utc::now()).await.unwrap();

    assert_eq!(report.job.total_bytes, 0);
    assert_eq!(report.archive.files, 0);
    assert_eq!(store.list(CONTAINER).await.unwrap().len(), 1);
}

#[derive(Debug)]
struct UnreachableStore;

#[async_trait]
impl BlobStore for UnreachableStore {
    async fn container_exists(&self, _container: &str) -> Result<bool> {
        Ok(true)
    }

    async fn create_container(&self, _container: &str) -> Result<()> {
        Ok(())
    }

    async fn upload(
        &self,
        _container: &str,
        _name: &str,
        _source: Box<dyn UploadSource>,
        _size: u64,
    ) -> Result<()> {
        Err(anyhow::anyhow!("connection reset").into())
    }

    async fn list(&self, _container: &str) -> Result<Vec<BlobDescriptor>> {
        Ok(vec![])
    }

    async fn delete(&self, _container: &str, _name: &str) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        StorageStats::new()
    }
}

#[tokio::test]
async fn failed_upload_keeps_local_archive() {
    let fixture = Fixture::new(&[("a.txt", b"a")]);
    let config = fixture.config();
    let start_time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

    let result = run_backup(&config, &UnreachableStore, start_time).await;

    assert!(matches!(result, Err(Error::Other(_))));
    let outputs = fixture.output_files();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].to_string_lossy().ends_with("_20240102030405.tgz"));
    assert_eq!(read_archive(&outputs[0])[Path::new("a.txt")], b"a");
}

#[tokio::test]
async fn failed_archive_leaves_no_partial_file() {
    let fixture = Fixture::new(&[("a.txt", b"a")]);
    let config = fixture.config();
    let store = LocalStore::new(fixture.blobs.path());
    fs::remove_dir_all(&config.source_directory).unwrap();

    let result = run_backup(&config, &store, Utc::now()).await;

    assert!(matches!(result, Err(Error::DirectoryDoesNotExist(_))));
    assert!(fixture.output_files().is_empty());
    assert!(!store.container_exists(CONTAINER).await.unwrap());
}

#[tokio::test]
async fn unreadable_files_are_listed_on_the_job() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new(&[("keep.txt", b"keep"), ("secret.txt", b"secret")]);
    let secret = fixture.source.path().join("secret.txt");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();
    if File::open(&secret).is_ok() {
        // permissions don't apply to root
        return;
    }
    let config = fixture.config();
    let store = LocalStore::new(fixture.blobs.path());

    let report = run_backup(&config, &store, Utc::now()).await.unwrap();

    assert_eq!(report.archive.files, 1);
    assert_eq!(report.job.skipped_entries, vec![secret.canonicalize().unwrap()]);
}
