use std::{
    collections::HashMap,
    fs::{self, File},
    path::Path,
    time::SystemTime,
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use stowaway::{
    config::{CleanupConfig, StoreConfig},
    error::Error,
    ops::run_cleanup,
    storage::{BlobStore, LocalStore},
};
use tempfile::tempdir;

const CONTAINER: &str = "nightly";

fn vars(store_root: &Path) -> HashMap<String, String> {
    [
        ("BACKUP_CONTAINER", CONTAINER),
        ("BACKUP_LOCAL_STORE", store_root.to_str().unwrap()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn add_blob(root: &Path, name: &str, age_days: i64) {
    let path = root.join(CONTAINER).join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, name).unwrap();

    let modified: SystemTime = (now() - TimeDelta::days(age_days)).into();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

async fn remaining(store: &LocalStore) -> Vec<String> {
    let blobs = store.list(CONTAINER).await.unwrap();
    blobs.into_iter().map(|blob| blob.name).collect()
}

#[tokio::test]
async fn deletes_blobs_older_than_retention() {
    let root = tempdir().unwrap();
    add_blob(root.path(), "data_20240522.tgz", 10);
    add_blob(root.path(), "data_20240527.tgz", 5);
    add_blob(root.path(), "data_20240531.tgz", 1);

    let config = CleanupConfig::new(7, &vars(root.path())).unwrap();
    assert_eq!(
        config.remote.store,
        StoreConfig::Local {
            root: root.path().to_owned()
        }
    );
    let store = LocalStore::new(root.path());

    let report = run_cleanup(&config, &store, now(), false).await.unwrap();

    assert_eq!(report.deleted, vec!["data_20240522.tgz"]);
    assert_eq!(report.examined, 3);
    assert_eq!(
        remaining(&store).await,
        vec!["data_20240527.tgz", "data_20240531.tgz"]
    );
    assert_eq!(store.stats().blobs_deleted, 1);
}

#[tokio::test]
async fn dry_run_keeps_everything() {
    let root = tempdir().unwrap();
    add_blob(root.path(), "old.tgz", 40);
    add_blob(root.path(), "new.tgz", 2);

    let config = CleanupConfig::new(30, &vars(root.path())).unwrap();
    let store = LocalStore::new(root.path());

    let report = run_cleanup(&config, &store, now(), true).await.unwrap();

    assert_eq!(report.deleted, vec!["old.tgz"]);
    assert_eq!(remaining(&store).await, vec!["new.tgz", "old.tgz"]);
}

#[tokio::test]
async fn nothing_to_delete() {
    let root = tempdir().unwrap();
    add_blob(root.path(), "fresh.tgz", 0);

    let config = CleanupConfig::new(1, &vars(root.path())).unwrap();
    let store = LocalStore::new(root.path());

    let report = run_cleanup(&config, &store, now(), false).await.unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(report.retained, 1);
}

#[tokio::test]
async fn missing_container_is_an_error() {
    let root = tempdir().unwrap();
    let config = CleanupConfig::new(7, &vars(root.path())).unwrap();
    let store = LocalStore::new(root.path());

    let result = run_cleanup(&config, &store, now(), false).await;

    assert!(matches!(result, Err(Error::Io { .. })));
}

#[test]
fn invalid_days_rejected_before_store_config() {
    let empty = HashMap::<String, String>::new();
    for days in [0, -7] {
        let result = CleanupConfig::new(days, &empty);
        assert!(matches!(result, Err(Error::InvalidRetention(_))));
    }
}
