use std::{
    collections::HashMap,
    env::{self, VarError},
    fmt,
    fs::{self, File},
    path::{Component, Path, PathBuf},
};

use crate::{
    archive::validate_root,
    error::{Error, Result},
    retention::RetentionPolicy,
    storage::{BoxedStore, LocalStore, S3Store},
};

pub const ENV_VAR_CONTAINER: &str = "BACKUP_CONTAINER";
pub const ENV_VAR_ACCESS_KEY_ID: &str = "BACKUP_ACCESS_KEY_ID";
pub const ENV_VAR_SECRET_ACCESS_KEY: &str = "BACKUP_SECRET_ACCESS_KEY";
pub const ENV_VAR_REGION: &str = "BACKUP_REGION";
pub const ENV_VAR_ENDPOINT_URL: &str = "BACKUP_ENDPOINT_URL";
pub const ENV_VAR_LOCAL_STORE: &str = "BACKUP_LOCAL_STORE";
pub const ENV_VAR_OUTPUT_DIR: &str = "BACKUP_OUTPUT_DIR";
pub const ENV_VAR_LOG_DIR: &str = "LOG_DIR";

const DEFAULT_REGION: &str = "us-east-1";
const WRITE_PROBE: &str = ".write_test";

/// Where configuration values come from. The process environment in
/// production, a map in tests.
pub trait VarSource {
    /// `Ok(None)` when the variable is unset. Empty values are returned as-is.
    fn var(&self, name: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn var(&self, name: &str) -> Result<Option<String>> {
        match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl VarSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name).cloned())
    }
}

fn non_empty(vars: &dyn VarSource, name: &str) -> Result<Option<String>> {
    Ok(vars.var(name)?.filter(|value| !value.is_empty()))
}

fn required(vars: &dyn VarSource, name: &'static str) -> Result<String> {
    non_empty(vars, name)?.ok_or(Error::MissingEnvVar(name))
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    S3(S3Settings),
    Local { root: PathBuf },
}

impl StoreConfig {
    pub fn from_vars(vars: &dyn VarSource) -> Result<Self> {
        let local = non_empty(vars, ENV_VAR_LOCAL_STORE)?;
        let access_key_id = non_empty(vars, ENV_VAR_ACCESS_KEY_ID)?;
        let secret_access_key = non_empty(vars, ENV_VAR_SECRET_ACCESS_KEY)?;

        match (local, access_key_id, secret_access_key) {
            (Some(root), None, None) => Ok(StoreConfig::Local { root: root.into() }),
            (Some(_), _, _) => Err(Error::InvalidEnvVar {
                name: ENV_VAR_LOCAL_STORE,
                reason: format!("can't be combined with `{ENV_VAR_ACCESS_KEY_ID}`"),
            }),
            (None, None, _) => Err(Error::MissingEnvVar(ENV_VAR_ACCESS_KEY_ID)),
            (None, Some(_), None) => Err(Error::MissingEnvVar(ENV_VAR_SECRET_ACCESS_KEY)),
            (None, Some(access_key_id), Some(secret_access_key)) => {
                let region = non_empty(vars, ENV_VAR_REGION)?
                    .unwrap_or_else(|| DEFAULT_REGION.to_owned());
                let endpoint_url = non_empty(vars, ENV_VAR_ENDPOINT_URL)?;
                Ok(StoreConfig::S3(S3Settings {
                    access_key_id,
                    secret_access_key,
                    region,
                    endpoint_url,
                }))
            }
        }
    }

    pub async fn connect(&self) -> BoxedStore {
        match self {
            StoreConfig::S3(settings) => Box::new(S3Store::new(settings).await),
            StoreConfig::Local { root } => Box::new(LocalStore::new(root.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub container: String,
    pub store: StoreConfig,
}

impl RemoteConfig {
    pub fn from_vars(vars: &dyn VarSource) -> Result<Self> {
        let container = required(vars, ENV_VAR_CONTAINER)?;
        let store = StoreConfig::from_vars(vars)?;
        Ok(RemoteConfig { container, store })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub source_directory: PathBuf,
    pub output_directory: PathBuf,
    pub remote: RemoteConfig,
}

impl BackupConfig {
    /// `output_directory` from the command line wins over the environment,
    /// which wins over the current directory.
    pub fn new(
        directory: &Path,
        output_directory: Option<PathBuf>,
        vars: &dyn VarSource,
    ) -> Result<Self> {
        let remote = RemoteConfig::from_vars(vars)?;
        let source_directory = validate_source_directory(directory)?;

        let output_directory = match output_directory {
            Some(dir) => dir,
            None => match non_empty(vars, ENV_VAR_OUTPUT_DIR)? {
                Some(dir) => PathBuf::from(dir),
                None => env::current_dir()?,
            },
        };
        ensure_writable(&output_directory)?;

        Ok(BackupConfig {
            source_directory,
            output_directory,
            remote,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    pub policy: RetentionPolicy,
    pub remote: RemoteConfig,
}

impl CleanupConfig {
    pub fn new(retain_days: i64, vars: &dyn VarSource) -> Result<Self> {
        let policy = RetentionPolicy::new(retain_days)?;
        let remote = RemoteConfig::from_vars(vars)?;
        Ok(CleanupConfig { policy, remote })
    }
}

/// Rejects any `..` segment as given, then requires an existing directory.
/// Returns the canonical path.
pub fn validate_source_directory(path: &Path) -> Result<PathBuf> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(Error::PathTraversal(path.to_owned()));
    }

    validate_root(path)
}

/// Creates `dir` if needed and checks that files can be written into it.
pub fn ensure_writable(dir: &Path) -> Result<()> {
    let not_writable = |source| Error::DirectoryNotWritable {
        path: dir.to_owned(),
        source,
    };

    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE);
    File::create(&probe).map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}
