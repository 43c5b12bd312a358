//! # Extension Data Store
//!
//! Each extension may persist one JSON document under the data directory as
//! `{name}.json`. Writes go to a temporary sibling first and are renamed into
//! place, so a reader sees either the old document or the new one. Saves for
//! the same extension are serialized; they share one temporary file.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Codec(serde_json::Error),
    InvalidName(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Data store I/O error: {}", e),
            Self::Codec(e) => write!(f, "Data store JSON error: {}", e),
            Self::InvalidName(name) => write!(f, "Invalid extension name for data file: '{}'", name),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug)]
pub struct DataStore {
    dir: PathBuf,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_locks: Arc::new(DashMap::new()),
        }
    }

    fn write_lock(&self, extension: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(extension.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, extension: &str) -> Result<PathBuf> {
        let valid = !extension.is_empty()
            && extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidName(extension.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", extension)))
    }

    /// Replaces the extension's document.
    pub async fn save(&self, extension: &str, data: &Value) -> Result<()> {
        let path = self.path_for(extension)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(data)?;

        let lock = self.write_lock(extension);
        let _guard = lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(extension, path = %path.display(), bytes = bytes.len(), "saved extension data");
        Ok(())
    }

    /// Reads the extension's document. A missing file reads as `{}`.
    pub async fn load(&self, extension: &str) -> Result<Value> {
        let path = self.path_for(extension)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Default::default())),
            Err(e) => Err(e.into()),
        }
    }
}
