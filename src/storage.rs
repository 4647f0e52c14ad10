// 配置存储
// Blob-file configuration store and the typed documents kept in it

use crate::types::{NetworkParams, PollingConfig, SlaveDocument};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SLAVES_PATH: &str = "/slaves.json";
pub const POLLING_PATH: &str = "/polling.json";
pub const TEMPLATES_PATH: &str = "/templates.json";
pub const NETWORK_PATH: &str = "/network.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/blob storage addressed by absolute-style paths such as `/slaves.json`
pub trait ConfigStore {
    /// `Ok(None)` when the blob does not exist
    fn read(&self, path: &str) -> Result<Option<String>, StoreError>;
    fn write(&mut self, path: &str, content: &str) -> Result<(), StoreError>;
    fn exists(&self, path: &str) -> bool;
}

/// Files under a data directory
#[derive(Debug)]
pub struct FsConfigStore {
    root: PathBuf,
}

impl FsConfigStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.display().to_string(),
            source,
        })?;
        info!("Config store mounted at {}", root.display());
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ConfigStore for FsConfigStore {
    fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.resolve(path)) {
            Ok(content) => {
                debug!("Read {} bytes from {}", content.len(), path);
                Ok(Some(content))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), StoreError> {
        let target = self.resolve(path);
        // staged write, renamed over the target
        let staging = target.with_extension("json.tmp");
        fs::write(&staging, content)
            .and_then(|_| fs::rename(&staging, &target))
            .map_err(|source| StoreError::Io {
                path: path.to_string(),
                source,
            })?;
        debug!("Wrote {} bytes to {}", content.len(), path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: impl Into<String>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        Ok(self.files.get(path).cloned())
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), StoreError> {
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

thread_local! {
    static REPORTED_MISSING: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Warn about a missing file only the first time it is seen
fn report_missing_once(path: &str) {
    let first = REPORTED_MISSING.with(|seen| seen.borrow_mut().insert(path.to_string()));
    if first {
        warn!("{} not found, using defaults", path);
    }
}

pub fn read_json<T: DeserializeOwned>(
    store: &dyn ConfigStore,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match store.read(path)? {
        None => Ok(None),
        Some(content) if content.trim().is_empty() => Ok(None),
        Some(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.to_string(),
                source,
            }),
    }
}

pub fn write_json<T: Serialize>(
    store: &mut dyn ConfigStore,
    path: &str,
    value: &T,
) -> Result<(), StoreError> {
    let content = serde_json::to_string(value).map_err(|source| StoreError::Json {
        path: path.to_string(),
        source,
    })?;
    store.write(path, &content)
}

/// `/slaves.json`, or `None` if it has never been written
pub fn load_slave_document(store: &dyn ConfigStore) -> Result<Option<SlaveDocument>, StoreError> {
    let doc = read_json(store, SLAVES_PATH)?;
    if doc.is_none() {
        report_missing_once(SLAVES_PATH);
    }
    Ok(doc)
}

pub fn save_slave_document(
    store: &mut dyn ConfigStore,
    doc: &SlaveDocument,
) -> Result<(), StoreError> {
    write_json(store, SLAVES_PATH, doc)?;
    info!("Saved {} slave entries", doc.slaves.len());
    Ok(())
}

/// `/polling.json`; falls back to 10 s / 1 s when absent
pub fn load_polling_config(store: &dyn ConfigStore) -> Result<PollingConfig, StoreError> {
    match read_json(store, POLLING_PATH)? {
        Some(config) => Ok(config),
        None => {
            report_missing_once(POLLING_PATH);
            Ok(PollingConfig::default())
        }
    }
}

pub fn save_polling_config(
    store: &mut dyn ConfigStore,
    config: &PollingConfig,
) -> Result<(), StoreError> {
    write_json(store, POLLING_PATH, config)?;
    info!(
        "Saved polling config: interval={}s, timeout={}s",
        config.poll_interval, config.timeout
    );
    Ok(())
}

/// Persistent network / broker parameters
pub fn load_network_params(store: &dyn ConfigStore) -> Result<NetworkParams, StoreError> {
    match read_json(store, NETWORK_PATH)? {
        Some(params) => Ok(params),
        None => {
            report_missing_once(NETWORK_PATH);
            Ok(NetworkParams::default())
        }
    }
}

pub fn save_network_params(
    store: &mut dyn ConfigStore,
    params: &NetworkParams,
) -> Result<(), StoreError> {
    write_json(store, NETWORK_PATH, params)
}
