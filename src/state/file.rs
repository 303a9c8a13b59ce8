//! TOML-backed state store.
//!
//! ```toml
//! version = 1
//!
//! [policies."{31B2F340-016D-11D2-945F-00C04FB984F9}".9f86d081884c7d65]
//! hash = "5F2A..."
//! files = ["/etc/cron.d/gp_k2Jd9a"]
//! ```
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt as _;
use serde::{Deserialize, Serialize};

use super::{StateRecord, StateStore, StateTable};
use crate::error::StoreError;

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    policies: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

const fn default_version() -> u32 {
    FORMAT_VERSION
}

/// A [`StateStore`] persisted as a TOML file.
///
/// Loads take a shared lock and commits an exclusive lock on a sibling
/// `.lock` file; the state file itself is replaced by rename so readers never
/// observe a partial write.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    table: StateTable,
}

impl FileStateStore {
    /// Open the store at `path`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read or locked, or
    /// [`StoreError::Unreadable`] if it is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                table: StateTable::default(),
            });
        }

        let lock = open_lock_file(&path)?;
        lock.lock_shared().map_err(|e| io_error(&path, e))?;

        let mut content = String::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_string(&mut content))
            .map_err(|e| io_error(&path, e))?;

        let file: StateFile = toml::from_str(&content).map_err(|e| StoreError::Unreadable {
            path: path.clone(),
            message: e.message().to_string(),
        })?;

        // Lock released when `lock` is dropped
        Ok(Self {
            path,
            table: StateTable {
                policies: file.policies,
            },
        })
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn get(&self, guid: &str, attribute: &str) -> Result<Option<StateRecord>, StoreError> {
        self.table.get(guid, attribute)
    }

    fn set(&mut self, guid: &str, attribute: &str, record: &StateRecord) -> Result<(), StoreError> {
        self.table.set(guid, attribute, record)
    }

    fn delete(&mut self, guid: &str, attribute: &str) {
        self.table.delete(guid, attribute);
    }

    fn attributes(&self, guid: &str) -> Vec<String> {
        self.table.attributes(guid)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(&StateFile {
            version: FORMAT_VERSION,
            policies: self.table.policies.clone(),
        })
        .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let dir = parent_dir(&self.path);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let lock = open_lock_file(&self.path)?;
        lock.lock_exclusive().map_err(|e| io_error(&self.path, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".state")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| io_error(&dir, e))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| io_error(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| io_error(&self.path, e.error))?;

        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    let lock_path = PathBuf::from(name);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| io_error(&lock_path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
