//! The per-session metadata store.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use foreman_models::{id_sort_key, is_valid_session_id};

use crate::atomic::atomic_write;
use crate::codec;
use crate::error::{Result, StoreError};

/// Derives the storage root for one orchestrator instance.
///
/// The root is `<state_dir>/<first 8 hex chars of SHA-256 of the config
/// path>`, so independent orchestrators (distinct config files) coexist on
/// one host without collision.
pub fn storage_root(state_dir: &Path, config_path: &Path) -> PathBuf {
    let canonical = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let digest = Sha256::digest(canonical.display().to_string().as_bytes());
    state_dir.join(&hex::encode(digest)[..8])
}

/// Flat-file metadata store: one `key=value` file per session under
/// `<root>/sessions/`, archived files under `<root>/archive/`.
///
/// Reservation is the only way ids are claimed (exclusive create).
/// Merge-updates serialize through a per-id mutex and land via atomic
/// rename, so concurrent writers (the poll loop and the in-workspace
/// agent hook) never expose a partial file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// Path of a session's metadata file. Fails on invalid ids so an id
    /// can never traverse outside the sessions directory.
    pub fn metadata_path(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.sessions_dir().join(id))
    }

    /// Claims an id by creating its metadata file exclusively.
    ///
    /// Returns `AlreadyReserved` when the file exists; the caller retries
    /// with the next integer suffix.
    pub fn reserve(&self, id: &str) -> Result<()> {
        let path = self.metadata_path(id)?;
        let dir = self.sessions_dir();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(id = %id, "reserved session id");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyReserved(id.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Reads a session's metadata, or `None` if the file does not exist.
    pub fn read(&self, id: &str) -> Result<Option<HashMap<String, String>>> {
        let path = self.metadata_path(id)?;
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(codec::decode(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Read-merge-write under the id's exclusive section.
    ///
    /// Keys absent from `patch` are left alone; keys whose patch value is
    /// the empty string are removed. Returns the merged map.
    pub fn update_merge(
        &self,
        id: &str,
        patch: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let path = self.metadata_path(id)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut map = match fs::read_to_string(&path) {
            Ok(data) => codec::decode(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        for (key, value) in patch {
            if value.is_empty() {
                map.remove(key);
            } else {
                map.insert(key.clone(), value.clone());
            }
        }

        atomic_write(&path, codec::encode(&map).as_bytes())?;
        Ok(map)
    }

    /// Moves a session's metadata into `archive/` with a timestamp suffix.
    pub fn archive(&self, id: &str) -> Result<PathBuf> {
        let path = self.metadata_path(id)?;
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let dir = self.archive_dir();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let target = dir.join(format!("{id}.{stamp}"));
        fs::rename(&path, &target).map_err(|source| StoreError::Io { path, source })?;

        self.locks.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        debug!(id = %id, target = %target.display(), "archived session metadata");
        Ok(target)
    }

    /// Lists ids of all sessions with a metadata file, naturally sorted.
    ///
    /// Entries whose name fails id validation are skipped (and logged):
    /// anything else in the directory is not ours.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.sessions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_valid_session_id(&name) {
                ids.push(name);
            } else {
                warn!(name = %name, "skipping non-session file in sessions dir");
            }
        }
        ids.sort_by_key(|id| id_sort_key(id));
        Ok(ids)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }
}
