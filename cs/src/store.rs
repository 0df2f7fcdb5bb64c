//! Core Store implementation

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StoreError;

const LOCK_FILE: &str = ".lock";
const EXTENSION: &str = "json";

/// A record that can be persisted in the store
///
/// Documents are addressed by `(collection_name, scope, id)`. Writing a
/// document with an existing address replaces it.
pub trait Document: Serialize + DeserializeOwned {
    /// Directory name for this document type (e.g. "plans")
    fn collection_name() -> &'static str;

    /// Grouping key (e.g. a project ID)
    fn scope(&self) -> &str;

    /// Identifier within the scope (e.g. a task ID)
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds), used for list ordering
    fn updated_at(&self) -> i64;
}

/// File-backed document store
#[derive(Debug, Clone)]
pub struct Store {
    base_path: PathBuf,
}

impl Store {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| StoreError::io(&base_path, e))?;
        debug!(?base_path, "Opened checkpoint store");
        Ok(Self { base_path })
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write a document, replacing any previous version
    pub fn put<D: Document>(&self, doc: &D) -> Result<(), StoreError> {
        let scope = doc.scope();
        let id = doc.id();
        debug!(collection = D::collection_name(), %scope, %id, "put: called");
        validate_key(scope)?;
        validate_key(id)?;

        let dir = self.scope_dir(D::collection_name(), scope);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(doc)?;
        let target = dir.join(format!("{}.{}", id, EXTENSION));

        let lock = open_lock(&dir)?;
        lock.lock_exclusive().map_err(|e| StoreError::Lock {
            path: dir.join(LOCK_FILE),
            source: e,
        })?;

        let result = write_atomic(&dir, &target, &json);

        if let Err(e) = FileExt::unlock(&lock) {
            warn!(path = ?dir, error = %e, "Failed to release store lock");
        }

        result?;
        debug!(?target, bytes = json.len(), "put: document written");
        Ok(())
    }

    /// Read a document by scope and id
    pub fn get<D: Document>(&self, scope: &str, id: &str) -> Result<Option<D>, StoreError> {
        debug!(collection = D::collection_name(), %scope, %id, "get: called");
        validate_key(scope)?;
        validate_key(id)?;

        let dir = self.scope_dir(D::collection_name(), scope);
        let target = dir.join(format!("{}.{}", id, EXTENSION));
        if !target.exists() {
            debug!(?target, "get: document not found");
            return Ok(None);
        }

        let lock = open_lock(&dir)?;
        lock.lock_shared().map_err(|e| StoreError::Lock {
            path: dir.join(LOCK_FILE),
            source: e,
        })?;
        let content = fs::read(&target).map_err(|e| StoreError::io(&target, e));
        if let Err(e) = FileExt::unlock(&lock) {
            warn!(path = ?dir, error = %e, "Failed to release store lock");
        }

        let doc = serde_json::from_slice(&content?)?;
        Ok(Some(doc))
    }

    /// Check whether a document exists
    pub fn exists<D: Document>(&self, scope: &str, id: &str) -> Result<bool, StoreError> {
        validate_key(scope)?;
        validate_key(id)?;
        Ok(self
            .scope_dir(D::collection_name(), scope)
            .join(format!("{}.{}", id, EXTENSION))
            .exists())
    }

    /// List documents, optionally restricted to one scope, newest first
    pub fn list<D: Document>(&self, scope: Option<&str>) -> Result<Vec<D>, StoreError> {
        debug!(collection = D::collection_name(), ?scope, "list: called");
        let collection_dir = self.base_path.join(D::collection_name());
        if !collection_dir.exists() {
            return Ok(Vec::new());
        }

        let scope_dirs: Vec<PathBuf> = match scope {
            Some(s) => {
                validate_key(s)?;
                vec![collection_dir.join(s)]
            }
            None => read_dir_paths(&collection_dir)?
                .into_iter()
                .filter(|p| p.is_dir())
                .collect(),
        };

        let mut docs: Vec<D> = Vec::new();
        for dir in scope_dirs {
            if !dir.exists() {
                continue;
            }
            for path in read_dir_paths(&dir)? {
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let content = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
                match serde_json::from_slice::<D>(&content) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => warn!(?path, error = %e, "Skipping unreadable document"),
                }
            }
        }

        docs.sort_by_key(|d| std::cmp::Reverse(d.updated_at()));
        debug!(count = docs.len(), "list: complete");
        Ok(docs)
    }

    fn scope_dir(&self, collection: &str, scope: &str) -> PathBuf {
        self.base_path.join(collection).join(scope)
    }
}

/// Reject keys that would escape or collide with the directory layout
fn validate_key(key: &str) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        Some("must not be empty")
    } else if key.starts_with('.') {
        Some("must not start with '.'")
    } else if key.contains(['/', '\\', '\0']) {
        Some("must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn open_lock(dir: &Path) -> Result<fs::File, StoreError> {
    let path = dir.join(LOCK_FILE);
    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!(".{}.tmp", Uuid::now_v7()));
    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(target, e));
    }
    Ok(())
}

fn read_dir_paths(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        paths.push(entry.path());
    }
    Ok(paths)
}
