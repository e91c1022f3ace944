//! The managed document store.
//!
//! The integrity layer never interprets document content. It only needs to
//! enumerate documents per category, read their bytes and locate them on
//! disk for streaming digests. [`DocumentStore`] is that seam;
//! [`FsDocumentStore`] is the filesystem implementation used by the CLI.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/<category>/**/<id>.json
//! ```
//!
//! The element id is the file stem. Files ending in `_log.json` are
//! per-document change logs and are not managed documents. Ids are unique
//! across categories: the vault is keyed by id alone.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::persist::{self, Durability, PersistError};

/// Suffix of per-document change logs that are never hashed.
const CHANGE_LOG_SUFFIX: &str = "_log";

/// Errors returned by a [`DocumentStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The category is not managed by this store.
    #[error("unknown category: {category}")]
    UnknownCategory {
        /// The requested category.
        category: String,
    },

    /// No document with this id exists.
    #[error("document not found: {id}")]
    NotFound {
        /// The requested element id.
        id: String,
    },

    /// The id cannot be used as a file stem.
    #[error("invalid element id: {id:?}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },

    /// The id already names a document in another category.
    #[error("element id {id} already exists at {}", existing.display())]
    DuplicateId {
        /// The rejected id.
        id: String,
        /// Location of the document that owns the id.
        existing: PathBuf,
    },

    /// Directory traversal or read failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Atomic write failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Read access to the managed documents, plus the single write path used by
/// document saves.
pub trait DocumentStore: Send + Sync {
    /// Categories managed by this store, in scan order.
    fn categories(&self) -> &[String];

    /// Lists element ids in a category, sorted.
    fn list(&self, category: &str) -> Result<Vec<String>, StoreError>;

    /// Reads the raw bytes of a document.
    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns the on-disk path of an existing document.
    fn path(&self, id: &str) -> Result<PathBuf, StoreError>;

    /// Maps every managed id to its on-disk path in one pass.
    ///
    /// When the same id appears more than once, the first occurrence in
    /// category order wins.
    fn index(&self) -> Result<BTreeMap<String, PathBuf>, StoreError>;

    /// Writes a document, replacing any existing content, and returns its
    /// path.
    fn write(&self, category: &str, id: &str, content: &[u8]) -> Result<PathBuf, StoreError>;

    /// Lists every managed id across all categories, sorted.
    fn list_all(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.index()?.into_keys().collect())
    }
}

/// Filesystem-backed document store.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    categories: Vec<String>,
}

impl FsDocumentStore {
    /// Creates a store over `root` managing the given categories.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        Self {
            root: root.into(),
            categories,
        }
    }

    /// Root of the document tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_dir(&self, category: &str) -> Result<PathBuf, StoreError> {
        if self.categories.iter().any(|c| c == category) {
            Ok(self.root.join(category))
        } else {
            Err(StoreError::UnknownCategory {
                category: category.to_string(),
            })
        }
    }

    /// Collects `(id, path)` for every document in a category.
    fn walk(&self, category: &str) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let dir = self.category_dir(category)?;
        let mut found = Vec::new();
        if dir.is_dir() {
            collect_documents(&dir, &mut found)?;
        }
        found.sort();
        Ok(found)
    }

    fn locate(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        for category in &self.categories {
            if let Some((_, path)) = self.walk(category)?.into_iter().find(|(found, _)| found == id) {
                return Ok(path);
            }
        }
        Err(StoreError::NotFound { id: id.to_string() })
    }
}

impl DocumentStore for FsDocumentStore {
    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn list(&self, category: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.walk(category)?.into_iter().map(|(id, _)| id).collect())
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.locate(id)?;
        persist::read_bounded(&path, persist::MAX_ARTIFACT_FILE_SIZE).map_err(StoreError::from)
    }

    fn path(&self, id: &str) -> Result<PathBuf, StoreError> {
        self.locate(id)
    }

    fn index(&self) -> Result<BTreeMap<String, PathBuf>, StoreError> {
        let mut index = BTreeMap::new();
        for category in &self.categories {
            for (id, path) in self.walk(category)? {
                match index.entry(id) {
                    Entry::Vacant(slot) => {
                        slot.insert(path);
                    },
                    Entry::Occupied(slot) => {
                        tracing::warn!(
                            id = %slot.key(),
                            kept = %slot.get().display(),
                            ignored = %path.display(),
                            "duplicate element id"
                        );
                    },
                }
            }
        }
        Ok(index)
    }

    fn write(&self, category: &str, id: &str, content: &[u8]) -> Result<PathBuf, StoreError> {
        let dir = self.category_dir(category)?;
        validate_id(id)?;
        let path = match self.locate(id) {
            Ok(existing) if existing.starts_with(&dir) => existing,
            Ok(existing) => {
                return Err(StoreError::DuplicateId {
                    id: id.to_string(),
                    existing,
                });
            },
            Err(StoreError::NotFound { .. }) => dir.join(id).join(format!("{id}.json")),
            Err(e) => return Err(e),
        };
        persist::atomic_write(&path, content, Durability::Standard)?;
        tracing::debug!(id = %id, path = %path.display(), "document written");
        Ok(path)
    }
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.ends_with(CHANGE_LOG_SUFFIX);
    if bad {
        return Err(StoreError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

fn collect_documents(dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<(), StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            collect_documents(&path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.ends_with(CHANGE_LOG_SUFFIX) {
            continue;
        }
        out.push((stem.to_string(), path));
    }
    Ok(())
}
