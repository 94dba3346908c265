//! File-backed configuration document
//!
//! Holds two copies of the document: the working copy that mutations edit and
//! the committed copy matching the file on disk. `undo_changes` discards the
//! working copy; `save` writes it atomically and commits it.

use crate::error::{Result, StoreError};
use crate::path;
use crate::rules::RuleSet;
use cfgd_problem::ProblemSet;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug)]
struct Documents {
    working: Value,
    committed: Value,
}

/// YAML configuration store
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    documents: RwLock<Documents>,
}

impl ConfigStore {
    /// Load the document at `path`
    ///
    /// A missing file yields an empty document that `save` will create.
    ///
    /// # Errors
    /// - `StoreError::Io` if the file exists but cannot be read
    /// - `StoreError::Yaml` if it is not YAML
    /// - `StoreError::InvalidRoot` if the top level is not a mapping
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(text) => parse_root(&path, &text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "configuration file missing, starting empty"
                );
                Value::Mapping(Mapping::new())
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        Ok(Self::with_document(path, document))
    }

    /// Store over an in-memory document, saved to `path`
    ///
    /// # Errors
    /// - `StoreError::Yaml` / `StoreError::InvalidRoot` as for [`ConfigStore::open`]
    pub fn from_yaml(path: impl Into<PathBuf>, yaml: &str) -> Result<Self> {
        let path = path.into();
        let document = parse_root(&path, yaml)?;
        Ok(Self::with_document(path, document))
    }

    fn with_document(path: PathBuf, document: Value) -> Self {
        Self {
            path,
            documents: RwLock::new(Documents {
                working: document.clone(),
                committed: document,
            }),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value at a dotted path in the working copy
    ///
    /// # Errors
    /// - `StoreError::InvalidPath` for empty segments
    pub fn get(&self, dotted: &str) -> Result<Option<Value>> {
        let segments = path::segments(dotted)?;
        Ok(path::lookup(&self.documents.read().working, &segments).cloned())
    }

    /// Typed value at a dotted path
    ///
    /// # Errors
    /// - `StoreError::InvalidPath` for empty segments
    /// - `StoreError::Yaml` if the value does not deserialize as `T`
    pub fn get_as<T: DeserializeOwned>(&self, dotted: &str) -> Result<Option<T>> {
        self.get(dotted)?
            .map(serde_yaml::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Write a value into the working copy
    ///
    /// # Errors
    /// - `StoreError::InvalidPath` for empty segments
    /// - `StoreError::NotAMapping` if a parent is a scalar or sequence
    /// - `StoreError::Yaml` if `value` cannot be represented
    pub fn set<T: Serialize>(&self, dotted: &str, value: T) -> Result<()> {
        let segments = path::segments(dotted)?;
        let value = serde_yaml::to_value(value)?;
        path::assign(&mut self.documents.write().working, &segments, value)?;
        tracing::debug!(path = dotted, "configuration value set");
        Ok(())
    }

    /// Remove a value from the working copy, returning it
    ///
    /// # Errors
    /// - `StoreError::InvalidPath` for empty segments
    pub fn remove(&self, dotted: &str) -> Result<Option<Value>> {
        let segments = path::segments(dotted)?;
        Ok(path::remove(&mut self.documents.write().working, &segments))
    }

    /// Discard uncommitted changes
    ///
    /// Safe to call in any state, including after a partially applied edit
    /// and repeatedly.
    pub fn undo_changes(&self) {
        let mut documents = self.documents.write();
        if documents.working != documents.committed {
            tracing::info!(
                path = %self.path.display(),
                "uncommitted configuration changes discarded"
            );
        }
        documents.working = documents.committed.clone();
    }

    /// Persist the working copy and commit it
    ///
    /// The file is replaced atomically: written to a temporary file in the
    /// same directory, synced, then renamed over the target.
    ///
    /// # Errors
    /// - `StoreError::Yaml` if the document cannot be serialized
    /// - `StoreError::Io` if writing or renaming fails; the committed copy is
    ///   then unchanged
    pub fn save(&self) -> Result<()> {
        let mut documents = self.documents.write();
        let yaml = serde_yaml::to_string(&documents.working)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut staged = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        staged
            .write_all(yaml.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| StoreError::io(staged.path(), e))?;
        staged
            .persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        documents.committed = documents.working.clone();
        tracing::info!(path = %self.path.display(), bytes = yaml.len(), "configuration saved");
        Ok(())
    }

    /// True when the working copy differs from the committed one
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let documents = self.documents.read();
        documents.working != documents.committed
    }

    /// Copy of the working document
    #[must_use]
    pub fn document(&self) -> Value {
        self.documents.read().working.clone()
    }

    /// Run `rules` against the working copy
    #[must_use]
    pub fn validate(&self, rules: &RuleSet) -> ProblemSet {
        rules.check(&self.documents.read().working)
    }
}

fn parse_root(path: &Path, text: &str) -> Result<Value> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        root @ Value::Mapping(_) => Ok(root),
        _ => Err(StoreError::InvalidRoot {
            path: path.to_path_buf(),
        }),
    }
}
