//! Read-only document sources.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DocumentReadError, SourceError};
use crate::models::Document;

/// Enumerates and reads the documents of a corpus.
///
/// Both calls block; the batch coordinator invokes them from blocking threads.
pub trait DocumentStore: Send + Sync {
    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;

    /// Keys of every document in the corpus, in a stable order.
    ///
    /// Fails only when the source as a whole cannot be enumerated. An empty
    /// source is `Ok(vec![])`.
    fn list(&self) -> Result<Vec<String>, SourceError>;

    fn read(&self, key: &str) -> Result<Document, DocumentReadError>;
}

/// A directory of `*.json` records, one document per file.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_json_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
}

impl DocumentStore for DirectoryStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn list(&self) -> Result<Vec<String>, SourceError> {
        let entries = fs::read_dir(&self.root).map_err(|source| SourceError {
            location: self.describe(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.describe(), e);
                    continue;
                }
            };

            let path = entry.path();
            if !is_json_file(&path) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => keys.push(name),
                Err(name) => warn!("Skipping non UTF-8 file name {:?}", name),
            }
        }

        keys.sort();
        debug!("Found {} documents in {}", keys.len(), self.describe());
        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Document, DocumentReadError> {
        let bytes = fs::read(self.root.join(key)).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                DocumentReadError::Missing {
                    key: key.to_string(),
                }
            } else {
                DocumentReadError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })?;

        serde_json::from_slice(&bytes).map_err(|source| DocumentReadError::Malformed {
            key: key.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
enum StoredDocument {
    Parsed(Document),
    Raw(String),
}

/// Documents held in memory, listed in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Vec<(String, StoredDocument)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let mut store = Self::new();
        for document in documents {
            let key = format!("{}.json", document.post.post_id);
            store.insert(key, document);
        }
        store
    }

    pub fn insert(&mut self, key: impl Into<String>, document: Document) {
        self.documents.push((key.into(), StoredDocument::Parsed(document)));
    }

    /// Stores undecoded JSON; decoding happens on `read`.
    pub fn insert_raw(&mut self, key: impl Into<String>, json: impl Into<String>) {
        self.documents.push((key.into(), StoredDocument::Raw(json.into())));
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for MemoryStore {
    fn describe(&self) -> String {
        format!("memory ({} documents)", self.documents.len())
    }

    fn list(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.documents.iter().map(|(key, _)| key.clone()).collect())
    }

    fn read(&self, key: &str) -> Result<Document, DocumentReadError> {
        let stored = self
            .documents
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, stored)| stored)
            .ok_or_else(|| DocumentReadError::Missing {
                key: key.to_string(),
            })?;

        match stored {
            StoredDocument::Parsed(document) => Ok(document.clone()),
            StoredDocument::Raw(json) => {
                serde_json::from_str(json).map_err(|source| DocumentReadError::Malformed {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }
}
