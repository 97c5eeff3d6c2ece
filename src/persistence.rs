//! JSON persistence for the catalog.
//!
//! The document is a single object whose `livros` key holds the books in
//! catalog order:
//!
//! ```text
//! {
//!   "livros": [
//!     { "titulo": "Dune", "autor": "Herbert", "genero": "SciFi", "exemplares": 2 }
//!   ]
//! }
//! ```
//!
//! It is read once at startup and rewritten in full after every mutation.
//! Writes go to a sibling `.tmp` file that is then renamed over the target, so
//! a reader never sees a half-written document. Rewrites run on `tokio::fs`
//! so the session task never blocks the runtime thread.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::catalog::{Book, Catalog};

/// Startup failure reading the catalog document. Fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read catalog file '{}': {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Malformed catalog file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Failure rewriting the catalog document. Logged, never rolled back.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to serialize catalog: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to write catalog file '{}': {}", .0.display(), .1)]
    Write(PathBuf, #[source] std::io::Error),
}

#[derive(Deserialize)]
struct CatalogDocument {
    livros: Vec<Book>,
}

#[derive(Serialize)]
struct CatalogDocumentRef<'a> {
    livros: &'a [Book],
}

/// Reads and rewrites the catalog document at a fixed path
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse the document into a catalog.
    ///
    /// A missing file, invalid JSON, a missing `livros` key or an entry
    /// lacking one of its four fields are all errors; there is no empty
    /// catalog fallback.
    pub fn load(&self) -> Result<Catalog, LoadError> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| LoadError::Read(self.path.clone(), e))?;
        let document: CatalogDocument = serde_json::from_str(&contents)
            .map_err(|e| LoadError::Parse(self.path.clone(), e))?;

        debug!(path = %self.path.display(), books = document.livros.len(), "Catalog loaded");
        Ok(Catalog::from_books(document.livros))
    }

    /// Rewrite the whole document from `catalog`, pretty-printed.
    ///
    /// A failed rename removes the staging file before returning.
    pub async fn persist(&self, catalog: &Catalog) -> Result<(), PersistError> {
        let document = CatalogDocumentRef {
            livros: catalog.books(),
        };
        let json = serde_json::to_string_pretty(&document).map_err(PersistError::Serialize)?;

        let staging = self.staging_path();
        fs::write(&staging, json)
            .await
            .map_err(|e| PersistError::Write(staging.clone(), e))?;
        if let Err(e) = fs::rename(&staging, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                debug!(path = %staging.display(), error = %cleanup, "Failed to remove staging file");
            }
            return Err(PersistError::Write(self.path.clone(), e));
        }

        info!(path = %self.path.display(), "Catalog file updated");
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}
