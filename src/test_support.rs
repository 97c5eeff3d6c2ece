//! Scratch catalog files for tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `livros.json` inside a fresh temp dir. The dir goes away on drop.
pub struct TempCatalog {
    _dir: TempDir,
    path: PathBuf,
}

impl TempCatalog {
    /// A path that does not exist yet.
    pub fn missing() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livros.json");
        Self { _dir: dir, path }
    }

    pub fn with_contents(contents: &str) -> Self {
        let file = Self::missing();
        std::fs::write(&file.path, contents).unwrap();
        file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn staging_path(&self) -> PathBuf {
        self.path.with_file_name("livros.json.tmp")
    }

    pub fn read_json(&self) -> serde_json::Value {
        let contents = std::fs::read_to_string(&self.path).unwrap();
        serde_json::from_str(&contents).unwrap()
    }
}
