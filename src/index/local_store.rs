use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use tokio::fs;

use super::store::{decode, encode, IndexStore, IndexStoreError};
use super::VectorIndex;
use crate::config::IndexConfig;

/// Keeps the index in one JSON file, replaced via write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct LocalIndexStore {
    path: PathBuf,
}

impl LocalIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(&config.path)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> IndexStoreError {
        IndexStoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl IndexStore for LocalIndexStore {
    async fn load(&self) -> Result<Option<VectorIndex>, IndexStoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No index at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(&self.path, e)),
        };
        let index = decode(&bytes)?;
        info!(
            "Loaded index with {} documents from {}",
            index.len(),
            self.path.display()
        );
        Ok(Some(index))
    }

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexStoreError> {
        let bytes = encode(index)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(parent, e))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &bytes)
            .await
            .map_err(|e| self.io_error(&temp, e))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(&self.path, e))?;

        info!(
            "Saved index with {} documents to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
