use async_trait::async_trait;
use thiserror::Error;

use super::{IndexError, VectorIndex, INDEX_FORMAT_VERSION};

/// Durable home of the single persisted [`VectorIndex`].
///
/// `save` replaces whatever was stored before in full; readers never observe a
/// partially written index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// `Ok(None)` when no index has been persisted yet.
    async fn load(&self) -> Result<Option<VectorIndex>, IndexStoreError>;

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexStoreError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

#[derive(Error, Debug)]
pub enum IndexStoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid index data: {0}")]
    InvalidJsonFormat(#[from] serde_json::Error),

    #[error("Index format version {found} is not supported (expected {})", INDEX_FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },

    #[error("Persisted index is inconsistent: {0}")]
    InconsistentIndex(#[from] IndexError),

    #[error("Remote store error: {0}")]
    Remote(String),
}

pub(crate) fn decode(bytes: &[u8]) -> Result<VectorIndex, IndexStoreError> {
    let index: VectorIndex = serde_json::from_slice(bytes)?;
    if index.format_version() != INDEX_FORMAT_VERSION {
        return Err(IndexStoreError::UnsupportedVersion {
            found: index.format_version(),
        });
    }
    index.validate()?;
    Ok(index)
}

impl IndexStoreError {
    /// The stored bytes are unusable but can be replaced by a fresh build.
    pub fn is_unreadable_index(&self) -> bool {
        matches!(
            self,
            IndexStoreError::InvalidJsonFormat(_)
                | IndexStoreError::UnsupportedVersion { .. }
                | IndexStoreError::InconsistentIndex(_)
        )
    }
}

pub(crate) fn encode(index: &VectorIndex) -> Result<Vec<u8>, IndexStoreError> {
    Ok(serde_json::to_vec(index)?)
}
