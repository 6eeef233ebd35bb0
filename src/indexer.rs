use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::embedding::{Embedder, EmbeddingError};
use crate::index::{IndexError, IndexStore, IndexStoreError, IndexedDocument, VectorIndex};
use crate::semantic_layer::{SchemaMetadataDocument, SemanticLayer, SemanticLayerError};

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("The semantic layer returned no columns")]
    NoMetadata,
    #[error("Failed to fetch metadata: {0}")]
    SemanticLayer(#[from] SemanticLayerError),
    #[error("Failed to embed metadata: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Embedding service returned {actual} vectors for {expected} documents")]
    EmbeddingCount { expected: usize, actual: usize },
    #[error("Failed to assemble index: {0}")]
    Index(#[from] IndexError),
    #[error("Failed to access index store: {0}")]
    Store(#[from] IndexStoreError),
}

/// Text that gets embedded for a column.
pub fn document_text(doc: &SchemaMetadataDocument) -> String {
    let mut parts = vec![
        doc.table_name.as_str(),
        doc.column_name.as_str(),
        doc.column_title.as_str(),
    ];
    if let Some(description) = doc.column_description.as_deref() {
        parts.push(description);
    }
    let kind = format!("{} ({})", doc.column_member_type, doc.column_data_type);
    let mut text = parts.join(", ");
    text.push_str(", ");
    text.push_str(&kind);
    text
}

/// Fetches schema metadata, embeds every column and persists the result.
pub struct MetadataIndexer {
    layer: Arc<dyn SemanticLayer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
}

impl MetadataIndexer {
    pub fn new(
        layer: Arc<dyn SemanticLayer>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            layer,
            embedder,
            store,
        }
    }

    pub fn store(&self) -> &dyn IndexStore {
        self.store.as_ref()
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Builds a complete index. Nothing is persisted unless every step succeeds.
    pub async fn build_index(&self) -> Result<VectorIndex, IndexerError> {
        let documents = self.layer.fetch_metadata().await?;
        if documents.is_empty() {
            return Err(IndexerError::NoMetadata);
        }

        let texts: Vec<String> = documents.iter().map(document_text).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != documents.len() {
            return Err(IndexerError::EmbeddingCount {
                expected: documents.len(),
                actual: embeddings.len(),
            });
        }

        let entries = documents
            .into_iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((document, text), embedding)| IndexedDocument {
                document,
                text,
                embedding,
            })
            .collect();
        let index = VectorIndex::new(self.embedder.model_name(), entries)?;

        self.store.save(&index).await?;
        info!(
            "Indexed {} columns across {} tables ({} dimensions) into {}",
            index.len(),
            index.tables().len(),
            index.dimension(),
            self.store.location()
        );
        Ok(index)
    }
}

/// Shares the current index between concurrent questions.
///
/// Readers clone the `Arc` and keep using that snapshot even if a rebuild
/// swaps in a new index meanwhile. Loads and rebuilds are serialised.
pub struct IndexManager {
    indexer: MetadataIndexer,
    current: RwLock<Option<Arc<VectorIndex>>>,
    rebuild_lock: Mutex<()>,
}

impl IndexManager {
    pub fn new(indexer: MetadataIndexer) -> Self {
        Self {
            indexer,
            current: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().await.clone()
    }

    /// Returns the in-memory index, loading it from the store or building it on first use.
    pub async fn ensure_loaded(&self) -> Result<Arc<VectorIndex>, IndexerError> {
        if let Some(index) = self.current().await {
            return Ok(index);
        }

        let _guard = self.rebuild_lock.lock().await;
        // Another caller may have finished loading while we waited.
        if let Some(index) = self.current().await {
            return Ok(index);
        }

        let persisted = match self.indexer.store().load().await {
            Ok(persisted) => persisted,
            Err(e) if e.is_unreadable_index() => {
                warn!(
                    "Persisted index at {} is unreadable ({}), rebuilding",
                    self.indexer.store().location(),
                    e
                );
                let index = self.indexer.build_index().await?;
                return Ok(self.install(index).await);
            }
            Err(e) => return Err(e.into()),
        };

        let index = match persisted {
            Some(index) if index.embedding_model() == self.indexer.embedding_model() => {
                debug!("Using persisted index from {}", self.indexer.store().location());
                index
            }
            Some(index) => {
                warn!(
                    "Persisted index was built with {} but {} is configured, rebuilding",
                    index.embedding_model(),
                    self.indexer.embedding_model()
                );
                self.indexer.build_index().await?
            }
            None => {
                info!("No persisted index found, building one");
                self.indexer.build_index().await?
            }
        };
        Ok(self.install(index).await)
    }

    /// Builds a fresh index and swaps it in. On failure the previous index stays current.
    pub async fn rebuild(&self) -> Result<Arc<VectorIndex>, IndexerError> {
        let _guard = self.rebuild_lock.lock().await;
        let index = self.indexer.build_index().await?;
        Ok(self.install(index).await)
    }

    async fn install(&self, index: VectorIndex) -> Arc<VectorIndex> {
        let index = Arc::new(index);
        *self.current.write().await = Some(Arc::clone(&index));
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LocalIndexStore;
    use crate::semantic_layer::MemberType;
    use crate::test_support::{
        column, FailingEmbedder, KeywordEmbedder, MemoryIndexStore, StaticSemanticLayer,
    };
    use rstest::*;

    #[rstest]
    #[case::with_description(
        Some("Sum of order value"),
        "Orders, Orders.total, Total, Sum of order value, measure (number)"
    )]
    #[case::without_description(None, "Orders, Orders.total, Total, measure (number)")]
    fn test_document_text(#[case] description: Option<&str>, #[case] expected: &str) {
        let mut doc = column("Orders", "total", MemberType::Measure, "number");
        doc.column_title = "Total".to_string();
        doc.column_description = description.map(str::to_string);
        assert_eq!(document_text(&doc), expected);
    }

    fn orders_layer() -> Arc<StaticSemanticLayer> {
        Arc::new(StaticSemanticLayer::new(vec![
            column("Orders", "count", MemberType::Measure, "number"),
            column("Orders", "status", MemberType::Dimension, "string"),
        ]))
    }

    #[tokio::test]
    async fn test_build_index_persists_every_column() {
        let store = Arc::new(MemoryIndexStore::default());
        let indexer = MetadataIndexer::new(
            orders_layer(),
            Arc::new(KeywordEmbedder::default()),
            store.clone(),
        );

        let index = indexer.build_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(store.saves(), 1);
        assert_eq!(store.load().await.unwrap(), Some(index));
    }

    fn warehouse_columns() -> Vec<SchemaMetadataDocument> {
        vec![
            column("Orders", "count", MemberType::Measure, "number"),
            column("Orders", "status", MemberType::Dimension, "string"),
            column("Customers", "city", MemberType::Dimension, "string"),
            column("Events", "happened_at", MemberType::Dimension, "time"),
            column("Events", "count", MemberType::Measure, "number"),
            column("Customers", "count", MemberType::Measure, "number"),
        ]
    }

    fn table_names(index: &VectorIndex) -> Vec<&str> {
        index.tables().into_iter().collect()
    }

    #[tokio::test]
    async fn test_index_covers_every_table() {
        let store = Arc::new(MemoryIndexStore::default());
        let indexer = MetadataIndexer::new(
            Arc::new(StaticSemanticLayer::new(warehouse_columns())),
            Arc::new(KeywordEmbedder::default()),
            store.clone(),
        );

        let index = indexer.build_index().await.unwrap();
        assert_eq!(index.len(), 6);
        assert_eq!(table_names(&index), vec!["Customers", "Events", "Orders"]);
        assert_eq!(index.dimension(), 256);

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.tables(), index.tables());
        assert_eq!(persisted.len(), 6);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_table_set() {
        let layer = Arc::new(StaticSemanticLayer::new(warehouse_columns()));
        let store = Arc::new(MemoryIndexStore::default());
        let manager = IndexManager::new(MetadataIndexer::new(
            layer.clone(),
            Arc::new(KeywordEmbedder::default()),
            store.clone(),
        ));
        let before = manager.ensure_loaded().await.unwrap();
        assert_eq!(table_names(&before), vec!["Customers", "Events", "Orders"]);

        layer.replace_columns(vec![
            column("Products", "price", MemberType::Measure, "number"),
            column("Products", "category", MemberType::Dimension, "string"),
            column("Suppliers", "name", MemberType::Dimension, "string"),
        ]);
        let after = manager.rebuild().await.unwrap();

        assert_eq!(table_names(&after), vec!["Products", "Suppliers"]);
        assert_eq!(after.len(), 3);
        let query = vec![1.0; after.dimension()];
        assert!(after.search_table(&query, 5, "Orders").unwrap().is_empty());
        // Readers holding the old snapshot still see the old tables.
        assert_eq!(table_names(&before), vec!["Customers", "Events", "Orders"]);
        assert_eq!(store.load().await.unwrap().as_ref(), Some(&*after));
    }

    #[tokio::test]
    async fn test_embedding_failure_persists_nothing() {
        let store = Arc::new(MemoryIndexStore::default());
        let indexer =
            MetadataIndexer::new(orders_layer(), Arc::new(FailingEmbedder), store.clone());

        let err = indexer.build_index().await.unwrap_err();
        assert!(matches!(err, IndexerError::Embedding(_)));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_empty_metadata_is_an_error() {
        let store = Arc::new(MemoryIndexStore::default());
        let indexer = MetadataIndexer::new(
            Arc::new(StaticSemanticLayer::new(Vec::new())),
            Arc::new(KeywordEmbedder::default()),
            store.clone(),
        );

        assert!(matches!(
            indexer.build_index().await,
            Err(IndexerError::NoMetadata)
        ));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_ensure_loaded_prefers_persisted_index() {
        let layer = orders_layer();
        let store = Arc::new(MemoryIndexStore::default());
        let embedder = Arc::new(KeywordEmbedder::default());
        let persisted = MetadataIndexer::new(layer.clone(), embedder.clone(), store.clone())
            .build_index()
            .await
            .unwrap();
        let fetches_before = layer.metadata_calls();

        let manager = IndexManager::new(MetadataIndexer::new(layer.clone(), embedder, store));
        let loaded = manager.ensure_loaded().await.unwrap();
        assert_eq!(*loaded, persisted);
        assert_eq!(layer.metadata_calls(), fetches_before);

        // Second call reuses the in-memory snapshot.
        let again = manager.ensure_loaded().await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_index() {
        let layer = orders_layer();
        let store = Arc::new(MemoryIndexStore::default());
        let manager = IndexManager::new(MetadataIndexer::new(
            layer.clone(),
            Arc::new(KeywordEmbedder::default()),
            store.clone(),
        ));
        let before = manager.ensure_loaded().await.unwrap();

        layer.replace_columns(Vec::new());
        assert!(manager.rebuild().await.is_err());

        let after = manager.current().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_persisted_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore.json");
        std::fs::write(&path, b"{\"format_version\": 1, \"entries\": ").unwrap();

        let layer = orders_layer();
        let manager = IndexManager::new(MetadataIndexer::new(
            layer.clone(),
            Arc::new(KeywordEmbedder::default()),
            Arc::new(LocalIndexStore::new(&path)),
        ));

        let index = manager.ensure_loaded().await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(layer.metadata_calls(), 1);

        let reloaded = LocalIndexStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded.as_ref(), Some(&*index));
    }

    #[tokio::test]
    async fn test_unsupported_persisted_version_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectorstore.json");
        let layer = orders_layer();
        let embedder = Arc::new(KeywordEmbedder::default());
        let store = Arc::new(LocalIndexStore::new(&path));
        MetadataIndexer::new(layer.clone(), embedder.clone(), store)
            .build_index()
            .await
            .unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["format_version"] = serde_json::json!(99);
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let manager = IndexManager::new(MetadataIndexer::new(
            layer.clone(),
            embedder,
            Arc::new(LocalIndexStore::new(&path)),
        ));

        let index = manager.ensure_loaded().await.unwrap();
        assert_eq!(index.format_version(), 1);
        assert_eq!(layer.metadata_calls(), 2);
        let reloaded = LocalIndexStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded.as_ref(), Some(&*index));
    }
}
