use crate::embeddings::Embedder;
use crate::traits::VectorStore;
use crate::{
    Chunk, CollectionSpec, DistanceMetric, EmbeddedChunk, IndexFailure, IndexReport, SearchError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Purge is delete then recreate, which is not atomic on the store.
pub struct VectorIndexManager<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    metric: DistanceMetric,
    batch_size: usize,
}

impl<S, E> VectorIndexManager<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, metric: DistanceMetric) -> Self {
        Self {
            store,
            embedder,
            metric,
            batch_size: 1,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn index(
        &self,
        chunks: &[Chunk],
        collection: &str,
        purge: bool,
    ) -> Result<IndexReport, SearchError> {
        if collection.trim().is_empty() {
            return Err(SearchError::Configuration(
                "collection name is empty".to_string(),
            ));
        }

        let spec = CollectionSpec {
            dimensions: self.embedder.dimensions(),
            metric: self.metric,
        };
        self.prepare_collection(collection, spec, purge).await?;

        let mut report = IndexReport {
            collection: collection.to_string(),
            attempted: chunks.len(),
            ..IndexReport::default()
        };

        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.is_blank() {
                warn!(chunk_id = %chunk.id, "skipping chunk with empty content");
                report.skipped += 1;
            } else {
                pending.push(chunk);
            }
        }

        for batch in pending.chunks(self.batch_size) {
            let vectors = self.embed_isolated(batch).await;
            for (chunk, vector) in batch.iter().zip(vectors) {
                let outcome = match vector.and_then(|vector| check_vector(vector, spec.dimensions)) {
                    Ok(vector) => {
                        let embedded = EmbeddedChunk {
                            chunk: (*chunk).clone(),
                            vector,
                            collection: collection.to_string(),
                        };
                        self.store.upsert(collection, &embedded).await
                    }
                    Err(error) => Err(error),
                };

                match outcome {
                    Ok(()) => report.succeeded += 1,
                    Err(error) => {
                        warn!(chunk_id = %chunk.id, error = %error, "failed to index chunk");
                        report.failed += 1;
                        report.failures.push(IndexFailure {
                            chunk_id: chunk.id.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
            }
        }

        report.removed_collections = self.remove_stale_collections(collection).await;

        info!(
            collection,
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "indexing complete"
        );
        Ok(report)
    }

    async fn prepare_collection(
        &self,
        name: &str,
        spec: CollectionSpec,
        purge: bool,
    ) -> Result<(), SearchError> {
        if purge {
            warn!(collection = name, "purging collection");
            self.store.delete_collection(name).await?;
            return self.store.create_collection(name, spec).await;
        }

        match self.store.collection_spec(name).await? {
            None => {
                info!(collection = name, dimensions = spec.dimensions, metric = %spec.metric, "creating collection");
                self.store.create_collection(name, spec).await
            }
            Some(existing) if existing.metric != spec.metric => Err(SearchError::MetricMismatch {
                collection: name.to_string(),
                expected: spec.metric,
                found: existing.metric,
            }),
            Some(existing) if existing.dimensions != spec.dimensions => {
                Err(SearchError::DimensionMismatch {
                    expected: existing.dimensions,
                    found: spec.dimensions,
                })
            }
            Some(_) => Ok(()),
        }
    }

    async fn embed_isolated(&self, batch: &[&Chunk]) -> Vec<Result<Vec<f32>, SearchError>> {
        if batch.len() > 1 {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    return vectors.into_iter().map(Ok).collect();
                }
                Ok(vectors) => warn!(
                    expected = batch.len(),
                    received = vectors.len(),
                    "batch embedding returned wrong count, retrying per chunk"
                ),
                Err(error) => warn!(error = %error, "batch embedding failed, retrying per chunk"),
            }
        }

        let mut results = Vec::with_capacity(batch.len());
        for chunk in batch {
            results.push(self.embedder.embed(&chunk.text).await);
        }
        results
    }

    async fn remove_stale_collections(&self, active: &str) -> Vec<String> {
        let names = match self.store.list_collections().await {
            Ok(names) => names,
            Err(error) => {
                warn!(error = %error, "could not list collections for cleanup");
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for name in names.into_iter().filter(|name| name != active) {
            match self.store.delete_collection(&name).await {
                Ok(()) => {
                    debug!(collection = %name, "deleted unused collection");
                    removed.push(name);
                }
                Err(error) => warn!(collection = %name, error = %error, "failed to delete unused collection"),
            }
        }
        removed
    }
}

fn check_vector(vector: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, SearchError> {
    if vector.is_empty() {
        return Err(SearchError::Format("embedder returned an empty vector".to_string()));
    }
    if vector.len() != dimensions {
        return Err(SearchError::DimensionMismatch {
            expected: dimensions,
            found: vector.len(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIMS: usize = 64;

    struct FlakyEmbedder {
        inner: CharacterNgramEmbedder,
        reject_batches: bool,
        batch_calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(reject_batches: bool) -> Self {
            Self {
                inner: CharacterNgramEmbedder { dimensions: DIMS },
                reject_batches,
                batch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
            if text.contains("FAIL") {
                return Err(SearchError::Transport("gateway timed out".to_string()));
            }
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_batches {
                return Err(SearchError::Transport("batch endpoint down".to_string()));
            }
            let mut vectors = Vec::new();
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    struct StubbornStore {
        inner: InMemoryVectorStore,
        undeletable: String,
    }

    #[async_trait]
    impl VectorStore for StubbornStore {
        async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<(), SearchError> {
            self.inner.create_collection(name, spec).await
        }

        async fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpec>, SearchError> {
            self.inner.collection_spec(name).await
        }

        async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
            if name == self.undeletable {
                return Err(SearchError::Transport("delete refused".to_string()));
            }
            self.inner.delete_collection(name).await
        }

        async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
            self.inner.list_collections().await
        }

        async fn upsert(&self, collection: &str, embedded: &EmbeddedChunk) -> Result<(), SearchError> {
            self.inner.upsert(collection, embedded).await
        }

        async fn query(
            &self,
            collection: &str,
            vector: &[f32],
            k: usize,
        ) -> Result<Vec<crate::RetrievedChunk>, SearchError> {
            self.inner.query(collection, vector, k).await
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id, text, format!("docs/{id}.txt"))
    }

    fn mixed_chunks() -> Vec<Chunk> {
        vec![
            chunk("a", "Pumps move fluid by mechanical action."),
            chunk("b", "   "),
            chunk("c", "This chunk will FAIL to embed."),
            chunk("d", "Valves regulate flow and pressure."),
            chunk("e", ""),
            chunk("f", "Another FAIL case for the embedder."),
        ]
    }

    fn spec(metric: DistanceMetric) -> CollectionSpec {
        CollectionSpec {
            dimensions: DIMS,
            metric,
        }
    }

    #[tokio::test]
    async fn report_counts_balance_with_skips_and_failures() -> Result<(), SearchError> {
        let store = Arc::new(InMemoryVectorStore::new());
        let manager = VectorIndexManager::new(
            store.clone(),
            Arc::new(FlakyEmbedder::new(false)),
            DistanceMetric::Cosine,
        );

        let report = manager.index(&mixed_chunks(), "docs", true).await?;

        assert_eq!(report.attempted, 6);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 2);
        assert!(report.is_balanced());
        let failed_ids: Vec<_> = report.failures.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(failed_ids, vec!["c", "f"]);
        assert_eq!(store.record_count("docs"), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn failed_batches_fall_back_to_single_embeds() -> Result<(), SearchError> {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(FlakyEmbedder::new(true));
        let manager =
            VectorIndexManager::new(store.clone(), embedder.clone(), DistanceMetric::Cosine)
                .with_batch_size(3);

        let report = manager.index(&mixed_chunks(), "docs", true).await?;

        assert!(report.is_balanced());
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reindexing_same_chunks_is_idempotent() -> Result<(), SearchError> {
        let store = Arc::new(InMemoryVectorStore::new());
        let manager = VectorIndexManager::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder { dimensions: DIMS }),
            DistanceMetric::Cosine,
        );
        let chunks = vec![chunk("a", "alpha text"), chunk("b", "beta text")];

        manager.index(&chunks, "docs", false).await?;
        let report = manager.index(&chunks, "docs", false).await?;

        assert_eq!(report.succeeded, 2);
        assert_eq!(store.record_count("docs"), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn purge_rebuilds_and_drops_stale_collections() -> Result<(), SearchError> {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("previous_run", spec(DistanceMetric::Cosine)).await?;
        let manager = VectorIndexManager::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder { dimensions: DIMS }),
            DistanceMetric::Cosine,
        );

        manager.index(&[chunk("old", "stale content")], "docs", false).await?;
        let report = manager.index(&[chunk("new", "fresh content")], "docs", true).await?;

        assert_eq!(store.record_count("docs"), Some(1));
        assert_eq!(store.list_collections().await?, vec!["docs".to_string()]);
        assert!(report.removed_collections.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn stale_collection_cleanup_failures_are_not_fatal() -> Result<(), SearchError> {
        let store = Arc::new(StubbornStore {
            inner: InMemoryVectorStore::new(),
            undeletable: "pinned".to_string(),
        });
        store.create_collection("pinned", spec(DistanceMetric::Cosine)).await?;
        store.create_collection("orphan", spec(DistanceMetric::Cosine)).await?;
        let manager = VectorIndexManager::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder { dimensions: DIMS }),
            DistanceMetric::Cosine,
        );

        let report = manager.index(&[chunk("a", "alpha")], "docs", true).await?;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.removed_collections, vec!["orphan".to_string()]);
        let mut remaining = store.list_collections().await?;
        remaining.sort();
        assert_eq!(remaining, vec!["docs".to_string(), "pinned".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn existing_collection_with_other_metric_fails_fast() -> Result<(), SearchError> {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("docs", spec(DistanceMetric::Euclidean)).await?;
        let manager = VectorIndexManager::new(
            store.clone(),
            Arc::new(CharacterNgramEmbedder { dimensions: DIMS }),
            DistanceMetric::Cosine,
        );

        let result = manager.index(&[chunk("a", "alpha")], "docs", false).await;
        assert!(matches!(result, Err(SearchError::MetricMismatch { .. })));

        let report = manager.index(&[chunk("a", "alpha")], "docs", true).await?;
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            store.collection_spec("docs").await?.map(|spec| spec.metric),
            Some(DistanceMetric::Cosine)
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_collection_name_is_rejected() {
        let manager = VectorIndexManager::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(CharacterNgramEmbedder::default()),
            DistanceMetric::Cosine,
        );
        assert!(matches!(
            manager.index(&[], " ", false).await,
            Err(SearchError::Configuration(_))
        ));
    }
}
