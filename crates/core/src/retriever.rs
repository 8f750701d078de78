use crate::embeddings::Embedder;
use crate::traits::VectorStore;
use crate::{DistanceMetric, RetrievedChunk, SearchError};
use std::sync::Arc;
use tracing::debug;

pub struct Retriever<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    collection: String,
    metric: DistanceMetric,
}

impl<S, E> Retriever<S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        collection: impl Into<String>,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            metric,
        }
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        if k == 0 {
            return Err(SearchError::Configuration(
                "k must be greater than zero".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let spec = self
            .store
            .collection_spec(&self.collection)
            .await?
            .ok_or_else(|| SearchError::NotFound(format!("collection {}", self.collection)))?;
        if spec.metric != self.metric {
            return Err(SearchError::MetricMismatch {
                collection: self.collection.clone(),
                expected: self.metric,
                found: spec.metric,
            });
        }

        let vector = self.embedder.embed(query).await?;
        if vector.len() != spec.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: spec.dimensions,
                found: vector.len(),
            });
        }

        let hits = self.store.query(&self.collection, &vector, k).await?;
        debug!(collection = %self.collection, k, hit_count = hits.len(), "retrieved chunks");
        Ok(hits)
    }
}
