use crate::{CollectionSpec, EmbeddedChunk, RetrievedChunk, SearchError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<(), SearchError>;

    async fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpec>, SearchError>;

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError>;

    async fn list_collections(&self) -> Result<Vec<String>, SearchError>;

    async fn upsert(&self, collection: &str, embedded: &EmbeddedChunk) -> Result<(), SearchError>;

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, SearchError>;
}
