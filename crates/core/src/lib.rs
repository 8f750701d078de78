pub mod chat;
pub mod chunk_store;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod index;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod prompts;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use chat::{ChatPipeline, ChatReply};
pub use chunk_store::{merge_chunks, ChunkStore};
pub use chunking::{chunk, chunk_document, chunk_documents, split_text, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, PipelineError, SearchError};
pub use extractor::{
    discover_text_files, filter_documents, load_documents, DocumentLoader, TextFileLoader,
};
pub use gateway::{GatewayClient, GatewayCompletion, GatewayConfig, GatewayEmbedder};
pub use index::VectorIndexManager;
pub use ingest::{IngestionPipeline, IngestionSummary};
pub use memory::{
    ConversationMemory, ConversationStore, MemoryPolicy, MemoryView, RecordOutcome,
};
pub use models::{
    ChatOptions, Chunk, CollectionSpec, ConversationTurn, DistanceMetric, Document,
    EmbeddedChunk, IndexFailure, IndexReport, IngestionOptions, RetrievedChunk,
    DEFAULT_CHUNK_FILE, DEFAULT_COLLECTION, UNKNOWN_SOURCE,
};
pub use retriever::Retriever;
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::{Completion, VectorStore};
