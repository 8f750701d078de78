use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

pub const UNKNOWN_SOURCE: &str = "unknown";

pub const DEFAULT_COLLECTION: &str = "document_collection";

pub const DEFAULT_CHUNK_FILE: &str = "outputs/chunked_docs.jsonl";

fn unknown_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub source: String,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    #[serde(alias = "chunk_id")]
    pub id: String,
    pub text: String,
    #[serde(default = "unknown_source")]
    pub source: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            metadata: Map::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn payload(&self) -> Map<String, Value> {
        let mut payload = self.metadata.clone();
        payload.insert("source".to_string(), Value::String(self.source.clone()));
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub collection: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn higher_is_better(self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => f.write_str("cosine"),
            DistanceMetric::Euclidean => f.write_str("euclidean"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CollectionSpec {
    pub dimensions: usize,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexFailure {
    pub chunk_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexReport {
    pub collection: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<IndexFailure>,
    pub removed_collections: Vec<String>,
}

impl IndexReport {
    pub fn is_balanced(&self) -> bool {
        self.attempted == self.succeeded + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub recorded_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_document_chars: usize,
    pub stopwords: Vec<String>,
    pub chunk_file: PathBuf,
    pub collection_name: String,
    pub batch_size: usize,
    pub metric: DistanceMetric,
    pub cumulative: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            min_document_chars: 50,
            stopwords: vec!["api".to_string(), "experimental".to_string()],
            chunk_file: PathBuf::from(DEFAULT_CHUNK_FILE),
            collection_name: DEFAULT_COLLECTION.to_string(),
            batch_size: 1,
            metric: DistanceMetric::Cosine,
            cumulative: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub top_k: usize,
    pub condense_question: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            condense_question: true,
        }
    }
}
