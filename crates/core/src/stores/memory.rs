use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::traits::VectorStore;
use crate::{Chunk, CollectionSpec, DistanceMetric, EmbeddedChunk, RetrievedChunk, SearchError};

struct StoredCollection {
    spec: CollectionSpec,
    records: Vec<StoredRecord>,
    positions: HashMap<String, usize>,
}

struct StoredRecord {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self, name: &str) -> Option<usize> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(name).map(|collection| collection.records.len())
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        f64::from(dot / (mag_a * mag_b))
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    f64::from(sum.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<(), SearchError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        match collections.get(name) {
            Some(existing) if existing.spec != spec => Err(SearchError::Configuration(format!(
                "collection {name} already exists with a different spec"
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    StoredCollection {
                        spec,
                        records: Vec::new(),
                        positions: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpec>, SearchError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(name).map(|collection| collection.spec))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections.remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn upsert(&self, collection: &str, embedded: &EmbeddedChunk) -> Result<(), SearchError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| SearchError::NotFound(format!("collection {collection}")))?;

        if embedded.vector.len() != stored.spec.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: stored.spec.dimensions,
                found: embedded.vector.len(),
            });
        }

        let record = StoredRecord {
            chunk: embedded.chunk.clone(),
            vector: embedded.vector.clone(),
        };
        match stored.positions.get(&embedded.chunk.id) {
            Some(&position) => stored.records[position] = record,
            None => {
                stored
                    .positions
                    .insert(embedded.chunk.id.clone(), stored.records.len());
                stored.records.push(record);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let stored = collections
            .get(collection)
            .ok_or_else(|| SearchError::NotFound(format!("collection {collection}")))?;

        if vector.len() != stored.spec.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: stored.spec.dimensions,
                found: vector.len(),
            });
        }

        let metric = stored.spec.metric;
        let mut hits: Vec<RetrievedChunk> = stored
            .records
            .iter()
            .map(|record| RetrievedChunk {
                chunk: record.chunk.clone(),
                score: match metric {
                    DistanceMetric::Cosine => cosine_sim(vector, &record.vector),
                    DistanceMetric::Euclidean => euclidean(vector, &record.vector),
                },
            })
            .collect();

        if metric.higher_is_better() {
            hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        } else {
            hits.sort_by(|left, right| left.score.total_cmp(&right.score));
        }
        hits.truncate(k);
        Ok(hits)
    }
}
