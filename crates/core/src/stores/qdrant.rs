use crate::traits::VectorStore;
use crate::{Chunk, CollectionSpec, DistanceMetric, EmbeddedChunk, RetrievedChunk, SearchError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: Url,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str) -> Result<Self, SearchError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            client: Client::new(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SearchError> {
        Ok(self.endpoint.join(path)?)
    }
}

// Qdrant only accepts integer or UUID point ids; the chunk id travels in the payload.
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::Euclidean => "Euclid",
    }
}

fn parse_distance(name: &str) -> Result<DistanceMetric, SearchError> {
    match name {
        "Cosine" => Ok(DistanceMetric::Cosine),
        "Euclid" => Ok(DistanceMetric::Euclidean),
        other => Err(SearchError::Format(format!(
            "unsupported qdrant distance {other}"
        ))),
    }
}

async fn ensure_success(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

fn spec_from_info(info: &Value) -> Result<CollectionSpec, SearchError> {
    let vectors = info
        .pointer("/result/config/params/vectors")
        .ok_or_else(|| SearchError::Format("collection info has no vector params".to_string()))?;
    let dimensions = vectors
        .pointer("/size")
        .and_then(Value::as_u64)
        .ok_or_else(|| SearchError::Format("collection info has no vector size".to_string()))?;
    let distance = vectors
        .pointer("/distance")
        .and_then(Value::as_str)
        .ok_or_else(|| SearchError::Format("collection info has no distance".to_string()))?;

    Ok(CollectionSpec {
        dimensions: dimensions as usize,
        metric: parse_distance(distance)?,
    })
}

fn point_payload(chunk: &Chunk) -> Value {
    let mut payload = chunk.payload();
    payload.insert("chunk_id".to_string(), Value::String(chunk.id.clone()));
    payload.insert("text".to_string(), Value::String(chunk.text.clone()));
    Value::Object(payload)
}

fn hit_to_retrieved(hit: &Value) -> Result<RetrievedChunk, SearchError> {
    let mut payload: Map<String, Value> = hit
        .pointer("/payload")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| SearchError::Format("search hit without payload".to_string()))?;

    let mut take_string = |key: &str| match payload.remove(key) {
        Some(Value::String(value)) => Ok(value),
        _ => Err(SearchError::Format(format!("search hit payload lacks {key}"))),
    };
    let id = take_string("chunk_id")?;
    let text = take_string("text")?;
    let source = take_string("source")?;

    let score = hit
        .pointer("/score")
        .and_then(Value::as_f64)
        .ok_or_else(|| SearchError::Format("search hit without score".to_string()))?;

    Ok(RetrievedChunk {
        chunk: Chunk {
            id,
            text,
            source,
            metadata: payload,
        },
        score,
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, name: &str, spec: CollectionSpec) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&format!("collections/{name}"))?)
            .json(&json!({
                "vectors": {
                    "size": spec.dimensions,
                    "distance": distance_name(spec.metric),
                }
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn collection_spec(&self, name: &str) -> Result<Option<CollectionSpec>, SearchError> {
        let response = self
            .client
            .get(self.url(&format!("collections/{name}"))?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: Value = ensure_success(response).await?.json().await?;
        spec_from_info(&info).map(Some)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(self.url(&format!("collections/{name}"))?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
        let response = self.client.get(self.url("collections")?).send().await?;
        let parsed: Value = ensure_success(response).await?.json().await?;

        let names: Vec<String> = parsed
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.pointer("/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(names)
    }

    async fn upsert(&self, collection: &str, embedded: &EmbeddedChunk) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&format!("collections/{collection}/points?wait=true"))?)
            .json(&json!({
                "points": [{
                    "id": point_id(&embedded.chunk.id),
                    "vector": embedded.vector,
                    "payload": point_payload(&embedded.chunk),
                }]
            }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SearchError::NotFound(format!("collection {collection}")));
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let response = self
            .client
            .post(self.url(&format!("collections/{collection}/points/search"))?)
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SearchError::NotFound(format!("collection {collection}")));
        }

        let parsed: Value = ensure_success(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        hits.iter().map(hit_to_retrieved).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("3f1c");
        assert_eq!(first, point_id("3f1c"));
        assert_ne!(first, point_id("3f1d"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn collection_info_is_parsed() {
        let info = json!({
            "result": {"config": {"params": {"vectors": {"size": 384, "distance": "Euclid"}}}}
        });
        let spec = spec_from_info(&info).expect("info should parse");
        assert_eq!(spec.dimensions, 384);
        assert_eq!(spec.metric, DistanceMetric::Euclidean);

        let unknown = json!({
            "result": {"config": {"params": {"vectors": {"size": 4, "distance": "Manhattan"}}}}
        });
        assert!(matches!(spec_from_info(&unknown), Err(SearchError::Format(_))));
    }

    #[test]
    fn payload_round_trips_through_a_hit() {
        let mut chunk = Chunk::new("c-9", "pump pressure", "manual.txt");
        chunk.metadata.insert("page".to_string(), Value::from(2));

        let hit = json!({"id": point_id("c-9"), "score": 0.91, "payload": point_payload(&chunk)});
        let retrieved = hit_to_retrieved(&hit).expect("hit should parse");

        assert_eq!(retrieved.chunk, chunk);
        assert!((retrieved.score - 0.91).abs() < 1e-9);
    }

    #[test]
    fn endpoint_must_be_a_url() {
        assert!(matches!(QdrantStore::new("not a url"), Err(SearchError::Url(_))));
        assert!(QdrantStore::new("http://localhost:6333/").is_ok());
    }
}
