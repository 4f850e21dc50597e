use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ScoredPoint, VectorPayload, VectorPoint, VectorStore};
use crate::config::QdrantConfig;
use crate::models::SearchFilters;
use crate::utils::error::AppError;

/// Qdrant REST client scoped to a single collection.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    vector_size: usize,
}

#[derive(Debug, Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct QdrantScoredPoint {
    score: f32,
    payload: VectorPayload,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.url.clone(),
            collection: config.collection.clone(),
            vector_size: config.vector_size,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::from_status(
            status,
            format!("Qdrant error: {}", body),
        ))
    }

    async fn collection_exists(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn create_payload_index(&self, field: &str) -> Result<(), AppError> {
        let response = self
            .client
            .put(self.collection_url("/index"))
            .json(&json!({
                "field_name": field,
                "field_schema": "keyword",
            }))
            .send()
            .await?;

        // An index that already exists is fine
        if response.status().is_success() || response.status().as_u16() == 400 {
            return Ok(());
        }
        Self::check_status(response).await.map(|_| ())
    }

    fn build_filter(filters: &SearchFilters) -> serde_json::Value {
        let mut must = Vec::new();

        if let Some(ids) = &filters.document_ids {
            let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            must.push(json!({"key": "document_id", "match": {"any": values}}));
        }
        if let Some(types) = &filters.file_types {
            must.push(json!({"key": "file_type", "match": {"any": types}}));
        }

        json!({ "must": must })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self) -> Result<(), AppError> {
        if self.collection_exists().await? {
            debug!("Qdrant collection {} already exists", self.collection);
        } else {
            info!(
                "Creating Qdrant collection {} (dim={}, cosine)",
                self.collection, self.vector_size
            );
            let response = self
                .client
                .put(self.collection_url(""))
                .json(&json!({
                    "vectors": {
                        "size": self.vector_size,
                        "distance": "Cosine",
                    }
                }))
                .send()
                .await?;
            Self::check_status(response).await?;
        }

        self.create_payload_index("document_id").await?;
        self.create_payload_index("file_type").await?;
        Ok(())
    }

    async fn upsert_vectors(&self, points: &[VectorPoint]) -> Result<(), AppError> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;

        debug!("Upserted {} vectors into {}", points.len(), self.collection);
        Ok(())
    }

    async fn delete_vectors_by_document_id(&self, document_id: Uuid) -> Result<(), AppError> {
        let body = json!({
            "filter": {
                "must": [
                    {"key": "document_id", "match": {"value": document_id.to_string()}}
                ]
            }
        });

        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;

        debug!("Deleted vectors for document {}", document_id);
        Ok(())
    }

    async fn search_vectors(
        &self,
        query_vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });

        if let Some(filters) = filters.filter(|f| !f.is_empty()) {
            body["filter"] = Self::build_filter(filters);
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let envelope: QdrantEnvelope<Vec<QdrantScoredPoint>> = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Qdrant response parse error: {}", e)))?;

        Ok(envelope
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                score: p.score,
                payload: p.payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_ands_conditions() {
        let filters = SearchFilters {
            document_ids: Some(vec![Uuid::nil()]),
            file_types: Some(vec!["md".to_string(), "pdf".to_string()]),
        };
        let filter = QdrantStore::build_filter(&filters);
        let must = filter["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "document_id");
        assert_eq!(must[1]["key"], "file_type");
        assert_eq!(must[1]["match"]["any"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_parses_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let chunk_id = Uuid::new_v4();
        let document_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{
                    "id": chunk_id.to_string(),
                    "score": 0.87,
                    "payload": {
                        "chunk_id": chunk_id.to_string(),
                        "document_id": document_id.to_string(),
                        "content": "RAG combines retrieval with generation.",
                        "chunk_index": 0,
                        "filename": "rag.md",
                        "filepath": "/docs/rag.md",
                        "file_type": "md",
                    }
                }],
                "status": "ok",
                "time": 0.001
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(&QdrantConfig {
            url: server.uri(),
            collection: "docs".to_string(),
            vector_size: 4,
        });

        let results = store
            .search_vectors(&[0.1, 0.2, 0.3, 0.4], 10, 0.5, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.chunk_id, chunk_id);
        assert!((results[0].score - 0.87).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_upstream_error_classified() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = QdrantStore::new(&QdrantConfig {
            url: server.uri(),
            collection: "docs".to_string(),
            vector_size: 4,
        });

        let err = store.search_vectors(&[0.0; 4], 10, 0.5, None).await;
        assert!(matches!(err, Err(AppError::Transient(_))));
    }
}
