//! Retrieval-augmented-generation context source. Fail-open: any failure along the
//! embed-cache-search pipeline returns `None`, and the orchestrator proceeds without
//! augmentation rather than blocking the turn.

use crate::cache::Cache;
use crate::config::RagConfig;
use md5::{Digest, Md5};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

pub struct RagRetriever {
    cache: Cache,
    http: reqwest::Client,
    config: RagConfig,
    embedding_ttl: Duration,
}

impl RagRetriever {
    pub fn new(cache: Cache, config: RagConfig) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client construction must not fail");
        Self {
            embedding_ttl: Duration::from_secs(86_400),
            cache,
            http,
            config,
        }
    }

    /// Returns context joined by `\n---\n`, or `None` on any failure or empty result set.
    pub async fn retrieve(&self, query: &str, tenant_id: &str) -> Option<String> {
        match timeout(
            Duration::from_millis(self.config.search_timeout_ms),
            self.retrieve_inner(query, tenant_id),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(err)) => {
                warn!(target: "rag", %err, "rag retrieval failed, proceeding without context");
                None
            }
            Err(_) => {
                warn!(target: "rag", "rag search timed out, proceeding without context");
                None
            }
        }
    }

    async fn retrieve_inner(&self, query: &str, tenant_id: &str) -> Result<Option<String>, String> {
        let normalized = query.trim().to_lowercase();
        let hash_input = format!("{tenant_id}:{normalized}");
        let mut hasher = Md5::new();
        hasher.update(hash_input.as_bytes());
        let hash = hex_digest(&hasher.finalize());
        let cache_key = format!("rag_embedding:{hash}");

        let embedding: Vec<f32> = match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => serde_json::from_str(&cached).map_err(|e| e.to_string())?,
            _ => {
                let embedding = self.embed(&normalized).await?;
                if let Ok(serialized) = serde_json::to_string(&embedding) {
                    let _ = self.cache.set_ex(&cache_key, &serialized, self.embedding_ttl).await;
                }
                embedding
            }
        };

        let hits = self.search(&embedding, tenant_id).await?;
        let survivors: Vec<String> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.similarity_threshold)
            .map(|hit| hit.content)
            .collect();

        if survivors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(survivors.join("\n---\n")))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let response = self
            .http
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(self.config.embedding_api_key.clone().unwrap_or_default())
            .json(&serde_json::json!({
                "model": "text-embedding-3-small",
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "missing embedding in response".to_string())?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| "non-numeric embedding value".to_string()))
            .collect()
    }

    async fn search(&self, embedding: &[f32], tenant_id: &str) -> Result<Vec<SearchHit>, String> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.config.vector_store_url.trim_end_matches('/'),
            self.config.collection_name
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "vector": embedding,
                "limit": self.config.top_k,
                "with_payload": true,
                "filter": {
                    "must": [{"key": "tenant_id", "match": {"value": tenant_id}}]
                }
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let results = body["result"].as_array().cloned().unwrap_or_default();
        Ok(results
            .into_iter()
            .filter_map(|point| {
                let score = point.get("score")?.as_f64()? as f32;
                let content = point.get("payload")?.get("content")?.as_str()?.to_string();
                Some(SearchHit { score, content })
            })
            .collect())
    }
}

struct SearchHit {
    score: f32,
    content: String,
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_matches_known_md5() {
        let mut hasher = Md5::new();
        hasher.update(b"tenant1:what are your hours?");
        let digest = hex_digest(&hasher.finalize());
        assert_eq!(digest.len(), 32);
    }
}
