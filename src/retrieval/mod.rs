use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::CopilotConfig;
use crate::llm::ModelGateway;
use crate::shared::models::{schema::copilot_rag_chunks, ChunkRow};
use crate::shared::utils::DbPool;

pub mod bm25;

use bm25::Bm25Index;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Store partially down; callers proceed without RAG.
    #[error("retrieval degraded: {0}")]
    Degraded(String),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("chunk store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub id: Uuid,
    pub source_ref: String,
    pub ordinal: i32,
    pub text: String,
    pub score: f32,
}

impl RetrievedChunk {
    /// The opaque ref the model is allowed to cite for this chunk.
    pub fn citation_ref(&self) -> String {
        format!("rag:{}", self.id)
    }
}

struct IndexedChunk {
    source_ref: String,
    ordinal: i32,
    text: String,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct TenantIndex {
    bm25: Bm25Index,
    chunks: HashMap<Uuid, IndexedChunk>,
}

/// Tenant-scoped chunk store with hybrid lexical+vector search.
///
/// Rows are persisted through the pool for durability; queries are served
/// from a per-tenant in-memory index (BM25 plus chunk embeddings) that is
/// hydrated from the store at startup and kept current by ingestion.
pub struct RetrievalStore {
    pool: Option<DbPool>,
    gateway: Arc<dyn ModelGateway>,
    index: RwLock<HashMap<Uuid, TenantIndex>>,
    expected_dim: usize,
    lexical_weight: f32,
    vector_weight: f32,
    chunk_min_chars: usize,
    chunk_max_chars: usize,
}

impl RetrievalStore {
    pub fn new(config: &CopilotConfig, gateway: Arc<dyn ModelGateway>, pool: Option<DbPool>) -> Self {
        Self {
            pool,
            gateway,
            index: RwLock::new(HashMap::new()),
            expected_dim: config.embedding_dim,
            lexical_weight: config.lexical_weight,
            vector_weight: config.vector_weight,
            chunk_min_chars: config.chunk_min_chars,
            chunk_max_chars: config.chunk_max_chars,
        }
    }

    /// Hybrid search over the tenant's chunks: weighted sum of normalized
    /// BM25 score and cosine similarity, ranked over a candidate pool of 4k.
    pub async fn search(
        &self,
        tenant_id: Uuid,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let pool_size = k.saturating_mul(4).max(k);

        let query_embedding = match self.gateway.embed(query_text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Query embedding unavailable, lexical-only search: {}", e);
                None
            }
        };

        let index = self.index.read().await;
        let tenant = match index.get(&tenant_id) {
            Some(tenant) => tenant,
            None => return Ok(Vec::new()),
        };

        let lexical = tenant.bm25.search(query_text, pool_size);
        let max_lexical = lexical
            .first()
            .map(|(_, score)| *score)
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);
        let lexical_norm: HashMap<Uuid, f32> = lexical
            .iter()
            .map(|(id, score)| (*id, score / max_lexical))
            .collect();

        let mut dense: HashMap<Uuid, f32> = HashMap::new();
        if let Some(query_embedding) = &query_embedding {
            let mut scored: Vec<(Uuid, f32)> = tenant
                .chunks
                .iter()
                .map(|(id, chunk)| (*id, cosine_similarity(query_embedding, &chunk.embedding)))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(pool_size);
            dense = scored.into_iter().collect();
        }

        let mut candidates: HashMap<Uuid, f32> = HashMap::new();
        for (id, score) in &lexical_norm {
            *candidates.entry(*id).or_insert(0.0) += self.lexical_weight * score;
        }
        for (id, score) in &dense {
            *candidates.entry(*id).or_insert(0.0) += self.vector_weight * score.max(0.0);
        }

        let mut ranked: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter_map(|(id, score)| {
                tenant.chunks.get(&id).map(|chunk| RetrievedChunk {
                    id,
                    source_ref: chunk.source_ref.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.text.clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);

        Ok(ranked)
    }

    /// Out-of-band ingestion: chunk on paragraph boundaries, embed through
    /// the gateway's embedding channel, persist and index. Re-ingesting the
    /// same source_ref supersedes its previous chunks.
    pub async fn ingest_document(
        &self,
        tenant_id: Uuid,
        source_ref: &str,
        text: &str,
        tags: Option<serde_json::Value>,
    ) -> Result<usize, RetrievalError> {
        let pieces = chunk_paragraphs(text, self.chunk_min_chars, self.chunk_max_chars);
        if pieces.is_empty() {
            return Ok(0);
        }

        let mut rows: Vec<ChunkRow> = Vec::with_capacity(pieces.len());
        for (ordinal, piece) in pieces.iter().enumerate() {
            let embedding = self
                .gateway
                .embed(piece)
                .await
                .map_err(|e| RetrievalError::Degraded(e.to_string()))?;
            if embedding.len() != self.expected_dim {
                return Err(RetrievalError::DimensionMismatch {
                    expected: self.expected_dim,
                    got: embedding.len(),
                });
            }

            rows.push(ChunkRow {
                id: Uuid::new_v4(),
                tenant_id,
                source_ref: source_ref.to_string(),
                ordinal: ordinal as i32,
                chunk_text: piece.clone(),
                embedding: serde_json::json!(embedding),
                tags: tags.clone(),
                created_at: Utc::now(),
            });
        }

        if let Some(pool) = &self.pool {
            let mut conn = pool
                .get()
                .map_err(|e| RetrievalError::Store(e.to_string()))?;
            diesel::delete(
                copilot_rag_chunks::table
                    .filter(copilot_rag_chunks::tenant_id.eq(tenant_id))
                    .filter(copilot_rag_chunks::source_ref.eq(source_ref)),
            )
            .execute(&mut conn)
            .map_err(|e| RetrievalError::Store(e.to_string()))?;
            diesel::insert_into(copilot_rag_chunks::table)
                .values(&rows)
                .execute(&mut conn)
                .map_err(|e| RetrievalError::Store(e.to_string()))?;
        }

        let mut index = self.index.write().await;
        let tenant = index.entry(tenant_id).or_default();

        let superseded: Vec<Uuid> = tenant
            .chunks
            .iter()
            .filter(|(_, chunk)| chunk.source_ref == source_ref)
            .map(|(id, _)| *id)
            .collect();
        for id in superseded {
            tenant.bm25.remove_document(&id);
            tenant.chunks.remove(&id);
        }

        let count = rows.len();
        for row in rows {
            let embedding: Vec<f32> =
                serde_json::from_value(row.embedding).unwrap_or_default();
            tenant.bm25.add_document(row.id, &row.chunk_text);
            tenant.chunks.insert(
                row.id,
                IndexedChunk {
                    source_ref: row.source_ref,
                    ordinal: row.ordinal,
                    text: row.chunk_text,
                    embedding,
                },
            );
        }

        info!(
            "Ingested {} chunks for {} (tenant {})",
            count, source_ref, tenant_id
        );
        Ok(count)
    }

    /// Hydrate a tenant's in-memory index from the persisted chunk rows.
    pub async fn load_tenant(&self, tenant_id: Uuid) -> Result<usize, RetrievalError> {
        let pool = match &self.pool {
            Some(pool) => pool,
            None => return Ok(0),
        };

        let mut conn = pool
            .get()
            .map_err(|e| RetrievalError::Store(e.to_string()))?;
        let rows: Vec<ChunkRow> = copilot_rag_chunks::table
            .filter(copilot_rag_chunks::tenant_id.eq(tenant_id))
            .order(copilot_rag_chunks::ordinal.asc())
            .load(&mut conn)
            .map_err(|e| RetrievalError::Store(e.to_string()))?;

        let mut index = self.index.write().await;
        let tenant = index.entry(tenant_id).or_default();
        tenant.bm25 = Bm25Index::new();
        tenant.chunks.clear();

        let count = rows.len();
        for row in rows {
            let embedding: Vec<f32> =
                serde_json::from_value(row.embedding).unwrap_or_default();
            if !embedding.is_empty() && embedding.len() != self.expected_dim {
                return Err(RetrievalError::DimensionMismatch {
                    expected: self.expected_dim,
                    got: embedding.len(),
                });
            }
            tenant.bm25.add_document(row.id, &row.chunk_text);
            tenant.chunks.insert(
                row.id,
                IndexedChunk {
                    source_ref: row.source_ref,
                    ordinal: row.ordinal,
                    text: row.chunk_text,
                    embedding,
                },
            );
        }

        Ok(count)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Split text into chunks on paragraph boundaries. Paragraphs accumulate
/// until the chunk reaches `min_chars`; a chunk never exceeds `max_chars`
/// (oversized paragraphs are split at the nearest sentence end).
fn chunk_paragraphs(text: &str, min_chars: usize, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(min_chars.max(1));
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    let mut push_current = |current: &mut String, chunks: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        current.clear();
    };

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.len() > max_chars {
            push_current(&mut current, &mut chunks);
            let mut rest = paragraph;
            while rest.len() > max_chars {
                let window = &rest[..max_chars];
                let cut = window
                    .rfind(". ")
                    .map(|i| i + 1)
                    .filter(|i| *i > max_chars / 2)
                    .unwrap_or(max_chars);
                chunks.push(rest[..cut].trim().to_string());
                rest = rest[cut..].trim_start();
            }
            if !rest.is_empty() {
                current.push_str(rest);
            }
            continue;
        }

        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            push_current(&mut current, &mut chunks);
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);

        if current.len() >= min_chars {
            push_current(&mut current, &mut chunks);
        }
    }

    push_current(&mut current, &mut chunks);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GatewayError, ModelHealth, ModelOptions, ModelReply};
    use async_trait::async_trait;

    /// Deterministic bag-of-words embedder so ingest and search agree.
    struct HashEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl ModelGateway for HashEmbedder {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &ModelOptions,
        ) -> Result<ModelReply, GatewayError> {
            Err(GatewayError::Offline("test embedder".to_string()))
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
            let mut vector = vec![0.0f32; self.dim];
            for token in text.to_lowercase().split_whitespace() {
                let mut h: usize = 17;
                for b in token.bytes() {
                    h = h.wrapping_mul(31).wrapping_add(b as usize);
                }
                vector[h % self.dim] += 1.0;
            }
            Ok(vector)
        }

        async fn health(&self) -> ModelHealth {
            ModelHealth::Online
        }

        fn model_name(&self) -> &str {
            "hash-embedder"
        }
    }

    fn store(dim: usize) -> RetrievalStore {
        let config = CopilotConfig {
            embedding_dim: dim,
            chunk_min_chars: 80,
            chunk_max_chars: 200,
            ..CopilotConfig::default()
        };
        RetrievalStore::new(&config, Arc::new(HashEmbedder { dim }), None)
    }

    #[tokio::test]
    async fn ingest_then_verbatim_search_hits_top_three() {
        let store = store(64);
        let tenant = Uuid::new_v4();

        store
            .ingest_document(
                tenant,
                "sop/press-maintenance.md",
                "The hydraulic press requires weekly calibration of the mold clamp.\n\n\
                 Operators must log every rework event in the quality register before \
                 the end of the shift, including the affected phase.\n\n\
                 Ventilation filters in the paint booth are replaced monthly.",
                None,
            )
            .await
            .unwrap();

        let results = store
            .search(tenant, "rework event quality register", 3)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .take(3)
            .any(|c| c.text.contains("quality register")));
    }

    #[tokio::test]
    async fn search_never_crosses_tenants() {
        let store = store(64);
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        store
            .ingest_document(
                tenant_a,
                "doc-a",
                "Tenant A secret procedure about laminating presses and calibration.",
                None,
            )
            .await
            .unwrap();
        store
            .ingest_document(
                tenant_b,
                "doc-b",
                "Tenant B unrelated welding instructions for frame assembly.",
                None,
            )
            .await
            .unwrap();

        let results = store
            .search(tenant_b, "laminating presses calibration", 5)
            .await
            .unwrap();
        assert!(
            results.iter().all(|c| !c.text.contains("Tenant A")),
            "cross-tenant leak: {:?}",
            results
        );
    }

    #[tokio::test]
    async fn reingest_supersedes_previous_chunks() {
        let store = store(64);
        let tenant = Uuid::new_v4();

        store
            .ingest_document(tenant, "sop", "Original press procedure text for molding.", None)
            .await
            .unwrap();
        store
            .ingest_document(tenant, "sop", "Replacement press procedure text for molding.", None)
            .await
            .unwrap();

        let results = store.search(tenant, "press procedure molding", 10).await.unwrap();
        assert!(results.iter().all(|c| c.text.starts_with("Replacement")));
    }

    #[test]
    fn chunking_respects_bounds() {
        let paragraph = "Sentence one about machines. ".repeat(12);
        let text = format!("{}\n\n{}", paragraph, "Short tail paragraph.");
        let chunks = chunk_paragraphs(&text, 100, 200);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.len() <= 200));
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
