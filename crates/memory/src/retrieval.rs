/// Retrieval pipeline: embed the query, search the persona's vectors, enrich
/// candidates from the metadata and graph stores, rescore, and bump access
/// counters for whatever is returned.
///
/// Retrieval is best-effort by contract — any failure yields an empty list
/// and an error log so the chat turn proceeds without memories.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, warn};

use crate::EmbedFn;
use crate::graph::GraphIndex;
use crate::metadata::MetadataStore;
use crate::schema::{VectorHit, now_ms};
use crate::scorer::{ScoreWeights, final_score, graph_density};
use crate::vector::VectorIndex;

/// Hop depth of the per-entity neighborhood queries.
pub const GRAPH_DEPTH: usize = 2;

/// One ranked retrieval result.  Carries the stable memory id (never the
/// vector-store id alone) plus everything injection and search responses
/// render.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub memory_id: String,
    pub persona_id: String,
    pub vector_id: String,
    pub entity_id: Option<String>,
    pub content: String,
    pub created_at: i64,
    pub event_time: Option<NaiveDateTime>,
    pub last_accessed_at: i64,
    pub access_count: u64,
    pub similarity: f32,
    pub graph_density: f64,
    pub final_score: f64,
}

pub struct RetrievalEngine {
    vector: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphIndex>,
    metadata: Arc<dyn MetadataStore>,
    embed: EmbedFn,
    weights: ScoreWeights,
    top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphIndex>,
        metadata: Arc<dyn MetadataStore>,
        embed: EmbedFn,
        weights: ScoreWeights,
        top_k: usize,
    ) -> Self {
        Self {
            vector,
            graph,
            metadata,
            embed,
            weights,
            top_k,
        }
    }

    /// Top-`limit` memories for `query` within one persona.  Never fails:
    /// store or embedding trouble is logged and an empty list returned.
    pub async fn retrieve(&self, query: &str, persona_id: &str, limit: usize) -> Vec<ScoredMemory> {
        match self.try_retrieve(query, persona_id, limit).await {
            Ok(memories) => memories,
            Err(err) => {
                error!(%err, persona = persona_id, "memory retrieval failed, continuing without");
                Vec::new()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        persona_id: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let embedding = (self.embed)(query.to_string()).await?;
        let hits = self.vector.search(&embedding, self.top_k, Some(persona_id)).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            candidates.push(self.enrich(hit).await);
        }

        // One neighborhood query per distinct entity, issued concurrently.
        let entity_ids: BTreeSet<String> =
            candidates.iter().filter_map(|c| c.entity_id.clone()).collect();
        let queries = entity_ids
            .iter()
            .map(|entity| self.graph.neighborhood(persona_id, entity, GRAPH_DEPTH));
        let mut densities: HashMap<String, f64> = HashMap::new();
        for (entity, outcome) in entity_ids.iter().zip(join_all(queries).await) {
            match outcome {
                Ok(neighborhood) => {
                    densities.insert(entity.clone(), graph_density(&neighborhood));
                }
                Err(err) => {
                    warn!(%err, entity, "graph enrichment failed, density stays 0");
                }
            }
        }

        let now = now_ms();
        for candidate in &mut candidates {
            candidate.graph_density = candidate
                .entity_id
                .as_ref()
                .and_then(|entity| densities.get(entity))
                .copied()
                .unwrap_or(0.0);
            candidate.final_score = final_score(
                &self.weights,
                candidate.similarity,
                candidate.access_count,
                candidate.last_accessed_at,
                now,
                candidate.graph_density,
            );
        }

        candidates.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then(b.similarity.total_cmp(&a.similarity))
                .then(b.created_at.cmp(&a.created_at))
        });
        candidates.truncate(limit);

        // Fire and forget, in both stores: a failed bump must never fail the
        // turn.
        let metadata = Arc::clone(&self.metadata);
        let vector = Arc::clone(&self.vector);
        let returned: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (c.memory_id.clone(), c.vector_id.clone()))
            .collect();
        tokio::spawn(async move {
            for (memory_id, vector_id) in returned {
                if let Err(err) = metadata.bump_access(&memory_id, now).await {
                    warn!(%err, memory = memory_id, "access bump failed");
                }
                if let Err(err) = vector.bump_access(&vector_id, now).await {
                    warn!(%err, vector = vector_id, "vector access bump failed");
                }
            }
        });

        Ok(candidates)
    }

    /// Swap the vector-store id for the stable memory id and pull event and
    /// usage fields from the metadata row.  A vector without a metadata row
    /// (legacy data) keeps its own fields and id.
    async fn enrich(&self, hit: VectorHit) -> ScoredMemory {
        let row = match self.metadata.memory_by_vector(&hit.record.id).await {
            Ok(row) => row,
            Err(err) => {
                warn!(%err, vector = hit.record.id, "metadata enrichment failed");
                None
            }
        };

        match row {
            Some(row) => ScoredMemory {
                memory_id: row.id,
                persona_id: row.persona_id,
                vector_id: hit.record.id,
                entity_id: row.entity_id,
                content: row.content,
                created_at: row.created_at,
                event_time: row.event_time,
                last_accessed_at: row.last_accessed_at,
                access_count: row.access_count,
                similarity: hit.similarity,
                graph_density: 0.0,
                final_score: 0.0,
            },
            None => ScoredMemory {
                memory_id: hit.record.id.clone(),
                persona_id: hit.record.persona_id,
                vector_id: hit.record.id,
                entity_id: hit.record.entity_id,
                content: hit.record.content,
                created_at: hit.record.created_at,
                event_time: None,
                last_accessed_at: hit.record.last_accessed_at,
                access_count: hit.record.access_count,
                similarity: hit.similarity,
                graph_density: 0.0,
                final_score: 0.0,
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json::Map;

    use super::*;
    use crate::schema::{GraphEdge, GraphNode, MemoryKind, MemoryRecord, Neighborhood, VectorRecord};
    use crate::testutil::{MemGraphIndex, MemMetadataStore, MemVectorIndex, failing_embed, fixed_embed};

    fn vector_record(id: &str, persona: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            persona_id: persona.to_string(),
            content: format!("content {id}"),
            embedding,
            entity_id: None,
            created_at: now_ms(),
            last_accessed_at: now_ms(),
            access_count: 0,
            score: 0.0,
            metadata: Map::new(),
        }
    }

    fn memory_record(id: &str, persona: &str, vector: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            persona_id: persona.to_string(),
            vector_id: vector.to_string(),
            entity_id: None,
            kind: MemoryKind::LongTerm,
            content: format!("content {vector}"),
            created_at: now_ms(),
            event_time: None,
            last_accessed_at: now_ms(),
            access_count: 0,
            score: 0.0,
            metadata: Map::new(),
        }
    }

    struct Harness {
        vector: Arc<MemVectorIndex>,
        graph: Arc<MemGraphIndex>,
        metadata: Arc<MemMetadataStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                vector: Arc::new(MemVectorIndex::default()),
                graph: Arc::new(MemGraphIndex::default()),
                metadata: Arc::new(MemMetadataStore::default()),
            }
        }

        fn engine(&self, embed: crate::EmbedFn, top_k: usize) -> RetrievalEngine {
            RetrievalEngine::new(
                Arc::clone(&self.vector) as Arc<dyn VectorIndex>,
                Arc::clone(&self.graph) as Arc<dyn GraphIndex>,
                Arc::clone(&self.metadata) as Arc<dyn MetadataStore>,
                embed,
                ScoreWeights::default(),
                top_k,
            )
        }
    }

    #[tokio::test]
    async fn retrieve_returns_stable_memory_ids() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        harness.metadata.insert_memory(memory_record("m1", "alice", "v1")).await.unwrap();

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 3).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_id, "m1");
        assert_eq!(results[0].vector_id, "v1");
    }

    #[tokio::test]
    async fn retrieve_never_crosses_personas() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        harness.vector.insert(vector_record("v2", "bob", vec![1.0, 0.0])).await.unwrap();
        harness.metadata.insert_memory(memory_record("m1", "alice", "v1")).await.unwrap();
        harness.metadata.insert_memory(memory_record("m2", "bob", "v2")).await.unwrap();

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 10).await;

        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|m| m.persona_id == "alice"));
    }

    #[tokio::test]
    async fn vector_failure_returns_empty_not_error() {
        let harness = Harness::new();
        harness.vector.fail_search.store(true, Ordering::SeqCst);

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        assert!(engine.retrieve("query", "alice", 3).await.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_returns_empty() {
        let harness = Harness::new();
        let engine = harness.engine(failing_embed(), 10);
        assert!(engine.retrieve("query", "alice", 3).await.is_empty());
    }

    #[tokio::test]
    async fn graph_density_lifts_connected_memories() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        harness.vector.insert(vector_record("v2", "alice", vec![1.0, 0.0])).await.unwrap();

        let mut connected = memory_record("m1", "alice", "v1");
        connected.entity_id = Some("Kyoto".to_string());
        harness.metadata.insert_memory(connected).await.unwrap();
        harness.metadata.insert_memory(memory_record("m2", "alice", "v2")).await.unwrap();

        let dense = Neighborhood {
            nodes: (0..10)
                .map(|i| GraphNode {
                    name: format!("n{i}"),
                    kind: "entity".to_string(),
                    entity_type: None,
                    description: None,
                    created_at: 0,
                    last_accessed_at: None,
                })
                .collect(),
            edges: vec![GraphEdge {
                from_entity: "n0".to_string(),
                to_entity: "n1".to_string(),
                relation_type: "RELATED_TO".to_string(),
                weight: Some(1.0),
                created_at: 0,
            }],
        };
        harness.graph.neighborhoods.lock().unwrap().insert("Kyoto".to_string(), dense);

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 10).await;

        assert_eq!(results[0].memory_id, "m1");
        assert!(results[0].graph_density > 0.0);
        assert_eq!(results[1].graph_density, 0.0);
        assert!(results[0].final_score > results[1].final_score);
    }

    #[tokio::test]
    async fn graph_failure_keeps_candidate_with_zero_density() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        let mut record = memory_record("m1", "alice", "v1");
        record.entity_id = Some("Kyoto".to_string());
        harness.metadata.insert_memory(record).await.unwrap();
        harness.graph.fail_queries.store(true, Ordering::SeqCst);

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 3).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].graph_density, 0.0);
    }

    #[tokio::test]
    async fn results_are_truncated_to_limit() {
        let harness = Harness::new();
        for i in 0..6 {
            let vid = format!("v{i}");
            harness.vector.insert(vector_record(&vid, "alice", vec![1.0, 0.0])).await.unwrap();
            harness
                .metadata
                .insert_memory(memory_record(&format!("m{i}"), "alice", &vid))
                .await
                .unwrap();
        }

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 3).await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn returned_memories_get_access_bumped() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        harness.metadata.insert_memory(memory_record("m1", "alice", "v1")).await.unwrap();

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 3).await;
        assert_eq!(results.len(), 1);

        // The bump is fire-and-forget; yield until the spawned task ran.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let bumped = harness.metadata.get_memory("m1").await.unwrap().unwrap();
        assert_eq!(bumped.access_count, 1);
        let vectors = harness.vector.records.lock().unwrap();
        assert_eq!(vectors.get("v1").unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn ties_break_on_similarity_then_created_at() {
        let harness = Harness::new();
        harness.vector.insert(vector_record("v1", "alice", vec![1.0, 0.0])).await.unwrap();
        harness.vector.insert(vector_record("v2", "alice", vec![1.0, 0.0])).await.unwrap();

        let mut older = memory_record("m-old", "alice", "v1");
        older.created_at = 1_000;
        older.last_accessed_at = 0;
        let mut newer = memory_record("m-new", "alice", "v2");
        newer.created_at = 2_000;
        newer.last_accessed_at = 0;
        harness.metadata.insert_memory(older).await.unwrap();
        harness.metadata.insert_memory(newer).await.unwrap();

        let engine = harness.engine(fixed_embed(vec![1.0, 0.0]), 10);
        let results = engine.retrieve("query", "alice", 10).await;

        assert_eq!(results[0].memory_id, "m-new");
    }
}
