/// Semantic near-duplicate gate for extracted memories.
///
/// A candidate whose best same-persona similarity reaches the threshold is
/// dropped before it ever touches the stores: near-duplicates inflate
/// retrieval rankings and waste context budget.  The default threshold
/// (0.85) sits above the similarity at which paraphrases still share
/// meaning — below it, content counts as genuinely new.
use std::sync::Arc;

use tracing::{info, warn};

use crate::EmbedFn;
use crate::vector::VectorIndex;

/// Existing records consulted per duplicate check.
const DEDUP_TOP_K: usize = 5;

pub struct Deduplicator {
    vector: Arc<dyn VectorIndex>,
    embed: EmbedFn,
    threshold: f32,
}

impl Deduplicator {
    pub fn new(vector: Arc<dyn VectorIndex>, embed: EmbedFn, threshold: f32) -> Self {
        Self {
            vector,
            embed,
            threshold,
        }
    }

    /// `true` when `content` is a near-duplicate of an existing memory in the
    /// same persona.  Errors answer `false` — when in doubt, keep the memory.
    pub async fn is_duplicate(&self, content: &str, persona_id: &str) -> bool {
        let embedding = match (self.embed)(content.to_string()).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(%err, "duplicate check could not embed, treating as new");
                return false;
            }
        };

        let hits = match self
            .vector
            .search(&embedding, DEDUP_TOP_K, Some(persona_id))
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(%err, "duplicate check search failed, treating as new");
                return false;
            }
        };

        for hit in hits {
            if hit.similarity >= self.threshold {
                info!(
                    similarity = hit.similarity,
                    existing = %hit.record.id,
                    "duplicate memory detected, skipping"
                );
                return true;
            }
        }
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    use serde_json::Map;

    use super::*;
    use crate::schema::{VectorRecord, now_ms};
    use crate::testutil::{MemVectorIndex, failing_embed, mapped_embed};

    fn record(id: &str, persona: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            persona_id: persona.to_string(),
            content: String::new(),
            embedding,
            entity_id: None,
            created_at: now_ms(),
            last_accessed_at: now_ms(),
            access_count: 0,
            score: 0.0,
            metadata: Map::new(),
        }
    }

    fn embed_for(pairs: &[(&str, Vec<f32>)]) -> crate::EmbedFn {
        let map: HashMap<String, Vec<f32>> = pairs
            .iter()
            .map(|(text, vector)| (text.to_string(), vector.clone()))
            .collect();
        mapped_embed(map, vec![0.0, 1.0])
    }

    #[tokio::test]
    async fn near_identical_content_is_a_duplicate() {
        let vector = Arc::new(MemVectorIndex::default());
        vector.insert(record("v1", "bob", vec![1.0, 0.0])).await.unwrap();

        let dedup = Deduplicator::new(
            Arc::clone(&vector) as Arc<dyn VectorIndex>,
            embed_for(&[("my birthday is May 12", vec![0.99, 0.01])]),
            0.85,
        );
        assert!(dedup.is_duplicate("my birthday is May 12", "bob").await);
    }

    #[tokio::test]
    async fn dissimilar_content_passes() {
        let vector = Arc::new(MemVectorIndex::default());
        vector.insert(record("v1", "bob", vec![1.0, 0.0])).await.unwrap();

        let dedup = Deduplicator::new(
            Arc::clone(&vector) as Arc<dyn VectorIndex>,
            embed_for(&[("likes hiking", vec![0.0, 1.0])]),
            0.85,
        );
        assert!(!dedup.is_duplicate("likes hiking", "bob").await);
    }

    #[tokio::test]
    async fn similarity_just_below_threshold_passes() {
        let vector = Arc::new(MemVectorIndex::default());
        vector.insert(record("v1", "bob", vec![1.0, 0.0])).await.unwrap();

        // cos(θ) ≈ 0.8 < 0.85
        let dedup = Deduplicator::new(
            Arc::clone(&vector) as Arc<dyn VectorIndex>,
            embed_for(&[("close but new", vec![0.8, 0.6])]),
            0.85,
        );
        assert!(!dedup.is_duplicate("close but new", "bob").await);
    }

    #[tokio::test]
    async fn duplicate_check_is_persona_scoped() {
        let vector = Arc::new(MemVectorIndex::default());
        vector.insert(record("v1", "alice", vec![1.0, 0.0])).await.unwrap();

        let dedup = Deduplicator::new(
            Arc::clone(&vector) as Arc<dyn VectorIndex>,
            embed_for(&[("same fact", vec![1.0, 0.0])]),
            0.85,
        );
        // Identical vector, different persona: not a duplicate for bob.
        assert!(!dedup.is_duplicate("same fact", "bob").await);
    }

    #[tokio::test]
    async fn embedding_failure_treats_content_as_new() {
        let vector = Arc::new(MemVectorIndex::default());
        let dedup = Deduplicator::new(Arc::clone(&vector) as Arc<dyn VectorIndex>, failing_embed(), 0.85);
        assert!(!dedup.is_duplicate("anything", "bob").await);
    }

    #[tokio::test]
    async fn search_failure_treats_content_as_new() {
        let vector = Arc::new(MemVectorIndex::default());
        vector.fail_search.store(true, Ordering::SeqCst);

        let dedup = Deduplicator::new(
            Arc::clone(&vector) as Arc<dyn VectorIndex>,
            embed_for(&[]),
            0.85,
        );
        assert!(!dedup.is_duplicate("anything", "bob").await);
    }
}
