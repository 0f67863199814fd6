/// Embedded vector store: persona-scoped cosine search over redb-persisted
/// records.  The engine is deliberately brute-force — corpora here are
/// per-persona conversational memories, not web-scale indexes — and hides
/// behind [`VectorIndex`] so tests can substitute failing or counting fakes.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::schema::{VectorHit, VectorRecord};

const VECTORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("knowledge_vectors");

/// Insert / search / update / delete of content-embedding records.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, record: VectorRecord) -> Result<()>;
    /// Cosine top-k over the persona-scoped subset (or the whole index when
    /// `persona_id` is `None`).  Asking for more than the corpus holds
    /// returns the corpus, not an error.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        persona_id: Option<&str>,
    ) -> Result<Vec<VectorHit>>;
    /// Replace content and embedding in place; access counters survive.
    async fn update_content(&self, id: &str, content: &str, embedding: &[f32]) -> Result<()>;
    /// Record one read: `last_accessed_at = now`, `access_count += 1`.
    async fn bump_access(&self, id: &str, now: i64) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Records stored for one persona (used by tests and the cascade path).
    async fn count(&self, persona_id: &str) -> Result<usize>;
}

/// Cosine similarity clamped to [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(0.0, 1.0)
}

pub struct RedbVectorIndex {
    db: Database,
    path: PathBuf,
    dimensions: usize,
}

impl RedbVectorIndex {
    /// Open or create the index.  `dimensions` is fixed for the lifetime of
    /// the file; mismatched inserts are rejected.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening vector store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(VECTORS_TABLE)?;
            tx.commit()?;
        }

        info!(path = %path.display(), dimensions, "vector store ready");
        Ok(Self { db, path, dimensions })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn read_record(&self, id: &str) -> Result<Option<VectorRecord>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(VECTORS_TABLE)?;
        match tbl.get(id)? {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
        }
    }

    fn write_record(&self, record: &VectorRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(VECTORS_TABLE)?;
            tbl.insert(record.id.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RedbVectorIndex {
    async fn insert(&self, record: VectorRecord) -> Result<()> {
        if record.embedding.len() != self.dimensions {
            bail!(
                "embedding dimension mismatch: index is {}, record is {}",
                self.dimensions,
                record.embedding.len()
            );
        }
        self.write_record(&record)?;
        debug!(id = %record.id, persona = %record.persona_id, "vector inserted");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        persona_id: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(VECTORS_TABLE)?;

        let mut hits = Vec::new();
        for entry in tbl.iter()? {
            let (_, raw) = entry?;
            let record: VectorRecord = serde_json::from_slice(raw.value())?;
            if let Some(persona) = persona_id {
                if record.persona_id != persona {
                    continue;
                }
            }
            let similarity = cosine_similarity(&record.embedding, embedding);
            hits.push(VectorHit { record, similarity });
        }

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn update_content(&self, id: &str, content: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            bail!(
                "embedding dimension mismatch: index is {}, update is {}",
                self.dimensions,
                embedding.len()
            );
        }
        let Some(mut record) = self.read_record(id)? else {
            bail!("vector {id} not found");
        };
        record.content = content.to_string();
        record.embedding = embedding.to_vec();
        self.write_record(&record)
    }

    async fn bump_access(&self, id: &str, now: i64) -> Result<()> {
        let Some(mut record) = self.read_record(id)? else {
            bail!("vector {id} not found");
        };
        record.last_accessed_at = now;
        record.access_count += 1;
        self.write_record(&record)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let existed;
        {
            let mut tbl = tx.open_table(VECTORS_TABLE)?;
            existed = tbl.remove(id)?.is_some();
        }
        tx.commit()?;
        Ok(existed)
    }

    async fn count(&self, persona_id: &str) -> Result<usize> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(VECTORS_TABLE)?;
        let mut total = 0;
        for entry in tbl.iter()? {
            let (_, raw) = entry?;
            let record: VectorRecord = serde_json::from_slice(raw.value())?;
            if record.persona_id == persona_id {
                total += 1;
            }
        }
        Ok(total)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use uuid::Uuid;

    use super::*;
    use crate::schema::now_ms;

    fn temp_index(dimensions: usize) -> RedbVectorIndex {
        let path = std::env::temp_dir()
            .join("memgate-vector-tests")
            .join(format!("{}.redb", Uuid::new_v4()));
        RedbVectorIndex::open(path, dimensions).unwrap()
    }

    fn record(id: &str, persona: &str, embedding: Vec<f32>) -> VectorRecord {
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

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn search_is_persona_scoped() {
        let index = temp_index(2);
        index.insert(record("a", "alice", vec![1.0, 0.0])).await.unwrap();
        index.insert(record("b", "bob", vec![1.0, 0.0])).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 10, Some("alice")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "a");
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let index = temp_index(2);
        index.insert(record("near", "alice", vec![0.9, 0.1])).await.unwrap();
        index.insert(record("far", "alice", vec![0.0, 1.0])).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 10, Some("alice")).await.unwrap();
        assert_eq!(hits[0].record.id, "near");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn top_k_beyond_corpus_returns_corpus() {
        let index = temp_index(2);
        index.insert(record("only", "alice", vec![1.0, 0.0])).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 50, Some("alice")).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let index = temp_index(3);
        let result = index.insert(record("bad", "alice", vec![1.0, 0.0])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_replaces_content_and_embedding() {
        let index = temp_index(2);
        index.insert(record("a", "alice", vec![1.0, 0.0])).await.unwrap();
        index.update_content("a", "new content", &[0.0, 1.0]).await.unwrap();

        let hits = index.search(&[0.0, 1.0], 1, Some("alice")).await.unwrap();
        assert_eq!(hits[0].record.content, "new content");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn bump_access_updates_counters_in_place() {
        let index = temp_index(2);
        index.insert(record("a", "alice", vec![1.0, 0.0])).await.unwrap();

        index.bump_access("a", 42).await.unwrap();
        index.bump_access("a", 99).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 1, Some("alice")).await.unwrap();
        assert_eq!(hits[0].record.access_count, 2);
        assert_eq!(hits[0].record.last_accessed_at, 99);
        assert!(index.bump_access("ghost", 1).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let index = temp_index(2);
        index.insert(record("a", "alice", vec![1.0, 0.0])).await.unwrap();

        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert_eq!(index.count("alice").await.unwrap(), 0);
    }
}
