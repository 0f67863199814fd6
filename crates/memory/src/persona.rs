/// Persona lifecycle.  Create is idempotent; delete cascades through every
/// owned memory and vector record.  Graph nodes stay — entities and concepts
/// are knowledge in their own right, not owned by any single memory.
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::metadata::MetadataStore;
use crate::schema::{Persona, now_ms};
use crate::vector::VectorIndex;

pub struct PersonaManager {
    metadata: Arc<dyn MetadataStore>,
    vector: Arc<dyn VectorIndex>,
}

impl PersonaManager {
    pub fn new(metadata: Arc<dyn MetadataStore>, vector: Arc<dyn VectorIndex>) -> Self {
        Self { metadata, vector }
    }

    /// Create a persona.  Repeated creates with the same id return the
    /// existing row unchanged.
    pub async fn create(
        &self,
        id: &str,
        description: Option<String>,
        system_prompt: Option<String>,
    ) -> Result<Persona> {
        if let Some(existing) = self.metadata.get_persona(id).await? {
            info!(persona = id, "persona already exists, create is a no-op");
            return Ok(existing);
        }

        let persona = Persona {
            id: id.to_string(),
            description,
            system_prompt,
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        self.metadata.put_persona(persona.clone()).await?;
        info!(persona = id, "persona created");
        Ok(persona)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Persona>> {
        self.metadata.get_persona(id).await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Persona>> {
        self.metadata.list_personas(limit).await
    }

    pub async fn update(
        &self,
        id: &str,
        description: Option<String>,
        system_prompt: Option<String>,
    ) -> Result<Option<Persona>> {
        let Some(mut persona) = self.metadata.get_persona(id).await? else {
            return Ok(None);
        };

        if let Some(description) = description {
            persona.description = Some(description);
        }
        if let Some(system_prompt) = system_prompt {
            persona.system_prompt = Some(system_prompt);
        }
        persona.updated_at = now_ms();

        self.metadata.put_persona(persona.clone()).await?;
        info!(persona = id, "persona updated");
        Ok(Some(persona))
    }

    /// Cascade delete: every owned memory's vector is deleted (individual
    /// failures logged, never aborting), every metadata row removed, then
    /// the persona row itself.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.metadata.get_persona(id).await?.is_none() {
            return Ok(false);
        }

        let memories = self.metadata.list_memories(Some(id), usize::MAX).await?;
        let total = memories.len();
        for memory in memories {
            if let Err(err) = self.vector.delete(&memory.vector_id).await {
                warn!(%err, vector = %memory.vector_id, "vector delete failed during cascade");
            }
            if let Err(err) = self.metadata.delete_memory(&memory.id).await {
                warn!(%err, memory = %memory.id, "memory row delete failed during cascade");
            }
        }

        let removed = self.metadata.delete_persona(id).await?;
        info!(persona = id, memories = total, "persona deleted with cascade");
        Ok(removed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::schema::{MemoryKind, MemoryRecord, VectorRecord};
    use crate::testutil::{MemMetadataStore, MemVectorIndex};

    struct Harness {
        vector: Arc<MemVectorIndex>,
        metadata: Arc<MemMetadataStore>,
        manager: PersonaManager,
    }

    impl Harness {
        fn new() -> Self {
            let vector = Arc::new(MemVectorIndex::default());
            let metadata = Arc::new(MemMetadataStore::default());
            let manager = PersonaManager::new(
                Arc::clone(&metadata) as Arc<dyn MetadataStore>,
                Arc::clone(&vector) as Arc<dyn VectorIndex>,
            );
            Self {
                vector,
                metadata,
                manager,
            }
        }

        async fn seed_memory(&self, id: &str, persona: &str) {
            let vector_id = format!("vec-{id}");
            self.vector
                .insert(VectorRecord {
                    id: vector_id.clone(),
                    persona_id: persona.to_string(),
                    content: String::new(),
                    embedding: vec![1.0, 0.0],
                    entity_id: None,
                    created_at: now_ms(),
                    last_accessed_at: now_ms(),
                    access_count: 0,
                    score: 0.0,
                    metadata: Map::new(),
                })
                .await
                .unwrap();
            self.metadata
                .insert_memory(MemoryRecord {
                    id: id.to_string(),
                    persona_id: persona.to_string(),
                    vector_id,
                    entity_id: None,
                    kind: MemoryKind::LongTerm,
                    content: String::new(),
                    created_at: now_ms(),
                    event_time: None,
                    last_accessed_at: now_ms(),
                    access_count: 0,
                    score: 0.0,
                    metadata: Map::new(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let harness = Harness::new();
        let first = harness
            .manager
            .create("carol", Some("desc".to_string()), None)
            .await
            .unwrap();
        let second = harness
            .manager
            .create("carol", Some("other desc".to_string()), None)
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.description.as_deref(), Some("desc"));
    }

    #[tokio::test]
    async fn update_touches_only_provided_fields() {
        let harness = Harness::new();
        harness
            .manager
            .create("carol", Some("desc".to_string()), Some("prompt".to_string()))
            .await
            .unwrap();

        let updated = harness
            .manager
            .update("carol", None, Some("new prompt".to_string()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.description.as_deref(), Some("desc"));
        assert_eq!(updated.system_prompt.as_deref(), Some("new prompt"));
        assert!(harness.manager.update("ghost", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cascade_delete_leaves_zero_records() {
        let harness = Harness::new();
        harness.manager.create("carol", None, None).await.unwrap();
        for i in 0..3 {
            harness.seed_memory(&format!("m{i}"), "carol").await;
        }

        assert!(harness.manager.delete("carol").await.unwrap());

        assert!(harness.manager.get("carol").await.unwrap().is_none());
        assert!(harness.metadata.list_memories(Some("carol"), 100).await.unwrap().is_empty());
        assert_eq!(harness.vector.count("carol").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cascade_does_not_touch_other_personas() {
        let harness = Harness::new();
        harness.manager.create("carol", None, None).await.unwrap();
        harness.manager.create("dave", None, None).await.unwrap();
        harness.seed_memory("m1", "carol").await;
        harness.seed_memory("m2", "dave").await;

        harness.manager.delete("carol").await.unwrap();

        assert!(harness.manager.get("dave").await.unwrap().is_some());
        assert_eq!(harness.metadata.list_memories(Some("dave"), 100).await.unwrap().len(), 1);
        assert_eq!(harness.vector.count("dave").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_missing_persona_returns_false() {
        let harness = Harness::new();
        assert!(!harness.manager.delete("ghost").await.unwrap());
    }
}
