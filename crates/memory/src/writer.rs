/// Multi-store write coordination.
///
/// A single memory write fans out to three stores: embed the content, insert
/// the vector record, insert the metadata row, plus graph upserts when the
/// batch carried entities or relations.  The vector and metadata writes are
/// not atomic across stores — when the metadata insert fails after the
/// vector landed, a compensating vector delete runs and the write reports
/// failure.  Graph writes are never rolled back: entities are long-lived
/// knowledge and a stray node is harmless.
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::EmbedFn;
use crate::dedup::Deduplicator;
use crate::extraction::{ExtractionResult, parse_event_time};
use crate::graph::{GraphIndex, MENTIONS};
use crate::metadata::MetadataStore;
use crate::schema::{MemoryKind, MemoryRecord, VectorRecord, now_ms};
use crate::vector::VectorIndex;

/// One requested memory write.  `id` is caller-supplied for CRUD idempotency;
/// extraction leaves it empty and gets a fresh uuid.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriteRequest {
    pub id: Option<String>,
    pub persona_id: String,
    pub content: String,
    pub entity_id: Option<String>,
    pub event_time: Option<NaiveDateTime>,
    pub metadata: Map<String, Value>,
}

pub struct WriteCoordinator {
    vector: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphIndex>,
    metadata: Arc<dyn MetadataStore>,
    embed: EmbedFn,
}

impl WriteCoordinator {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphIndex>,
        metadata: Arc<dyn MetadataStore>,
        embed: EmbedFn,
    ) -> Self {
        Self {
            vector,
            graph,
            metadata,
            embed,
        }
    }

    /// Create one memory across the vector and metadata stores.  Re-creating
    /// an existing id is a no-op returning the stored record.
    pub async fn create_memory(&self, request: MemoryWriteRequest) -> Result<MemoryRecord> {
        if let Some(id) = &request.id {
            if let Some(existing) = self.metadata.get_memory(id).await? {
                info!(memory = %id, "create is a no-op, memory already exists");
                return Ok(existing);
            }
        }

        let embedding = (self.embed)(request.content.clone())
            .await
            .context("embedding memory content")?;

        let now = now_ms();
        let vector_id = Uuid::new_v4().to_string();
        let vector_record = VectorRecord {
            id: vector_id.clone(),
            persona_id: request.persona_id.clone(),
            content: request.content.clone(),
            embedding,
            entity_id: request.entity_id.clone(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            score: 0.0,
            metadata: request.metadata.clone(),
        };
        self.vector
            .insert(vector_record)
            .await
            .context("inserting vector record")?;

        let record = MemoryRecord {
            id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            persona_id: request.persona_id,
            vector_id: vector_id.clone(),
            entity_id: request.entity_id,
            kind: MemoryKind::LongTerm,
            content: request.content,
            created_at: now,
            event_time: request.event_time,
            last_accessed_at: now,
            access_count: 0,
            score: 0.0,
            metadata: request.metadata,
        };

        if let Err(err) = self.metadata.insert_memory(record.clone()).await {
            // Vector landed but the row did not: compensate so no orphan
            // vector survives the failed create.
            error!(%err, vector = %vector_id, "metadata insert failed, rolling back vector");
            if let Err(rollback_err) = self.vector.delete(&vector_id).await {
                error!(%rollback_err, vector = %vector_id, "compensating vector delete failed");
            }
            return Err(err).context("inserting memory metadata");
        }

        info!(memory = %record.id, persona = %record.persona_id, "memory created");
        Ok(record)
    }

    /// Update content (re-embedding and rewriting the vector record in place)
    /// and/or metadata.  `id`, `created_at` and `access_count` are preserved.
    pub async fn update_memory(
        &self,
        id: &str,
        content: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Option<MemoryRecord>> {
        let Some(mut record) = self.metadata.get_memory(id).await? else {
            return Ok(None);
        };

        if let Some(content) = content {
            let embedding = (self.embed)(content.to_string())
                .await
                .context("re-embedding updated content")?;
            self.vector
                .update_content(&record.vector_id, content, &embedding)
                .await
                .context("updating vector record")?;
            record.content = content.to_string();
        }
        if let Some(metadata) = metadata {
            record.metadata = metadata;
        }

        self.metadata.update_memory(record.clone()).await?;
        info!(memory = %id, "memory updated");
        Ok(Some(record))
    }

    /// Delete one memory.  A failing vector delete is logged and the
    /// metadata row still removed — the dangling vector is invisible to
    /// future persona-scoped retrieval.
    pub async fn delete_memory(&self, id: &str) -> Result<bool> {
        let Some(record) = self.metadata.get_memory(id).await? else {
            return Ok(false);
        };

        match self.vector.delete(&record.vector_id).await {
            Ok(_) => {}
            Err(err) => {
                warn!(%err, vector = %record.vector_id, "vector delete failed, removing row anyway");
            }
        }

        let removed = self.metadata.delete_memory(id).await?;
        if removed {
            info!(memory = %id, "memory deleted");
        }
        Ok(removed)
    }

    /// Persist one extraction batch: dedupe and write each memory (a failed
    /// memory never aborts the rest), then upsert entities and relations.
    /// Returns the ids of the memories actually written.
    pub async fn write_extraction(
        &self,
        persona_id: &str,
        batch: ExtractionResult,
        dedup: &Deduplicator,
    ) -> Vec<String> {
        let mut saved = Vec::new();

        for memory in batch.memories {
            if dedup.is_duplicate(&memory.content, persona_id).await {
                continue;
            }

            let event_time = memory.event_time.as_deref().and_then(|raw| {
                let parsed = parse_event_time(raw);
                if parsed.is_none() {
                    warn!(raw, "unparseable event_time, storing memory without it");
                }
                parsed
            });

            let request = MemoryWriteRequest {
                id: None,
                persona_id: persona_id.to_string(),
                content: memory.content,
                entity_id: None,
                event_time,
                metadata: Map::new(),
            };
            match self.create_memory(request).await {
                Ok(record) => saved.push(record.id),
                Err(err) => error!(%err, "failed to save extracted memory"),
            }
        }

        // User-kind entities become User nodes; their outgoing relations (and
        // anything explicitly typed MENTIONS) become MENTIONS edges instead
        // of entity-to-entity relations.
        let mut user_names: HashSet<String> = HashSet::new();
        for entity in batch.entities {
            if entity.kind.eq_ignore_ascii_case("user") {
                user_names.insert(entity.name.clone());
                if let Err(err) = self
                    .graph
                    .upsert_user(persona_id, &entity.name, &entity.name)
                    .await
                {
                    error!(%err, user = %entity.name, "failed to upsert user");
                }
            } else if let Err(err) = self
                .graph
                .upsert_entity(
                    persona_id,
                    &entity.name,
                    &entity.kind,
                    Some("Auto-extracted entity from conversation"),
                )
                .await
            {
                error!(%err, entity = %entity.name, "failed to upsert entity");
            }
        }

        for relation in batch.relations {
            if relation.kind == MENTIONS || user_names.contains(&relation.from) {
                if let Err(err) = self
                    .graph
                    .upsert_mention(persona_id, &relation.from, &relation.to)
                    .await
                {
                    error!(%err, user = %relation.from, entity = %relation.to, "failed to upsert mention");
                }
            } else if let Err(err) = self
                .graph
                .upsert_relation(persona_id, &relation.from, &relation.to, &relation.kind, Some(1.0))
                .await
            {
                error!(%err, from = %relation.from, to = %relation.to, "failed to upsert relation");
            }
        }

        info!(persona = persona_id, saved = saved.len(), "extraction batch written");
        saved
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
