//! Persona-scoped long-term memory: coordinated vector, graph and metadata
//! stores with retrieval scoring, prompt injection, post-turn extraction and
//! rollback-aware writes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

mod dedup;
mod extraction;
mod graph;
mod injection;
mod metadata;
mod persona;
mod retrieval;
mod schema;
mod scorer;
mod vector;
mod writer;

pub use dedup::Deduplicator;
pub use extraction::{
    ExtractedEntity, ExtractedMemory, ExtractedRelation, ExtractionBackend, ExtractionEngine,
    ExtractionResult, GateDecision, conversation_text, parse_event_time,
};
pub use graph::{BELONGS_TO, GraphIndex, MENTIONS, RELATED_TO, RedbGraphIndex};
pub use injection::{
    InjectionMode, append_persona_prompt, escape_xml, inject_memories, render_memory_block,
};
pub use metadata::{MetadataStore, RedbMetadataStore};
pub use persona::PersonaManager;
pub use retrieval::{GRAPH_DEPTH, RetrievalEngine, ScoredMemory};
pub use schema::{
    ConfigRow, GraphEdge, GraphNode, MemoryKind, MemoryRecord, Neighborhood, Persona, VectorHit,
    VectorRecord, now_ms,
};
pub use scorer::{ScoreWeights, final_score, graph_density};
pub use vector::{RedbVectorIndex, VectorIndex, cosine_similarity};
pub use writer::{MemoryWriteRequest, WriteCoordinator};

/// An async function mapping text to its embedding.  Stored as an `Arc` so
/// engines can clone it freely; the returned future is `Send + 'static` so it
/// can be awaited from spawned background tasks.
pub type EmbedFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send>> + Send + Sync>;
