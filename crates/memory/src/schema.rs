use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch — the timestamp unit of every store.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    LongTerm,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongTerm => "long_term",
        }
    }
}

/// An isolated memory space belonging to one conversational identity.  The id
/// doubles as the first half of the public model name
/// (`persona_id/lm_model`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Persona {
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            description: None,
            system_prompt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Metadata row for one unit of remembered content.  The embedding itself
/// lives in the vector store under `vector_id`; `entity_id`, when set, names
/// a graph node in the same persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub persona_id: String,
    pub vector_id: String,
    pub entity_id: Option<String>,
    pub kind: MemoryKind,
    pub content: String,
    /// Wall clock at ingestion.
    pub created_at: i64,
    /// When the remembered event happened, as stated inside the conversation.
    /// Local time, never converted to UTC; may predate `created_at`.
    pub event_time: Option<NaiveDateTime>,
    pub last_accessed_at: i64,
    pub access_count: u64,
    /// Persisted as 0.0 at creation and left untouched; ranking responses use
    /// the transiently computed final score instead.
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One record in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub persona_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub entity_id: Option<String>,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub access_count: u64,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A vector-search candidate: the stored record plus its cosine similarity
/// to the query, in [0, 1].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record: VectorRecord,
    pub similarity: f32,
}

/// A node in a persona's knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub name: String,
    /// "entity", "concept" or "user".
    pub kind: String,
    pub entity_type: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
    pub last_accessed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub weight: Option<f64>,
    pub created_at: i64,
}

/// The k-hop surroundings of an entity (or a whole persona graph).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Neighborhood {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Persisted configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRow {
    pub key: String,
    pub value: Value,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kind_serializes_as_snake_case() {
        assert_eq!(serde_json::to_string(&MemoryKind::LongTerm).unwrap(), "\"long_term\"");
        assert_eq!(MemoryKind::LongTerm.as_str(), "long_term");
    }

    #[test]
    fn memory_record_round_trips_through_json() {
        let record = MemoryRecord {
            id: "m1".to_string(),
            persona_id: "alice".to_string(),
            vector_id: "v1".to_string(),
            entity_id: Some("Kyoto".to_string()),
            kind: MemoryKind::LongTerm,
            content: "went to Kyoto".to_string(),
            created_at: 1_700_000_000_000,
            event_time: "2025-03-08T10:00:00".parse().ok(),
            last_accessed_at: 1_700_000_000_000,
            access_count: 2,
            score: 0.0,
            metadata: Map::new(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: MemoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.event_time, record.event_time);
        assert_eq!(back.access_count, 2);
    }
}
