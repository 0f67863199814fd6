use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Default prompt for the structured memory-extraction call.  Two stages use
/// the LM: the gate prompt is assembled in code (it depends on the memories
/// injected this turn), while this template is substituted with
/// `{current_time}`, `{current_date}` and `{conversation_text}` and can be
/// overridden through the persisted `memory_extraction` configuration.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Analyze the conversation and extract important information, entities and relations.

Current time: {current_time}
Current date: {current_date}

Conversation:
{conversation_text}

Return JSON in exactly this shape:
{
  "memories": [
    {
      "content": "the remembered fact",
      "event_time": "when the event happened (ISO 8601, minute precision, e.g. 2024-01-15T14:30:00)"
    }
  ],
  "entities": [
    {"name": "entity name", "type": "entity type"}
  ],
  "relations": [
    {"from": "entity 1", "to": "entity 2", "type": "relation type"}
  ]
}

What to extract:
1. Memories: important user preferences (likes/dislikes), durable facts (birthday, contact details), anything the user explicitly asked to remember.
2. Entities: people, places, things, dates.
3. Relations: how entities connect (e.g. "likes", "born in", "works at").
4. Times:
   - event_time is when the event happened as described in the conversation ("yesterday", "last week", "2024-01-15").
   - Format: minute precision, ISO 8601 (YYYY-MM-DDTHH:MM:SS).
   - Keep event_time in the same time zone as the current time above; do not convert to UTC.
   - If the conversation mentions no concrete time, set event_time to null.

Time anchors:
- "just now": a few minutes before {current_time}
- "an hour ago": one hour before {current_time}
- "yesterday": the day before {current_date}
- "today": {current_date}
- "last week": seven days before {current_date}

If the conversation contains nothing important, return empty arrays."#;

/// Default system prompt attached to the bootstrap persona.
pub const DEFAULT_PERSONA_PROMPT: &str = "You are an assistant that remembers what users tell you and uses those \
memories to give personalized replies. When a memory is relevant, weave it into your answer naturally; never \
announce that you are consulting memories. When nothing relevant is remembered, just answer the question.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on every request.  Empty string disables auth.
    pub api_key: String,
    /// Directory holding the metadata, vector and graph store files.
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_key: String::new(),
            data_dir: "./data".to_string(),
        }
    }
}

/// One OpenAI-style endpoint.  Three of these exist (primary chat, memory
/// extraction, embedding) so extraction can run on a cheaper model and the
/// embedding provider can be a different vendor entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Fixed for the lifetime of the vector index.
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub prompt: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySystemConfig {
    pub enabled: bool,
    /// Maximum memories folded into one turn.
    pub max_long_term: usize,
    /// "system", "messages" or "mixed" (legacy alias of "system").
    pub injection_mode: String,
    /// Cosine similarity at or above which an extracted memory is dropped as
    /// a near-duplicate of an existing one.
    pub dedup_threshold: f32,
}

impl Default for MemorySystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_long_term: 3,
            injection_mode: "system".to_string(),
            dedup_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub similarity_weight: f64,
    pub access_weight: f64,
    pub recency_weight: f64,
    pub graph_weight: f64,
    /// Decay constant applied to millisecond timestamp deltas.
    pub recency_decay_lambda: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.4,
            access_weight: 0.3,
            recency_weight: 0.2,
            graph_weight: 0.1,
            recency_decay_lambda: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Candidate count for the first-stage vector search.
    pub top_k: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

/// Logical table names of the graph store, kept configurable for parity with
/// the persisted `graph` configuration key.  The embedded engine maps them
/// onto fixed physical tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub node_table_user: String,
    pub node_table_entity: String,
    pub node_table_concept: String,
    pub rel_table_mentions: String,
    pub rel_table_related_to: String,
    pub rel_table_belongs_to: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            node_table_user: "User".to_string(),
            node_table_entity: "Entity".to_string(),
            node_table_concept: "Concept".to_string(),
            rel_table_mentions: "MENTIONS".to_string(),
            rel_table_related_to: "RELATED_TO".to_string(),
            rel_table_belongs_to: "BELONGS_TO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Embedding cache TTL in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub default_id: String,
    pub default_description: String,
    pub default_system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_id: "assistant".to_string(),
            default_description: "Memgate default assistant".to_string(),
            default_system_prompt: DEFAULT_PERSONA_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub memory_extraction: ExtractionConfig,
    pub memory_system: MemorySystemConfig,
    pub memory_scoring: ScoringConfig,
    pub vector: VectorConfig,
    pub graph: GraphConfig,
    pub cache: CacheConfig,
    pub persona: PersonaConfig,
}

impl AppConfig {
    /// Load from a TOML file, falling back to compiled defaults when the file
    /// is absent.  API keys may be overridden through the environment
    /// (`MEMGATE_API_KEY`, `LLM_API_KEY`, `EMBEDDING_API_KEY`,
    /// `MEMORY_EXTRACTION_API_KEY`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("MEMGATE_API_KEY") {
            config.server.api_key = value;
        }
        if let Ok(value) = env::var("LLM_API_KEY") {
            if !value.is_empty() {
                config.llm.api_key = value;
            }
        }
        if let Ok(value) = env::var("EMBEDDING_API_KEY") {
            if !value.is_empty() {
                config.embedding.api_key = value;
            }
        }
        if let Ok(value) = env::var("MEMORY_EXTRACTION_API_KEY") {
            if !value.is_empty() {
                config.memory_extraction.api_key = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// `true` when requests must carry the configured bearer token.
    pub fn auth_required(&self) -> bool {
        !self.server.api_key.is_empty()
    }
}

// ── Persisted configuration registry ──────────────────────────────────────────

/// Keys recognized by the `/config` surface.  Reads of unknown keys are 404s;
/// reads of known keys fall back to the compiled defaults below when no row
/// has been persisted yet.
pub const CONFIG_KEYS: &[&str] = &[
    "llm",
    "embedding",
    "memory_extraction",
    "memory_system",
    "memory_scoring",
    "vector",
    "graph",
    "cache",
];

/// The JSON default for one persisted configuration key, with its
/// human-readable description.
pub fn default_configuration(config: &AppConfig, key: &str) -> Option<(Value, &'static str)> {
    let entry = match key {
        "llm" => (
            json!({
                "base_url": config.llm.base_url,
                "api_key": config.llm.api_key,
                "model": config.llm.model,
                "timeout_secs": config.llm.timeout_secs,
            }),
            "Primary chat LM endpoint",
        ),
        "embedding" => (
            json!({
                "base_url": config.embedding.base_url,
                "api_key": config.embedding.api_key,
                "model": config.embedding.model,
                "dimensions": config.embedding.dimensions,
                "timeout_secs": config.embedding.timeout_secs,
            }),
            "Embedding endpoint",
        ),
        "memory_extraction" => (
            json!({
                "base_url": config.memory_extraction.base_url,
                "api_key": config.memory_extraction.api_key,
                "model": config.memory_extraction.model,
                "timeout_secs": config.memory_extraction.timeout_secs,
                "prompt": config.memory_extraction.prompt,
            }),
            "Memory-extraction LM endpoint",
        ),
        "memory_system" => (
            json!({
                "enabled": config.memory_system.enabled,
                "max_long_term": config.memory_system.max_long_term,
                "injection_mode": config.memory_system.injection_mode,
                "dedup_threshold": config.memory_system.dedup_threshold,
            }),
            "Memory system switches",
        ),
        "memory_scoring" => (
            json!({
                "similarity_weight": config.memory_scoring.similarity_weight,
                "access_weight": config.memory_scoring.access_weight,
                "recency_weight": config.memory_scoring.recency_weight,
                "graph_weight": config.memory_scoring.graph_weight,
                "recency_decay_lambda": config.memory_scoring.recency_decay_lambda,
            }),
            "Retrieval scoring weights",
        ),
        "vector" => (
            json!({ "top_k": config.vector.top_k }),
            "Vector store configuration",
        ),
        "graph" => (
            json!({
                "node_table_user": config.graph.node_table_user,
                "node_table_entity": config.graph.node_table_entity,
                "node_table_concept": config.graph.node_table_concept,
                "rel_table_mentions": config.graph.rel_table_mentions,
                "rel_table_related_to": config.graph.rel_table_related_to,
                "rel_table_belongs_to": config.graph.rel_table_belongs_to,
            }),
            "Graph store configuration",
        ),
        "cache" => (
            json!({ "ttl_secs": config.cache.ttl_secs }),
            "Embedding cache configuration",
        ),
        _ => return None,
    };
    Some(entry)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
