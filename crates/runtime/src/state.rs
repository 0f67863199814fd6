use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use memgate_config::{AppConfig, CONFIG_KEYS, MemorySystemConfig, ScoringConfig, default_configuration};
use memgate_llm::{ChatMessage, EmbeddingClient, LmClient};
use memgate_memory::{
    Deduplicator, EmbedFn, ExtractionBackend, ExtractionEngine, GraphIndex, MetadataStore,
    PersonaManager, RedbGraphIndex, RedbMetadataStore, RedbVectorIndex, RetrievalEngine,
    ScoreWeights, VectorIndex, WriteCoordinator,
};

/// [`ExtractionBackend`] over a real LM client: one JSON-mode chat call.
pub struct LmJsonBackend(pub Arc<LmClient>);

#[async_trait]
impl ExtractionBackend for LmJsonBackend {
    async fn complete_json(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user));
        self.0.complete_json(&messages, temperature, max_tokens).await
    }
}

/// Wrap the embedding client as the function type the memory engines take.
pub fn embedding_fn(client: Arc<EmbeddingClient>) -> EmbedFn {
    Arc::new(move |text| {
        let client = Arc::clone(&client);
        Box::pin(async move { client.embed(&text).await })
    })
}

/// Everything one request needs, shared behind an `Arc`.  Store adapters and
/// LM clients are built once at startup; the per-request engines are cheap
/// bundles of `Arc`s assembled from resolved configuration.
pub struct AppState {
    pub config: AppConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub vector: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphIndex>,
    pub primary: Arc<LmClient>,
    pub extraction_lm: Arc<LmClient>,
    pub embed: EmbedFn,
    /// Backend for the extraction gate (primary chat endpoint).
    pub gate_backend: Arc<dyn ExtractionBackend>,
    /// Backend for structured extraction (its own endpoint).
    pub extract_backend: Arc<dyn ExtractionBackend>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open the stores under `data_dir`, build the three LM clients, seed the
    /// persisted configuration rows and the default persona.
    pub async fn initialize(config: AppConfig) -> Result<SharedState> {
        let data_dir = Path::new(&config.server.data_dir);
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(RedbMetadataStore::open(data_dir.join("metadata.redb"))?);
        let vector: Arc<dyn VectorIndex> = Arc::new(RedbVectorIndex::open(
            data_dir.join("vectors.redb"),
            config.embedding.dimensions,
        )?);
        let graph: Arc<dyn GraphIndex> = Arc::new(RedbGraphIndex::open(data_dir.join("graph.redb"))?);

        let primary = Arc::new(LmClient::new(
            &config.llm.base_url,
            &config.llm.api_key,
            &config.llm.model,
            config.llm.timeout_secs,
        )?);
        let extraction_lm = Arc::new(LmClient::new(
            &config.memory_extraction.base_url,
            &config.memory_extraction.api_key,
            &config.memory_extraction.model,
            config.memory_extraction.timeout_secs,
        )?);
        let embedding = Arc::new(EmbeddingClient::new(
            &config.embedding.base_url,
            &config.embedding.api_key,
            &config.embedding.model,
            config.embedding.dimensions,
            config.embedding.timeout_secs,
            Duration::from_secs(config.cache.ttl_secs),
        )?);

        let state = Arc::new(Self {
            embed: embedding_fn(Arc::clone(&embedding)),
            gate_backend: Arc::new(LmJsonBackend(Arc::clone(&primary))),
            extract_backend: Arc::new(LmJsonBackend(Arc::clone(&extraction_lm))),
            config,
            metadata,
            vector,
            graph,
            primary,
            extraction_lm,
        });
        state.bootstrap().await?;
        Ok(state)
    }

    /// Assembly seam for tests: injected adapters, embedder and extraction
    /// backends, no network clients behind them.
    pub fn from_parts(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphIndex>,
        embed: EmbedFn,
        gate_backend: Arc<dyn ExtractionBackend>,
        extract_backend: Arc<dyn ExtractionBackend>,
    ) -> Result<SharedState> {
        let primary = Arc::new(LmClient::new(
            &config.llm.base_url,
            &config.llm.api_key,
            &config.llm.model,
            config.llm.timeout_secs,
        )?);
        let extraction_lm = Arc::new(LmClient::new(
            &config.memory_extraction.base_url,
            &config.memory_extraction.api_key,
            &config.memory_extraction.model,
            config.memory_extraction.timeout_secs,
        )?);
        Ok(Arc::new(Self {
            config,
            metadata,
            vector,
            graph,
            primary,
            extraction_lm,
            embed,
            gate_backend,
            extract_backend,
        }))
    }

    /// Seed the `configurations` table (existing rows win) and the default
    /// persona.
    pub async fn bootstrap(&self) -> Result<()> {
        for key in CONFIG_KEYS {
            if self.metadata.get_config(key).await?.is_some() {
                continue;
            }
            let Some((value, description)) = default_configuration(&self.config, key) else {
                continue;
            };
            self.metadata.put_config(key, value, description).await?;
            info!(key, "seeded configuration");
        }

        let persona = &self.config.persona;
        self.persona_manager()
            .create(
                &persona.default_id,
                Some(persona.default_description.clone()),
                Some(persona.default_system_prompt.clone()),
            )
            .await?;
        Ok(())
    }

    /// Read one persisted configuration key into a typed struct, falling
    /// back to the compiled default on miss or parse failure.
    async fn resolved<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.metadata.get_config(key).await {
            Ok(Some(row)) => match serde_json::from_value(row.value) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(%err, key, "persisted configuration unreadable, using defaults");
                    fallback
                }
            },
            Ok(None) => fallback,
            Err(err) => {
                warn!(%err, key, "configuration read failed, using defaults");
                fallback
            }
        }
    }

    pub async fn memory_settings(&self) -> MemorySystemConfig {
        self.resolved("memory_system", self.config.memory_system.clone()).await
    }

    pub async fn score_weights(&self) -> ScoreWeights {
        let scoring: ScoringConfig = self.resolved("memory_scoring", self.config.memory_scoring.clone()).await;
        ScoreWeights {
            similarity: scoring.similarity_weight,
            access: scoring.access_weight,
            recency: scoring.recency_weight,
            graph: scoring.graph_weight,
            lambda: scoring.recency_decay_lambda,
        }
    }

    pub async fn vector_top_k(&self) -> usize {
        #[derive(serde::Deserialize)]
        struct TopK {
            top_k: usize,
        }
        self.resolved("vector", TopK { top_k: self.config.vector.top_k }).await.top_k
    }

    /// The extraction prompt template, persisted value first.
    pub async fn extraction_prompt(&self) -> String {
        #[derive(serde::Deserialize)]
        struct Prompt {
            prompt: String,
        }
        self.resolved(
            "memory_extraction",
            Prompt { prompt: self.config.memory_extraction.prompt.clone() },
        )
        .await
        .prompt
    }

    pub async fn retrieval_engine(&self) -> RetrievalEngine {
        RetrievalEngine::new(
            Arc::clone(&self.vector),
            Arc::clone(&self.graph),
            Arc::clone(&self.metadata),
            Arc::clone(&self.embed),
            self.score_weights().await,
            self.vector_top_k().await,
        )
    }

    pub fn write_coordinator(&self) -> WriteCoordinator {
        WriteCoordinator::new(
            Arc::clone(&self.vector),
            Arc::clone(&self.graph),
            Arc::clone(&self.metadata),
            Arc::clone(&self.embed),
        )
    }

    pub async fn deduplicator(&self) -> Deduplicator {
        let settings = self.memory_settings().await;
        Deduplicator::new(
            Arc::clone(&self.vector),
            Arc::clone(&self.embed),
            settings.dedup_threshold,
        )
    }

    pub async fn extraction_engine(&self) -> ExtractionEngine {
        ExtractionEngine::new(
            Arc::clone(&self.gate_backend),
            Arc::clone(&self.extract_backend),
            self.extraction_prompt().await,
        )
    }

    pub fn persona_manager(&self) -> PersonaManager {
        PersonaManager::new(Arc::clone(&self.metadata), Arc::clone(&self.vector))
    }
}
