/// Two-stage post-turn extraction.
///
/// Stage 1 (gate): a cheap, low-temperature call deciding whether the latest
/// exchange holds anything new relative to the memories already injected.
/// Stage 2 (extract): a structured call returning memories, entities and
/// relations as strict JSON — malformed or incomplete output drops the whole
/// batch, never a partial one.
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::retrieval::ScoredMemory;

/// Messages folded into the stage-2 conversation rendering.
const CONVERSATION_WINDOW: usize = 5;

const GATE_TEMPERATURE: f64 = 0.1;
const GATE_MAX_TOKENS: u32 = 100;
const EXTRACT_TEMPERATURE: f64 = 0.3;
const EXTRACT_MAX_TOKENS: u32 = 500;

/// The single LM-call shape extraction needs: one JSON-mode chat completion
/// returning the assistant text.  Implemented over the real LM clients by
/// the runtime and by counting fakes in tests.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn complete_json(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
pub struct GateDecision {
    pub should_extract: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    #[serde(default)]
    pub event_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Stage-2 output.  All three keys are required — serde fails the whole
/// parse when any is missing, which is exactly the no-partial-acceptance
/// contract.
#[derive(Debug, Deserialize)]
pub struct ExtractionResult {
    pub memories: Vec<ExtractedMemory>,
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Parse an LM-provided event time leniently: ISO 8601 with or without
/// seconds, space-separated variants, and bare dates (midnight).  The value
/// stays in the local zone it was written in — no UTC conversion.
pub fn parse_event_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = raw.parse::<NaiveDateTime>() {
        return Some(parsed);
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Some(date.and_time(NaiveTime::MIN));
    }
    None
}

/// Render the trailing user/assistant turns as plain dialogue lines for the
/// extraction prompt.  Other roles (system, tool) are skipped.
pub fn conversation_text(messages: &[Value]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        let role = message.get("role").and_then(|r| r.as_str()).unwrap_or_default();
        let content = message.get("content").and_then(|c| c.as_str()).unwrap_or_default();
        match role {
            "user" => lines.push(format!("User: {content}")),
            "assistant" => lines.push(format!("Assistant: {content}")),
            _ => {}
        }
    }
    let start = lines.len().saturating_sub(CONVERSATION_WINDOW);
    lines[start..].join("\n")
}

fn gate_prompt(user_message: &str, assistant_response: &str, injected: &[ScoredMemory]) -> String {
    let memory_summary = if injected.is_empty() {
        "(none)".to_string()
    } else {
        injected
            .iter()
            .enumerate()
            .map(|(i, memory)| {
                let time_note = memory
                    .event_time
                    .map(|t| format!(" ({})", t.format("%Y-%m-%d %H:%M")))
                    .unwrap_or_default();
                format!("{}. {}{time_note}", i + 1, memory.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Decide whether the latest exchange contains new information worth remembering.

[Existing memories]
{memory_summary}

[Latest exchange]
User: {user_message}
Assistant: {assistant_response}

[Criteria]
1. Does the exchange contain personal details (name, phone, email, address, birthday)?
2. Does it contain user preferences (likes or dislikes)?
3. Did the user explicitly ask to remember something?
4. Does it conflict with, extend or update an existing memory?
5. Does it contain key information useful in future conversations?

[Answer format]
Reply with JSON only:
{{
  "should_extract": true/false,
  "reason": "one or two short sentences"
}}"#
    )
}

pub struct ExtractionEngine {
    /// Backend for the gate call (the primary chat endpoint).
    gate: Arc<dyn ExtractionBackend>,
    /// Backend for the structured extraction call (its own endpoint, often a
    /// cheaper model).
    extractor: Arc<dyn ExtractionBackend>,
    prompt_template: String,
}

impl ExtractionEngine {
    pub fn new(
        gate: Arc<dyn ExtractionBackend>,
        extractor: Arc<dyn ExtractionBackend>,
        prompt_template: String,
    ) -> Self {
        Self {
            gate,
            extractor,
            prompt_template,
        }
    }

    /// Stage 1.  Failures (including unparseable output) answer `true` —
    /// running an unnecessary extraction is cheaper than losing a memory.
    pub async fn should_extract(
        &self,
        user_message: &str,
        assistant_response: &str,
        injected: &[ScoredMemory],
    ) -> bool {
        let prompt = gate_prompt(user_message, assistant_response, injected);
        let raw = match self
            .gate
            .complete_json(None, &prompt, GATE_TEMPERATURE, GATE_MAX_TOKENS)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                error!(%err, "extraction gate call failed, extracting anyway");
                return true;
            }
        };

        match serde_json::from_str::<GateDecision>(&raw) {
            Ok(decision) => {
                info!(
                    should_extract = decision.should_extract,
                    reason = %decision.reason,
                    "extraction gate decided"
                );
                decision.should_extract
            }
            Err(err) => {
                warn!(%err, "gate returned unparseable JSON, extracting anyway");
                true
            }
        }
    }

    /// Stage 2.  Returns the parsed batch or an error when the LM output is
    /// malformed or missing a required key — partial acceptance is not
    /// supported.
    pub async fn extract(&self, messages: &[Value]) -> Result<ExtractionResult> {
        let now = Local::now();
        let prompt = self
            .prompt_template
            .replace("{current_time}", &now.format("%Y-%m-%d %H:%M:%S").to_string())
            .replace("{current_date}", &now.format("%Y-%m-%d").to_string())
            .replace("{conversation_text}", &conversation_text(messages));

        let raw = self
            .extractor
            .complete_json(
                Some("You are a helpful assistant designed to output JSON."),
                &prompt,
                EXTRACT_TEMPERATURE,
                EXTRACT_MAX_TOKENS,
            )
            .await?;

        serde_json::from_str::<ExtractionResult>(&raw).with_context(|| {
            let preview: String = raw.chars().take(500).collect();
            format!("extraction output rejected: {preview}")
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use serde_json::json;

    use super::*;

    struct ScriptedBackend {
        responses: Mutex<Vec<Result<String, String>>>,
        pub calls: AtomicUsize,
        pub last_user: Mutex<String>,
    }

    impl ScriptedBackend {
        fn returning(raw: &str) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Ok(raw.to_string())]),
                calls: AtomicUsize::new(0),
                last_user: Mutex::new(String::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(vec![Err("backend down".to_string())]),
                calls: AtomicUsize::new(0),
                last_user: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl ExtractionBackend for ScriptedBackend {
        async fn complete_json(
            &self,
            _system: Option<&str>,
            user: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user.lock().unwrap() = user.to_string();
            let mut responses = self.responses.lock().unwrap();
            match responses.pop() {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(err)) => bail!(err),
                None => Ok(String::new()),
            }
        }
    }

    fn engine(gate: Arc<ScriptedBackend>, extractor: Arc<ScriptedBackend>) -> ExtractionEngine {
        ExtractionEngine::new(gate, extractor, memgate_prompt())
    }

    fn memgate_prompt() -> String {
        "time {current_time} date {current_date}\n{conversation_text}".to_string()
    }

    #[tokio::test]
    async fn gate_honors_negative_decision() {
        let gate = ScriptedBackend::returning(r#"{"should_extract": false, "reason": "chitchat"}"#);
        let engine = engine(Arc::clone(&gate), ScriptedBackend::returning("{}"));

        assert!(!engine.should_extract("hello", "hi there", &[]).await);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gate_defaults_to_true_on_parse_failure() {
        let gate = ScriptedBackend::returning("not json at all");
        let engine = engine(gate, ScriptedBackend::returning("{}"));
        assert!(engine.should_extract("u", "a", &[]).await);
    }

    #[tokio::test]
    async fn gate_defaults_to_true_on_call_failure() {
        let engine = engine(ScriptedBackend::failing(), ScriptedBackend::returning("{}"));
        assert!(engine.should_extract("u", "a", &[]).await);
    }

    #[tokio::test]
    async fn gate_prompt_mentions_injected_memories() {
        let gate = ScriptedBackend::returning(r#"{"should_extract": true}"#);
        let engine = engine(Arc::clone(&gate), ScriptedBackend::returning("{}"));

        let injected = vec![ScoredMemory {
            memory_id: "m".to_string(),
            persona_id: "p".to_string(),
            vector_id: "v".to_string(),
            entity_id: None,
            content: "birthday is May 12".to_string(),
            created_at: 0,
            event_time: None,
            last_accessed_at: 0,
            access_count: 0,
            similarity: 1.0,
            graph_density: 0.0,
            final_score: 1.0,
        }];
        engine.should_extract("u", "a", &injected).await;

        let prompt = gate.last_user.lock().unwrap().clone();
        assert!(prompt.contains("birthday is May 12"));
    }

    #[tokio::test]
    async fn extract_parses_full_result() {
        let raw = json!({
            "memories": [{"content": "went to Kyoto", "event_time": "2025-03-08T10:00:00"}],
            "entities": [{"name": "Kyoto", "type": "place"}],
            "relations": [{"from": "User", "to": "Kyoto", "type": "visited"}],
        })
        .to_string();
        let engine = engine(ScriptedBackend::returning("{}"), ScriptedBackend::returning(&raw));

        let result = engine.extract(&[json!({"role": "user", "content": "hi"})]).await.unwrap();
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.entities[0].name, "Kyoto");
        assert_eq!(result.relations[0].kind, "visited");
    }

    #[tokio::test]
    async fn extract_rejects_missing_top_level_key() {
        let raw = json!({"memories": [], "entities": []}).to_string();
        let engine = engine(ScriptedBackend::returning("{}"), ScriptedBackend::returning(&raw));
        assert!(engine.extract(&[]).await.is_err());
    }

    #[tokio::test]
    async fn extract_rejects_non_json() {
        let engine = engine(
            ScriptedBackend::returning("{}"),
            ScriptedBackend::returning("I could not find anything."),
        );
        assert!(engine.extract(&[]).await.is_err());
    }

    #[tokio::test]
    async fn extract_substitutes_conversation_into_template() {
        let raw = json!({"memories": [], "entities": [], "relations": []}).to_string();
        let extractor = ScriptedBackend::returning(&raw);
        let engine = engine(ScriptedBackend::returning("{}"), Arc::clone(&extractor));

        let messages = vec![
            json!({"role": "user", "content": "my birthday is May 12"}),
            json!({"role": "assistant", "content": "Got it."}),
        ];
        engine.extract(&messages).await.unwrap();

        let prompt = extractor.last_user.lock().unwrap().clone();
        assert!(prompt.contains("User: my birthday is May 12"));
        assert!(prompt.contains("Assistant: Got it."));
        assert!(!prompt.contains("{current_time}"));
        assert!(!prompt.contains("{current_date}"));
    }

    #[test]
    fn conversation_text_keeps_last_five_dialogue_turns() {
        let mut messages = vec![json!({"role": "system", "content": "sys"})];
        for i in 0..7 {
            messages.push(json!({"role": "user", "content": format!("u{i}")}));
        }
        let text = conversation_text(&messages);
        assert!(!text.contains("u0"));
        assert!(!text.contains("u1"));
        assert!(text.contains("u2"));
        assert!(text.contains("u6"));
        assert!(!text.contains("sys"));
    }

    #[test]
    fn event_time_parsing_is_lenient() {
        assert_eq!(
            parse_event_time("2025-03-08T10:30:00"),
            Some("2025-03-08T10:30:00".parse().unwrap())
        );
        assert_eq!(
            parse_event_time("2025-03-08T10:30"),
            Some("2025-03-08T10:30:00".parse().unwrap())
        );
        assert_eq!(
            parse_event_time("2025-03-08 10:30:00"),
            Some("2025-03-08T10:30:00".parse().unwrap())
        );
        assert_eq!(
            parse_event_time("2025-03-08"),
            Some("2025-03-08T00:00:00".parse().unwrap())
        );
        assert_eq!(parse_event_time("last weekend"), None);
        assert_eq!(parse_event_time(""), None);
    }
}
