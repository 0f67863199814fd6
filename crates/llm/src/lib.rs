use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

mod cache;

pub use cache::TtlCache;

// ── Chat message types ────────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message used when *this* process is the caller of an LM (gate and
/// extraction prompts).  Proxied client messages stay as raw JSON so
/// provider-specific fields pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// What a finished stream amounted to: the concatenated assistant text and
/// the last `finish_reason` the provider sent.
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub content: String,
    pub finish_reason: Option<String>,
}

impl StreamSummary {
    /// Fold one decoded chunk into the running summary.
    pub fn apply_chunk(&mut self, chunk: &Value) {
        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return;
        };
        if let Some(content) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|v| v.as_str())
        {
            self.content.push_str(content);
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(reason.to_string());
        }
    }

    /// The turn is semantically complete only on a plain stop.
    pub fn finished_cleanly(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop")
    }
}

// ── SSE decoding ──────────────────────────────────────────────────────────────

/// Outcome of decoding one SSE line from the upstream stream.
#[derive(Debug)]
pub enum SseLine {
    /// `data: [DONE]` — the stream is over.
    Done,
    /// A decoded JSON chunk.
    Chunk(Value),
    /// Blank line, comment, or malformed JSON (provider bug tolerance).
    Skip,
}

/// Decode a single line of an OpenAI-style SSE body.
pub fn decode_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(value) => SseLine::Chunk(value),
        Err(err) => {
            warn!(%err, "skipping malformed SSE chunk");
            SseLine::Skip
        }
    }
}

/// Accumulates raw network chunks and yields only complete lines.  SSE lines
/// routinely straddle TCP chunk boundaries, so per-chunk `lines()` splitting
/// would tear JSON in half.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: String,
}

impl SseLineBuffer {
    pub fn push(&mut self, data: &str) -> Vec<String> {
        self.buf.push_str(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream ends (a final line without newline).
    pub fn finish(self) -> Option<String> {
        let rest = self.buf.trim();
        if rest.is_empty() { None } else { Some(rest.to_string()) }
    }
}

// ── LM client ─────────────────────────────────────────────────────────────────

/// Client for one OpenAI-style endpoint.  Instantiated three times with
/// independent configs: primary chat, extraction chat, embedding.
#[derive(Debug, Clone)]
pub struct LmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.base_url));
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        builder
    }

    fn fill_model(&self, payload: &mut Value) {
        let missing = payload.get("model").and_then(|m| m.as_str()).is_none_or(str::is_empty);
        if missing {
            payload["model"] = json!(self.model);
        }
    }

    /// Unary chat completion.  Returns the provider's raw JSON body.
    pub async fn chat(&self, mut payload: Value) -> Result<Value> {
        self.fill_model(&mut payload);
        payload["stream"] = json!(false);

        let response = self.post("/chat/completions").json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("chat completion failed ({status}): {body}");
        }
        let body: Value = response.json().await?;
        debug!("chat completion ok");
        Ok(body)
    }

    /// Streaming chat completion.  Every decoded chunk is forwarded to `tx`
    /// in arrival order; the call resolves to the accumulated summary once
    /// the provider sends `[DONE]` or closes the stream.
    pub async fn chat_stream(
        &self,
        mut payload: Value,
        tx: mpsc::Sender<Value>,
    ) -> Result<StreamSummary> {
        self.fill_model(&mut payload);
        payload["stream"] = json!(true);

        let mut response = self.post("/chat/completions").json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("streaming chat completion failed ({status}): {body}");
        }

        let mut summary = StreamSummary::default();
        let mut buffer = SseLineBuffer::default();
        let mut done = false;
        while !done {
            let Some(chunk) = response.chunk().await? else {
                break;
            };
            for line in buffer.push(&String::from_utf8_lossy(&chunk)) {
                match decode_sse_line(&line) {
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Chunk(value) => {
                        summary.apply_chunk(&value);
                        // Receiver may be gone (client disconnected); keep
                        // draining so the summary stays complete for the
                        // post-turn extraction decision.
                        let _ = tx.send(value).await;
                    }
                    SseLine::Skip => {}
                }
            }
        }
        // Some providers close the stream without a trailing newline.
        if !done {
            if let Some(rest) = buffer.finish() {
                if let SseLine::Chunk(value) = decode_sse_line(&rest) {
                    summary.apply_chunk(&value);
                    let _ = tx.send(value).await;
                }
            }
        }

        debug!(finish_reason = ?summary.finish_reason, "stream complete");
        Ok(summary)
    }

    /// Unary call that asks the provider for a JSON object and returns the
    /// assistant text verbatim.  Used by the extraction gate and the
    /// structured extraction call.
    pub async fn complete_json(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
            "response_format": {"type": "json_object"},
        });

        let response = self.post("/chat/completions").json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("json completion failed ({status}): {body}");
        }
        let body: Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str());
        match content {
            Some(text) => Ok(text.to_string()),
            None => bail!("json completion response carried no content"),
        }
    }

    /// Text-completion passthrough (`POST /completions`).
    pub async fn completion(&self, mut payload: Value) -> Result<Value> {
        self.fill_model(&mut payload);

        let response = self.post("/completions").json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("completion failed ({status}): {body}");
        }
        Ok(response.json().await?)
    }

    /// Upstream model catalog (`GET /models`).
    pub async fn list_models(&self) -> Result<Vec<Value>> {
        let mut builder = self.client.get(format!("{}/models", self.base_url));
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("model listing failed ({status})");
        }
        let body: Value = response.json().await?;
        let models = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(models)
    }
}

// ── Embedding client ──────────────────────────────────────────────────────────

/// Client for an OpenAI-style `/embeddings` endpoint with a content-hash TTL
/// cache in front of it.
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    cache: TtlCache,
}

impl EmbeddingClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        dimensions: usize,
        timeout_secs: u64,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
            cache: TtlCache::new(cache_ttl),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = TtlCache::content_key(text);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let embeddings = self.request_embeddings(json!(text)).await?;
        let Some(embedding) = embeddings.into_iter().next() else {
            bail!("embedding response carried no vectors");
        };
        self.cache.set(key, embedding.clone());
        Ok(embedding)
    }

    /// Batch variant: cached items are served locally, the rest go upstream
    /// in one call, and the output preserves input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<(usize, &String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = TtlCache::content_key(text);
            match self.cache.get(&key) {
                Some(hit) => results[i] = Some(hit),
                None => missing.push((i, text)),
            }
        }

        if !missing.is_empty() {
            let inputs: Vec<&String> = missing.iter().map(|(_, t)| *t).collect();
            let embeddings = self.request_embeddings(json!(inputs)).await?;
            if embeddings.len() != missing.len() {
                bail!(
                    "embedding response count mismatch: asked {}, got {}",
                    missing.len(),
                    embeddings.len()
                );
            }
            for ((i, text), embedding) in missing.into_iter().zip(embeddings) {
                self.cache.set(TtlCache::content_key(text), embedding.clone());
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn request_embeddings(&self, input: Value) -> Result<Vec<Vec<f32>>> {
        let payload = json!({ "input": input, "model": self.model });
        let mut builder = self.client.post(format!("{}/embeddings", self.base_url));
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding request failed ({status}): {body}");
        }

        let body: Value = response.json().await?;
        let Some(items) = body.get("data").and_then(|d| d.as_array()) else {
            bail!("embedding response missing data array");
        };
        let mut embeddings = Vec::with_capacity(items.len());
        for item in items {
            let vector: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();
            if vector.is_empty() {
                bail!("embedding response carried an empty vector");
            }
            embeddings.push(vector);
        }
        Ok(embeddings)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(content: &str) -> Value {
        json!({"choices": [{"delta": {"content": content}}]})
    }

    #[test]
    fn summary_concatenates_delta_content_in_order() {
        let mut summary = StreamSummary::default();
        for piece in ["Hel", "lo ", "world"] {
            summary.apply_chunk(&delta_chunk(piece));
        }
        assert_eq!(summary.content, "Hello world");
        assert!(summary.finish_reason.is_none());
    }

    #[test]
    fn summary_records_last_finish_reason() {
        let mut summary = StreamSummary::default();
        summary.apply_chunk(&delta_chunk("hi"));
        summary.apply_chunk(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));
        assert!(summary.finished_cleanly());
    }

    #[test]
    fn tool_call_finish_is_not_clean() {
        let mut summary = StreamSummary::default();
        summary.apply_chunk(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}));
        assert!(!summary.finished_cleanly());
    }

    #[test]
    fn chunks_without_choices_are_ignored() {
        let mut summary = StreamSummary::default();
        summary.apply_chunk(&json!({"object": "ping"}));
        assert!(summary.content.is_empty());
    }

    #[test]
    fn decode_recognizes_done_sentinel() {
        assert!(matches!(decode_sse_line("data: [DONE]"), SseLine::Done));
    }

    #[test]
    fn decode_skips_malformed_json() {
        assert!(matches!(decode_sse_line("data: {not json"), SseLine::Skip));
        assert!(matches!(decode_sse_line(""), SseLine::Skip));
        assert!(matches!(decode_sse_line(": keep-alive comment"), SseLine::Skip));
    }

    #[test]
    fn decode_parses_chunk_payload() {
        let SseLine::Chunk(value) = decode_sse_line(r#"data: {"choices":[]}"#) else {
            panic!("expected chunk");
        };
        assert!(value.get("choices").is_some());
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push("data: {\"a\":").is_empty());
        let lines = buffer.push("1}\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string()]);
        let lines = buffer.push("NE]\n");
        assert_eq!(lines, vec!["data: [DONE]".to_string()]);
    }

    #[test]
    fn line_buffer_handles_crlf() {
        let mut buffer = SseLineBuffer::default();
        let lines = buffer.push("data: {}\r\n\r\n");
        assert_eq!(lines, vec!["data: {}".to_string(), String::new()]);
    }

    #[test]
    fn chat_message_serializes_with_lowercase_role() {
        let rendered = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(rendered, json!({"role": "user", "content": "hi"}));
    }
}
