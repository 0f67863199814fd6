/// Folding retrieved memories into a chat message list.
///
/// Messages are handled as raw JSON values so provider-specific fields
/// (tool calls, names, audio parts) pass through the proxy untouched: the
/// only turns this module creates or edits are leading system turns.
use serde_json::{Value, json};
use tracing::debug;

use crate::retrieval::ScoredMemory;

/// Base system text used when a memory block must be injected into a
/// conversation that has no system turn of its own.
const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMode {
    /// Render all memories as one XML block inside the leading system turn.
    System,
    /// Emit each memory as its own leading system turn, in rank order.
    Messages,
    /// Legacy alias of [`InjectionMode::System`].
    Mixed,
}

impl InjectionMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "messages" => Self::Messages,
            "mixed" => Self::Mixed,
            _ => Self::System,
        }
    }
}

/// Escape `& < > " '` so user-written content cannot break out of the
/// XML-rendered memory block.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render the ranked memories as the XML block downstream models parse.
/// Empty input renders to an empty string.
pub fn render_memory_block(memories: &[ScoredMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut parts = vec!["<memory_context>".to_string(), "  <related_knowledge>".to_string()];
    for (index, memory) in memories.iter().enumerate() {
        parts.push(format!("    <memory index=\"{}\">", index + 1));
        parts.push(format!("      <content>{}</content>", escape_xml(&memory.content)));
        if let Some(event_time) = memory.event_time {
            parts.push(format!(
                "      <event_time>{}</event_time>",
                event_time.format("%Y-%m-%d %H:%M")
            ));
        }
        parts.push("    </memory>".to_string());
    }
    parts.push("  </related_knowledge>".to_string());
    parts.push("</memory_context>".to_string());
    parts.join("\n")
}

fn with_memory_context(base: &str, block: &str) -> String {
    format!(
        "{base}\n\nHere is relevant background information:\n\n{block}\n\nAnswer the user's question based on the information above."
    )
}

fn find_system_index(messages: &[Value]) -> Option<usize> {
    messages
        .iter()
        .position(|msg| msg.get("role").and_then(|r| r.as_str()) == Some("system"))
}

/// Fold `memories` into `messages` according to `mode`.  All original turns
/// are preserved verbatim; only a leading system turn is augmented or
/// created.
pub fn inject_memories(
    mut messages: Vec<Value>,
    memories: &[ScoredMemory],
    mode: InjectionMode,
) -> Vec<Value> {
    if memories.is_empty() {
        return messages;
    }

    match mode {
        InjectionMode::Messages => {
            let mut injected: Vec<Value> = memories
                .iter()
                .map(|memory| {
                    json!({
                        "role": "system",
                        "content": format!("[memory] {}", memory.content),
                    })
                })
                .collect();
            injected.append(&mut messages);
            injected
        }
        InjectionMode::System | InjectionMode::Mixed => {
            let block = render_memory_block(memories);
            match find_system_index(&messages) {
                Some(index) => {
                    let existing = messages[index]
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or_default()
                        .to_string();
                    messages[index]["content"] = json!(with_memory_context(&existing, &block));
                    debug!(memories = memories.len(), "augmented existing system turn");
                }
                None => {
                    messages.insert(
                        0,
                        json!({
                            "role": "system",
                            "content": with_memory_context(FALLBACK_SYSTEM_PROMPT, &block),
                        }),
                    );
                    debug!(memories = memories.len(), "created system turn for memories");
                }
            }
            messages
        }
    }
}

/// Concatenate the persona's own system prompt onto the leading system turn
/// (creating one when absent).  Downstream callers may supply their own
/// system turn — it is preserved and augmented, never replaced.
pub fn append_persona_prompt(mut messages: Vec<Value>, system_prompt: &str) -> Vec<Value> {
    if system_prompt.is_empty() {
        return messages;
    }

    match find_system_index(&messages) {
        Some(index) => {
            let existing = messages[index]
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            messages[index]["content"] = json!(format!("{existing}\n\n{system_prompt}"));
        }
        None => {
            messages.insert(0, json!({"role": "system", "content": system_prompt}));
        }
    }
    messages
}

// ── Tests ─────────────────────────────────────────────────────────────────────
