/// Memory-management tool definitions in the OpenAI `tools` shape, so
/// callers can hand them to an LM and let it manage memories itself.  The
/// MCP surface exposes the same four tools.
use axum::Json;
use serde_json::{Value, json};

pub fn memory_tools() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "save_memory",
                "description": "Remember an important fact, preference or piece of background the user mentioned, for use in future conversations.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The information to remember, e.g. 'The user prefers black tea' or 'The user's birthday is May 12'."
                        },
                        "entity_id": {
                            "type": "string",
                            "description": "Optional. Name of the entity (person, place, thing) this memory is about."
                        },
                        "importance": {
                            "type": "integer",
                            "description": "Optional. Importance from 1 to 10, default 5.",
                            "minimum": 1,
                            "maximum": 10
                        }
                    },
                    "required": ["content"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "update_memory",
                "description": "Correct or refresh a previously saved memory when the user changes their mind or gives more accurate information.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "memory_id": {
                            "type": "string",
                            "description": "Id of the memory to update, taken from earlier context or search results."
                        },
                        "new_content": {
                            "type": "string",
                            "description": "The corrected, complete content."
                        }
                    },
                    "required": ["memory_id", "new_content"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "delete_memory",
                "description": "Forget a memory that is stale, wrong, or that the user explicitly asked to forget.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "memory_id": {
                            "type": "string",
                            "description": "Id of the memory to delete."
                        },
                        "reason": {
                            "type": "string",
                            "description": "Optional. Why this memory is being deleted."
                        }
                    },
                    "required": ["memory_id"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "search_memories",
                "description": "Actively search stored memories when a fact needs verifying.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Keywords or a semantic query."
                        }
                    },
                    "required": ["query"]
                }
            }
        }
    ])
}

pub async fn list_memory_tools() -> Json<Value> {
    Json(json!({ "tools": memory_tools() }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
