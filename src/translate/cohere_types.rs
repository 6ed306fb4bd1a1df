//! Wire types for the Cohere `/chat` endpoint.
//!
//! Only the fields the proxy actually reads or writes are modelled; anything
//! else the backend returns is ignored during deserialization.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request types (what we send TO the backend)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendChatRequest {
    /// The current turn.
    pub message: String,
    pub chat_history: Vec<ChatHistoryEntry>,
    pub stream: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<Connector>,
}

/// A prior turn. `role` is `USER`, `CHATBOT` or `SYSTEM` for well-formed
/// input; unknown roles are forwarded uppercased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Response types (what the backend sends back)
// ---------------------------------------------------------------------------

/// Non-streaming reply. `text` is the only field consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendChatResponse {
    #[serde(default)]
    pub text: Option<String>,
}

/// One line of the backend's newline-delimited event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "kebab-case")]
pub enum BackendStreamEvent {
    StreamStart {
        #[serde(default)]
        generation_id: Option<String>,
    },
    TextGeneration {
        text: String,
    },
    StreamEnd {
        #[serde(default)]
        finish_reason: Option<String>,
    },
    // search-queries-generation, search-results, citation-generation, ...
    #[serde(other)]
    Other,
}
