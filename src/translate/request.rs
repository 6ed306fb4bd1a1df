//! Translate OpenAI chat requests into Cohere chat requests.
//!
//! The last message becomes the current turn; everything before it becomes
//! `chat_history` with roles uppercased and `assistant` renamed to `CHATBOT`.

use super::cohere_types::{BackendChatRequest, ChatHistoryEntry, Connector};
use super::openai_types::{ChatMessage, ChatRequest};

/// Seed used when a request has no messages and no `q` query parameter.
pub const DEFAULT_GREETING: &str = "hello";

/// Model-name prefix that turns on web-search augmentation.
const WEB_SEARCH_MODEL_PREFIX: &str = "net-";

/// Connector id activated for [`WEB_SEARCH_MODEL_PREFIX`] models.
pub const WEB_SEARCH_CONNECTOR: &str = "web-search";

/// Translate an OpenAI chat request into a Cohere chat request.
/// Pure function: `fallback` is the text of the synthetic user turn used
/// when `req.messages` is empty.
pub fn to_backend_request(req: &ChatRequest, fallback: &str) -> BackendChatRequest {
    let synthetic;
    let messages: &[ChatMessage] = if req.messages.is_empty() {
        synthetic = [ChatMessage::new("user", fallback)];
        &synthetic
    } else {
        &req.messages
    };

    let (current, history) = match messages.split_last() {
        Some((last, rest)) => (last.text(), rest),
        None => (String::new(), messages),
    };

    let chat_history = history
        .iter()
        .map(|msg| ChatHistoryEntry {
            role: backend_role(&msg.role),
            message: msg.text(),
        })
        .collect();

    let connectors = if uses_web_search(&req.model) {
        vec![Connector {
            id: WEB_SEARCH_CONNECTOR.to_string(),
        }]
    } else {
        Vec::new()
    };

    BackendChatRequest {
        message: current,
        chat_history,
        stream: req.stream,
        model: req.model.clone(),
        connectors,
    }
}

/// Pick the fallback seed: a non-empty `q` wins over the configured greeting.
pub fn fallback_seed<'a>(query: Option<&'a str>, greeting: &'a str) -> &'a str {
    query.filter(|q| !q.is_empty()).unwrap_or(greeting)
}

/// Whether the model name asks for the web-search connector.
#[must_use]
pub fn uses_web_search(model: &str) -> bool {
    model.starts_with(WEB_SEARCH_MODEL_PREFIX)
}

/// Map an OpenAI role onto a Cohere role token.
fn backend_role(role: &str) -> String {
    let upper = role.to_uppercase();
    if upper == "ASSISTANT" {
        "CHATBOT".to_string()
    } else {
        upper
    }
}
