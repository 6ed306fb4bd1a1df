use super::cohere_types::BackendChatResponse;
use super::openai_types::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, COMPLETION_ID,
};
use crate::error::{ProxyError, Result};

/// Decode a non-streaming backend body.
///
/// The body must be a JSON object whose `text`, when present, is a string.
/// A missing `text` is accepted and later rendered as `null` content.
pub fn parse_backend_response(body: &[u8]) -> Result<BackendChatResponse> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProxyError::decode(format!("Backend body is not valid JSON: {e}")))?;

    if !value.is_object() {
        return Err(ProxyError::decode(format!(
            "Backend body is not a JSON object: {}",
            truncate(&value.to_string(), 200)
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| ProxyError::decode(format!("Unexpected backend body shape: {e}")))
}

/// Translate a Cohere chat reply into an OpenAI chat completion.
/// Pure apart from the clock: `created` is the translation time.
pub fn to_openai_response(resp: &BackendChatResponse, model: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: COMPLETION_ID.to_string(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: resp.text.clone(),
            },
            logprobs: None,
            finish_reason: "stop".to_string(),
        }],
        // Cohere's token accounting is not surfaced.
        usage: ChatUsage::default(),
        system_fingerprint: None,
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_becomes_assistant_content() {
        let resp = parse_backend_response(br#"{"text":"hello"}"#).unwrap();
        let out = to_openai_response(&resp, "m");

        assert_eq!(out.id, COMPLETION_ID);
        assert_eq!(out.object, "chat.completion");
        assert_eq!(out.model, "m");
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].message.role, "assistant");
        assert_eq!(out.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(out.choices[0].finish_reason, "stop");
        assert_eq!(out.usage, ChatUsage::default());
    }

    #[test]
    fn test_wire_shape() {
        let resp = parse_backend_response(br#"{"text":"hi","generation_id":"g"}"#).unwrap();
        let json = serde_json::to_value(to_openai_response(&resp, "command-r")).unwrap();

        assert!(json["system_fingerprint"].is_null());
        assert!(json["choices"][0]["logprobs"].is_null());
        assert_eq!(json["usage"]["prompt_tokens"], 0);
        assert_eq!(json["usage"]["completion_tokens"], 0);
        assert_eq!(json["usage"]["total_tokens"], 0);
        assert!(json["created"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_missing_text_renders_null_content() {
        let resp = parse_backend_response(br#"{"generation_id":"g"}"#).unwrap();
        let out = to_openai_response(&resp, "m");
        assert!(out.choices[0].message.content.is_none());

        let json = serde_json::to_value(&out).unwrap();
        assert!(json["choices"][0]["message"]["content"].is_null());
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let err = parse_backend_response(b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ProxyError::Decode { .. }));
    }

    #[test]
    fn test_non_object_is_decode_error() {
        let bodies: [&[u8]; 4] = [b"\"just text\"", b"[\"a\"]", b"42", b"null"];
        for body in bodies {
            let err = parse_backend_response(body).unwrap_err();
            assert!(matches!(err, ProxyError::Decode { .. }));
        }
    }

    #[test]
    fn test_non_string_text_is_decode_error() {
        let err = parse_backend_response(br#"{"text":7}"#).unwrap_err();
        assert!(matches!(err, ProxyError::Decode { .. }));
    }
}
