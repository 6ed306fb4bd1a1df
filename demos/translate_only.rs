//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use cohere_proxy::translate::cohere_types::{BackendChatResponse, BackendStreamEvent};
use cohere_proxy::translate::openai_types::{ChatMessage, ChatRequest};
use cohere_proxy::translate::request::{to_backend_request, DEFAULT_GREETING};
use cohere_proxy::translate::response::to_openai_response;
use cohere_proxy::translate::streaming::{encode_frame, StreamTranscoder, DONE_FRAME};

fn main() {
    // An OpenAI chat request (what clients send)
    let openai_req = ChatRequest {
        model: "net-command-r".to_string(),
        stream: true,
        messages: vec![
            ChatMessage::new("system", "You are a geography expert. Be concise."),
            ChatMessage::new("user", "What is the capital of France?"),
            ChatMessage::new("assistant", "The capital of France is Paris."),
            ChatMessage::new("user", "And Germany?"),
        ],
    };

    println!("=== Cohere request ===");
    let backend_req = to_backend_request(&openai_req, DEFAULT_GREETING);
    println!(
        "{}",
        serde_json::to_string_pretty(&backend_req).unwrap_or_default()
    );

    println!("\n=== Non-streaming reply ===");
    let reply = BackendChatResponse {
        text: Some("The capital of Germany is Berlin.".to_string()),
    };
    let completion = to_openai_response(&reply, &openai_req.model);
    println!(
        "{}",
        serde_json::to_string_pretty(&completion).unwrap_or_default()
    );

    println!("\n=== Streaming reply ===");
    let events = [
        BackendStreamEvent::StreamStart {
            generation_id: Some("demo".to_string()),
        },
        BackendStreamEvent::TextGeneration {
            text: "Berlin".to_string(),
        },
        BackendStreamEvent::TextGeneration {
            text: ".".to_string(),
        },
        BackendStreamEvent::StreamEnd {
            finish_reason: Some("COMPLETE".to_string()),
        },
    ];

    let mut transcoder = StreamTranscoder::new(&openai_req.model);
    for event in &events {
        if let Some(chunk) = transcoder.process_event(event) {
            if let Ok(frame) = encode_frame(&chunk) {
                print!("{}", String::from_utf8_lossy(&frame));
            }
        }
    }
    print!("{}", String::from_utf8_lossy(DONE_FRAME));
}
