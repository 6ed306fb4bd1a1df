use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::RequestLogger;
use crate::translate::cohere_types::BackendChatRequest;
use crate::translate::openai_types::ChatCompletionResponse;
use crate::translate::response::{parse_backend_response, to_openai_response, truncate};
use crate::translate::streaming::{
    encode_frame, parse_event_line, LineSplitter, StreamTranscoder, DONE_FRAME,
};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::pin::Pin;

/// Outbound SSE body: one `data: ...` frame per item.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Infallible>> + Send>>;

/// Media type of the backend's newline-delimited event stream.
pub const STREAM_CONTENT_TYPE: &str = "application/stream+json";

/// Send one chat request to the backend and return the response once its
/// headers arrived with a 2xx status.
async fn send_chat(
    data: &BackendChatRequest,
    authorization: Option<&str>,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<reqwest::Response> {
    let url = config.chat_url();

    logger.info(
        "proxy",
        format!(
            "POST {} model={} stream={} history={} connectors={}",
            url,
            data.model,
            data.stream,
            data.chat_history.len(),
            data.connectors.len()
        ),
    );

    let accept = if data.stream {
        STREAM_CONTENT_TYPE
    } else {
        "application/json"
    };

    let mut req = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Accept", accept)
        .json(data);

    if let Some(auth) = authorization {
        req = req.header("Authorization", auth);
    } else if let Some(key) = config.resolve_api_key() {
        req = req.header("Authorization", format!("Bearer {}", key));
    }

    let response = req
        .send()
        .await
        .map_err(|e| ProxyError::backend(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        logger.warn(
            "proxy",
            format!("Backend returned status={}: {}", status, truncate(&body, 300)),
        );
        return Err(ProxyError::backend(format!(
            "Backend returned status {}: {}",
            status.as_u16(),
            truncate(&body, 500)
        )));
    }

    Ok(response)
}

/// Forward a non-streaming request and translate the JSON reply.
pub async fn proxy_non_streaming(
    data: &BackendChatRequest,
    authorization: Option<&str>,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<ChatCompletionResponse> {
    let response = send_chat(data, authorization, config, client, logger).await?;

    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::backend(format!("Failed to read response body: {}", e)))?;

    logger.debug("proxy", format!("Response body_len={}", body.len()));

    let parsed = parse_backend_response(&body)?;
    if parsed.text.is_none() {
        logger.warn("proxy", "Backend response has no text field");
    }

    Ok(to_openai_response(&parsed, &data.model))
}

/// Forward a streaming request, returning the outbound SSE frame stream.
///
/// Errors here happen before anything was sent to the client; once the
/// stream is returned, failures only end it early.
pub async fn proxy_streaming(
    data: &BackendChatRequest,
    authorization: Option<&str>,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<FrameStream> {
    let response = send_chat(data, authorization, config, client, logger).await?;
    let byte_stream = response.bytes_stream();

    Ok(Box::pin(transcode_stream(
        byte_stream,
        data.model.clone(),
        logger.clone(),
    )))
}

/// Relay a Cohere event stream as OpenAI SSE frames.
///
/// Pull-based: the next backend read only happens after the previous frame was
/// taken by the consumer. Dropping the returned stream drops `byte_stream`.
pub fn transcode_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    model: String,
    logger: RequestLogger,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static
where
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut transcoder = StreamTranscoder::new(&model);
        let mut splitter = LineSplitter::new();
        let mut frames: usize = 0;
        let mut skipped: usize = 0;

        tokio::pin!(byte_stream);

        'read: loop {
            let (lines, eof) = match byte_stream.next().await {
                Some(Ok(chunk)) => (splitter.push(&chunk), false),
                Some(Err(e)) => {
                    logger.error("stream", format!("Backend stream error: {}", e));
                    break 'read;
                }
                None => (splitter.remainder().into_iter().collect(), true),
            };

            for line in lines {
                let event = match parse_event_line(&line) {
                    None => continue,
                    Some(Ok(ev)) => ev,
                    Some(Err(e)) => {
                        skipped += 1;
                        logger.warn("stream", format!("Skipping malformed event: {}", e));
                        continue;
                    }
                };

                if let Some(chunk) = transcoder.process_event(&event) {
                    match encode_frame(&chunk) {
                        Ok(frame) => {
                            frames += 1;
                            yield Ok(frame);
                        }
                        Err(e) => logger.error("stream", format!("Failed to encode chunk: {}", e)),
                    }
                }

                if transcoder.is_finished() {
                    break 'read;
                }
            }

            if eof {
                break 'read;
            }
        }

        if !transcoder.is_finished() {
            logger.warn("stream", "Backend stream ended without stream-end");
        }

        // Close out deterministically even if stream-end never arrived
        if let Some(chunk) = transcoder.finish() {
            if let Ok(frame) = encode_frame(&chunk) {
                frames += 1;
                yield Ok(frame);
            }
        }
        yield Ok(Bytes::from_static(DONE_FRAME));

        logger.info(
            "stream",
            format!("Stream completed frames={} skipped={}", frames, skipped),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLogger;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const START: &str = r#"{"is_finished":false,"event_type":"stream-start","generation_id":"g"}"#;
    const END: &str = r#"{"is_finished":true,"event_type":"stream-end","finish_reason":"COMPLETE"}"#;

    fn text_event(t: &str) -> String {
        format!(r#"{{"is_finished":false,"event_type":"text-generation","text":"{t}"}}"#)
    }

    fn line(s: &str) -> std::io::Result<Bytes> {
        Ok(Bytes::from(format!("{s}\n")))
    }

    fn raw(s: &str) -> std::io::Result<Bytes> {
        Ok(Bytes::from(s.to_string()))
    }

    fn request_logger(dir: &tempfile::TempDir) -> RequestLogger {
        SharedLogger::new(dir.path().join("proxy.log"))
            .unwrap()
            .for_request("test")
    }

    fn run(reads: Vec<std::io::Result<Bytes>>) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        let frames = transcode_stream(
            stream::iter(reads),
            "command-r".to_string(),
            request_logger(&dir),
        );

        tokio_test::block_on(frames.collect::<Vec<_>>())
            .into_iter()
            .map(|f| String::from_utf8(f.unwrap().to_vec()).unwrap())
            .collect()
    }

    fn payload(frame: &str) -> serde_json::Value {
        let json = frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    fn content(frame: &str) -> serde_json::Value {
        payload(frame)["choices"][0]["delta"]["content"].clone()
    }

    fn finish_reason(frame: &str) -> serde_json::Value {
        payload(frame)["choices"][0]["finish_reason"].clone()
    }

    #[test]
    fn test_deltas_in_order_then_stop_then_done() {
        let frames = run(vec![
            line(START),
            line(&text_event("Hel")),
            line(&text_event("lo")),
            line(&text_event(" world")),
            line(END),
        ]);

        assert_eq!(frames.len(), 5);
        assert_eq!(content(&frames[0]), "Hel");
        assert_eq!(content(&frames[1]), "lo");
        assert_eq!(content(&frames[2]), " world");
        for f in &frames[..3] {
            assert!(finish_reason(f).is_null());
            assert_eq!(payload(f)["object"], "chat.completion.chunk");
            assert_eq!(payload(f)["model"], "command-r");
        }

        assert_eq!(finish_reason(&frames[3]), "stop");
        assert_eq!(payload(&frames[3])["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(frames[4], "data: [DONE]\n\n");
    }

    #[test]
    fn test_events_split_across_reads() {
        let all = format!("{}\n{}\n{}\n", text_event("a"), text_event("b"), END);
        let (first, rest) = all.split_at(10);
        let (second, third) = rest.split_at(50);
        let frames = run(vec![raw(first), raw(second), raw(third)]);

        assert_eq!(frames.len(), 4);
        assert_eq!(content(&frames[0]), "a");
        assert_eq!(content(&frames[1]), "b");
        assert_eq!(finish_reason(&frames[2]), "stop");
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let frames = run(vec![
            line(&text_event("one")),
            line(r#"{"event_type":"text-generation","text":"#),
            line(r#"{"event_type":"text-generation"}"#),
            line(&text_event("two")),
            line(END),
        ]);

        assert_eq!(frames.len(), 4);
        assert_eq!(content(&frames[0]), "one");
        assert_eq!(content(&frames[1]), "two");
        assert_eq!(finish_reason(&frames[2]), "stop");
    }

    #[test]
    fn test_non_content_events_are_not_forwarded() {
        let frames = run(vec![
            line(START),
            line(r#"{"is_finished":false,"event_type":"search-queries-generation","search_queries":[]}"#),
            line(&text_event("x")),
            line(r#"{"is_finished":false,"event_type":"citation-generation","citations":[]}"#),
            line(END),
        ]);

        assert_eq!(frames.len(), 3);
        assert_eq!(content(&frames[0]), "x");
    }

    #[test]
    fn test_eof_without_stream_end_still_terminates() {
        let frames = run(vec![line(&text_event("partial"))]);

        assert_eq!(frames.len(), 3);
        assert_eq!(content(&frames[0]), "partial");
        assert_eq!(finish_reason(&frames[1]), "stop");
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[test]
    fn test_trailing_event_without_newline() {
        let frames = run(vec![line(&text_event("x")), raw(END)]);
        assert_eq!(frames.len(), 3);
        assert_eq!(finish_reason(&frames[1]), "stop");
    }

    #[test]
    fn test_read_error_terminates() {
        let frames = run(vec![
            line(&text_event("before")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            line(&text_event("after")),
        ]);

        assert_eq!(frames.len(), 3);
        assert_eq!(content(&frames[0]), "before");
        assert_eq!(finish_reason(&frames[1]), "stop");
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[test]
    fn test_nothing_after_stream_end() {
        let frames = run(vec![line(END), line(&text_event("ignored"))]);
        assert_eq!(frames.len(), 2);
        assert_eq!(finish_reason(&frames[0]), "stop");
    }

    #[test]
    fn test_invalid_utf8_event_is_skipped() {
        let mut bad = br#"{"event_type":"text-generation","text":""#.to_vec();
        bad.extend_from_slice(&[0xc3, 0x28]);
        bad.extend_from_slice(b"\"}\n");

        let frames = run(vec![
            line(&text_event("ok")),
            Ok(Bytes::from(bad)),
            line(END),
        ]);

        assert_eq!(frames.len(), 3);
        assert_eq!(content(&frames[0]), "ok");
        assert_eq!(finish_reason(&frames[1]), "stop");
        assert!(!frames.iter().any(|f| f.contains('\u{FFFD}')));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dropping_relay_releases_backend_stream() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(dropped.clone());

        // First event arrives, then the backend goes quiet without closing
        let backend = stream::iter(vec![line(&text_event("first"))])
            .chain(stream::pending())
            .map(move |read| {
                let _held = &guard;
                read
            });

        let mut frames = Box::pin(transcode_stream(
            backend,
            "command-r".to_string(),
            request_logger(&dir),
        ));

        let first = tokio_test::block_on(frames.next()).unwrap().unwrap();
        assert_eq!(content(std::str::from_utf8(&first).unwrap()), "first");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(frames);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
