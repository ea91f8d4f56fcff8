//! Streaming loop detection endpoint
//!
//! Handles POST /v1/loop-detection/stream. The (chunked) request body is
//! treated as the upstream model output: it is decoded into text fragments,
//! guarded by a loop detector and echoed back as Server-Sent Events.
//!
//! # SSE Format
//!
//! ```text
//! data: {"content":"..."}
//!
//! data: [DONE]
//!
//! ```
//!
//! When a loop is detected the last content event carries the cancellation
//! notice and the request body is no longer read. A body read error ends the
//! stream with `event: error`.

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::loop_detection::StreamGuard;
use crate::metrics::{DetectionMode, Endpoint};
use crate::middleware::RequestId;
use axum::{
    Extension,
    body::Body,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct ContentChunk<'a> {
    content: &'a str,
}

/// POST /v1/loop-detection/stream handler
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Body,
) -> AppResult<Response> {
    state.record_request(Endpoint::Stream, request_id);
    let detector = state.new_detector()?;

    let token = CancellationToken::new();
    let upstream = decode_utf8(body.into_data_stream()).take_until(token.clone().cancelled_owned());

    let metrics = state.metrics().clone();
    let guarded = StreamGuard::new(upstream, detector)
        .on_detected(move |event| {
            tracing::warn!(
                request_id = %request_id,
                pattern = %event.pattern_preview(),
                repetition_count = event.repetition_count,
                "Cancelling streamed response after loop detection"
            );
            metrics
                .record_detection(DetectionMode::Streaming)
                .map_err(|e| e.to_string().into())
        })
        .cancel_upstream(Arc::new(token))
        .with_metrics(state.metrics().clone())
        .into_stream();

    tracing::debug!(request_id = %request_id, "Starting guarded stream");

    Ok(Sse::new(sse_events(guarded, request_id))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text(""),
        )
        .into_response())
}

/// Map guarded fragments to SSE events, ending with `[DONE]` or an error event
fn sse_events<S, E>(
    fragments: S,
    request_id: RequestId,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    fragments
        .map(move |item| match item {
            Ok(content) => {
                let chunk = ContentChunk { content: &content };
                (
                    Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()),
                    false,
                )
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    error = %e,
                    "Request body stream failed"
                );
                let body = serde_json::json!({ "error": e.to_string() });
                (Event::default().event("error").data(body.to_string()), true)
            }
        })
        .chain(stream::once(future::ready((
            Event::default().data("[DONE]"),
            false,
        ))))
        .scan(false, |stopped, (event, is_error)| {
            if *stopped {
                return future::ready(None);
            }
            *stopped = is_error;
            future::ready(Some(Ok(event)))
        })
}

/// Decode a byte stream into UTF-8 text fragments
///
/// A multi-byte sequence split across chunks is carried over to the next
/// chunk. Invalid bytes become U+FFFD. Chunks that decode to nothing are
/// skipped. An error is forwarded and ends the stream.
pub fn decode_utf8<S, B, E>(body: S) -> impl Stream<Item = Result<String, E>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Send + 'static,
{
    stream::unfold(
        (Box::pin(body), Utf8Decoder::default(), false),
        |(mut body, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match body.next().await {
                    Some(Ok(bytes)) => {
                        let text = decoder.push(bytes.as_ref());
                        if !text.is_empty() {
                            return Some((Ok(text), (body, decoder, false)));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (body, decoder, true))),
                    None => {
                        return decoder
                            .finish()
                            .map(|rest| (Ok(rest), (body, decoder, true)));
                    }
                }
            }
        },
    )
}

#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    /// Flush a dangling partial sequence at end of stream
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, String>> + Send + 'static {
        stream::iter(parts.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_decoder_joins_split_multibyte_sequence() {
        let bytes = "héllo wörld".as_bytes().to_vec();
        // Split inside the two-byte 'é'
        let parts = vec![bytes[..2].to_vec(), bytes[2..].to_vec()];
        let out: Vec<_> = decode_utf8(chunks(parts)).collect().await;
        assert_eq!(out, vec![Ok("h".to_string()), Ok("éllo wörld".to_string())]);
    }

    #[tokio::test]
    async fn test_decoder_skips_chunks_with_no_complete_char() {
        let snowman = "☃".as_bytes().to_vec();
        let parts = vec![
            snowman[..1].to_vec(),
            snowman[1..2].to_vec(),
            snowman[2..].to_vec(),
        ];
        let out: Vec<_> = decode_utf8(chunks(parts)).collect().await;
        assert_eq!(out, vec![Ok("☃".to_string())]);
    }

    #[tokio::test]
    async fn test_decoder_replaces_invalid_bytes() {
        let parts = vec![b"ab\xffcd".to_vec()];
        let out: Vec<_> = decode_utf8(chunks(parts)).collect().await;
        assert_eq!(out, vec![Ok("ab\u{FFFD}cd".to_string())]);
    }

    #[tokio::test]
    async fn test_decoder_flushes_truncated_tail() {
        let parts = vec![b"ok\xe2\x98".to_vec()];
        let out: Vec<_> = decode_utf8(chunks(parts)).collect().await;
        assert_eq!(
            out,
            vec![Ok("ok".to_string()), Ok("\u{FFFD}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_decoder_forwards_error_and_stops() {
        let source = stream::iter(vec![
            Ok(b"first".to_vec()),
            Err("reset".to_string()),
            Ok(b"never".to_vec()),
        ]);
        let out: Vec<_> = decode_utf8(source).collect().await;
        assert_eq!(out, vec![Ok("first".to_string()), Err("reset".to_string())]);
    }

    #[tokio::test]
    async fn test_sse_events_end_with_done() {
        let fragments = stream::iter(vec![Ok::<_, String>("a".to_string()), Ok("b".to_string())]);
        let events: Vec<_> = sse_events(fragments, RequestId::new()).collect().await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_sse_error_event_is_last() {
        let fragments = stream::iter(vec![Ok("a".to_string()), Err("broken pipe".to_string())]);
        let events: Vec<_> = sse_events(fragments, RequestId::new()).collect().await;
        assert_eq!(events.len(), 2);
    }
}
