//! Incremental decoding of streamed LLM responses
//!
//! HTTP bodies arrive as arbitrary byte chunks. A JSON line or SSE event can
//! span several chunks, and a chunk can hold several of them, so decoding
//! buffers until a full record is available.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::pin::Pin;

use crate::error::{Error, Result};

/// Lazy, finite stream of answer fragments. Dropping it cancels the request.
pub type FragmentStream = BoxStream<'static, Result<String>>;

struct LineState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    finished: bool,
}

/// Split a byte stream into lines (`\n` or `\r\n` terminated).
///
/// A trailing line without terminator is emitted at end of stream. A
/// transport error is yielded once and ends the stream.
pub fn decode_lines<S, E>(inner: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Display + Send,
{
    let state = LineState {
        inner: Box::pin(inner),
        buf: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = st.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some((Ok(String::from_utf8_lossy(&line).into_owned()), st));
            }

            if st.finished {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                return Some((Ok(String::from_utf8_lossy(&rest).into_owned()), st));
            }

            match st.inner.next().await {
                Some(Ok(bytes)) => st.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    st.finished = true;
                    st.buf.clear();
                    return Some((Err(Error::llm(format!("Stream interrupted: {}", e))), st));
                }
                None => st.finished = true,
            }
        }
    })
}

/// Decode newline-delimited JSON records and map each to an optional fragment.
///
/// Blank lines are skipped. `extract` returns `None` for records that carry
/// no text (for example the final `done` record).
pub fn decode_ndjson<S, E, T, F>(inner: S, extract: F) -> FragmentStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    T: DeserializeOwned + 'static,
    F: Fn(T) -> Option<Result<String>> + Send + 'static,
{
    decode_lines(inner)
        .filter_map(move |line| {
            let item = match line {
                Err(e) => Some(Err(e)),
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match serde_json::from_str::<T>(&line) {
                    Ok(record) => extract(record),
                    Err(e) => Some(Err(Error::llm(format!(
                        "Malformed stream record: {}",
                        e
                    )))),
                },
            };
            futures::future::ready(item)
        })
        .boxed()
}

/// Decode a `text/event-stream` body, parsing each event's `data` as JSON
/// and mapping it to an optional fragment.
pub fn decode_sse<S, E, T, F>(inner: S, extract: F) -> FragmentStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    T: DeserializeOwned + 'static,
    F: Fn(T) -> Option<Result<String>> + Send + 'static,
{
    inner
        .eventsource()
        .filter_map(move |event| {
            let item = match event {
                Err(e) => Some(Err(Error::llm(format!("Stream interrupted: {}", e)))),
                Ok(event) if event.data.trim().is_empty() || event.data == "[DONE]" => None,
                Ok(event) => match serde_json::from_str::<T>(&event.data) {
                    Ok(record) => extract(record),
                    Err(e) => Some(Err(Error::llm(format!("Malformed stream event: {}", e)))),
                },
            };
            futures::future::ready(item)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Record {
        text: String,
    }

    fn extract(record: Record) -> Option<Result<String>> {
        (!record.text.is_empty()).then_some(Ok(record.text))
    }

    fn chunked(body: &[u8], cuts: &[usize]) -> Vec<std::result::Result<Bytes, std::io::Error>> {
        let mut pieces = Vec::new();
        let mut prev = 0;
        for &cut in cuts {
            pieces.push(Ok(Bytes::copy_from_slice(&body[prev..cut])));
            prev = cut;
        }
        pieces.push(Ok(Bytes::copy_from_slice(&body[prev..])));
        pieces
    }

    async fn collect(stream: FragmentStream) -> Vec<String> {
        stream.map(|r| r.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let body = "first\r\nsecond\n\nlast";
        let pieces = chunked(body.as_bytes(), &[2, 6, 7, 15]);
        let lines: Vec<String> = decode_lines(stream::iter(pieces))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["first", "second", "", "last"]);
    }

    #[tokio::test]
    async fn test_ndjson_every_split_point() {
        let body = "{\"text\":\"Hé\"}\n{\"text\":\"\"}\n\n{\"text\":\"llo\"}\n";
        let bytes = body.as_bytes();
        for cut in 0..=bytes.len() {
            let pieces = chunked(bytes, &[cut]);
            let fragments = collect(decode_ndjson(stream::iter(pieces), extract)).await;
            assert_eq!(fragments, vec!["Hé", "llo"], "split at byte {}", cut);
        }
    }

    #[tokio::test]
    async fn test_sse_every_split_point() {
        let body = "data: {\"text\":\"The device \"}\n\ndata: {\"text\":\"needs 5 volts.\"}\r\n\r\n";
        let bytes = body.as_bytes();
        for a in 0..bytes.len() {
            let b = (a + 7).min(bytes.len());
            let pieces = chunked(bytes, &[a, b]);
            let fragments = collect(decode_sse(stream::iter(pieces), extract)).await;
            assert_eq!(fragments.concat(), "The device needs 5 volts.", "split at {}/{}", a, b);
        }
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let pieces: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"text\":\"partial\"}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"{\"text\":\"never\"}\n")),
        ];
        let items: Vec<Result<String>> =
            decode_ndjson(stream::iter(pieces), extract).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_record_is_llm_error() {
        let pieces = chunked(b"not json\n", &[]);
        let items: Vec<Result<String>> =
            decode_ndjson(stream::iter(pieces), extract).collect().await;
        assert!(matches!(items[0], Err(Error::Llm(_))));
    }
}
