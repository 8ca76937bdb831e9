//! Pipes backend chunks to the client as they arrive.
//!
//! Errors can only become a status code before the first chunk is sent. After
//! that the status line is already on the wire, so a backend failure aborts
//! the response body instead: the client sees the connection close before the
//! chunked terminator and must treat the reply as failed. A reply that ends
//! cleanly is always the complete backend output.

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{BackendError, ServerError};
use crate::llm::ChunkStream;

/// Stream `chunks` to the client as a `text/plain` body.
///
/// Waits for the first non-empty chunk so that an immediate backend failure
/// still gets a `500`. Everything after that is forwarded one chunk at a time
/// without buffering. Dropping the response body (client disconnect) drops
/// `chunks` and with it the upstream request.
pub async fn relay(
    mut chunks: ChunkStream,
    chunk_timeout: Option<Duration>,
) -> Result<Response, ServerError> {
    let first = match next_chunk(&mut chunks, chunk_timeout).await {
        Some(Ok(text)) => Some(text),
        Some(Err(e)) => return Err(e.into()),
        None => None,
    };

    let done = first.is_none();
    let state = RelayState {
        chunks,
        chunk_timeout,
        first,
        done,
        guard: RelayGuard {
            chunks: 0,
            bytes: 0,
            finished: done,
        },
    };

    let body = stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        let next = match state.first.take() {
            Some(text) => Some(Ok(text)),
            None => next_chunk(&mut state.chunks, state.chunk_timeout).await,
        };

        match next {
            Some(Ok(text)) => {
                state.guard.chunks += 1;
                state.guard.bytes += text.len();
                Some((Ok(Bytes::from(text)), state))
            }
            Some(Err(e)) => {
                warn!(
                    error = %e,
                    chunks = state.guard.chunks,
                    bytes = state.guard.bytes,
                    "Backend failed mid-stream, aborting response"
                );
                state.done = true;
                state.guard.finished = true;
                Some((Err(io::Error::other(e)), state))
            }
            None => {
                debug!(
                    chunks = state.guard.chunks,
                    bytes = state.guard.bytes,
                    "Relay finished"
                );
                state.guard.finished = true;
                None
            }
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Drain `chunks` into one string for the buffered endpoint.
pub async fn collect(
    mut chunks: ChunkStream,
    chunk_timeout: Option<Duration>,
) -> Result<String, ServerError> {
    let mut text = String::new();
    while let Some(chunk) = next_chunk(&mut chunks, chunk_timeout).await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

struct RelayState {
    chunks: ChunkStream,
    chunk_timeout: Option<Duration>,
    first: Option<String>,
    done: bool,
    guard: RelayGuard,
}

/// Logs when the body is dropped before the backend stream ended.
struct RelayGuard {
    chunks: usize,
    bytes: usize,
    finished: bool,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                chunks = self.chunks,
                bytes = self.bytes,
                "Client disconnected, cancelling backend stream"
            );
        }
    }
}

/// Next non-empty chunk, or a timeout error if the backend goes quiet.
async fn next_chunk(
    chunks: &mut ChunkStream,
    chunk_timeout: Option<Duration>,
) -> Option<Result<String, BackendError>> {
    loop {
        let item = match chunk_timeout {
            Some(limit) => match tokio::time::timeout(limit, chunks.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(BackendError::Timeout(limit))),
            },
            None => chunks.next().await,
        };

        match item {
            Some(Ok(text)) if text.is_empty() => continue,
            other => return other,
        }
    }
}
