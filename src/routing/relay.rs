//! Streaming an owning node's response back to the client.
use axum::body::StreamBody;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::warn;

use crate::error::{GovnetError, Result};

pub type RelayBody = BoxStream<'static, Result<Bytes>>;

/// Status, headers and a lazily streamed body from an owning node
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl std::fmt::Debug for ProxiedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

impl ProxiedResponse {
    /// Wrap an upstream response. `on_complete` runs only once the whole body
    /// has been handed on; an upstream error, a node silent for longer than
    /// `idle_timeout`, or a dropped stream skips it.
    pub(crate) fn relay(
        upstream: reqwest::Response,
        chunk_size: usize,
        idle_timeout: Duration,
        on_complete: Option<BoxFuture<'static, ()>>,
    ) -> Self {
        let status = upstream.status();
        let headers = forwardable_headers(upstream.headers());
        let body = relay_body(upstream.bytes_stream(), chunk_size, idle_timeout, on_complete);
        Self {
            status,
            headers,
            body,
        }
    }

    /// Collect the full body. Runs the completion hook like a client would.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(collected))
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = StreamBody::new(self.body).into_response();
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in self.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        response
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::TE
        || name == header::TRAILER
        || name == header::UPGRADE
        || name == header::PROXY_AUTHENTICATE
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

fn forwardable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

struct RelayState<E> {
    upstream: BoxStream<'static, std::result::Result<Bytes, E>>,
    pending: Bytes,
    chunk_size: usize,
    idle_timeout: Duration,
    on_complete: Option<BoxFuture<'static, ()>>,
    failed: bool,
}

impl<E> RelayState<E> {
    fn fail(mut self, reason: String) -> Option<(Result<Bytes>, Self)> {
        warn!("Upstream body failed mid-stream: {}", reason);
        self.failed = true;
        self.on_complete = None;
        Some((
            Err(GovnetError::ServiceUnavailable(format!(
                "upstream body interrupted: {}",
                reason
            ))),
            self,
        ))
    }
}

/// Re-chunk `upstream` into pieces of at most `chunk_size` bytes. Each wait
/// for the next upstream piece is bounded by `idle_timeout`.
pub(crate) fn relay_body<S, E>(
    upstream: S,
    chunk_size: usize,
    idle_timeout: Duration,
    on_complete: Option<BoxFuture<'static, ()>>,
) -> RelayBody
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = RelayState {
        upstream: upstream.boxed(),
        pending: Bytes::new(),
        chunk_size: chunk_size.max(1),
        idle_timeout,
        on_complete,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        loop {
            if !state.pending.is_empty() {
                let take = state.pending.len().min(state.chunk_size);
                let chunk = state.pending.split_to(take);
                return Some((Ok(chunk), state));
            }
            match tokio::time::timeout(state.idle_timeout, state.upstream.next()).await {
                Ok(Some(Ok(bytes))) => state.pending = bytes,
                Ok(Some(Err(e))) => return state.fail(e.to_string()),
                Err(_) => {
                    let reason = format!("no data for {}s", state.idle_timeout.as_secs());
                    return state.fail(reason);
                }
                Ok(None) => {
                    if let Some(on_complete) = state.on_complete.take() {
                        on_complete.await;
                    }
                    return None;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const IDLE: Duration = Duration::from_secs(20);

    fn counter_hook(counter: &Arc<AtomicUsize>) -> Option<BoxFuture<'static, ()>> {
        let counter = counter.clone();
        Some(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        )
    }

    #[tokio::test]
    async fn test_rechunks_to_bounded_pieces() {
        let upstream = stream::iter(vec![
            Ok::<_, String>(Bytes::from(vec![1u8; 10])),
            Ok(Bytes::from(vec![2u8; 3])),
        ]);
        let chunks: Vec<Bytes> = relay_body(upstream, 4, IDLE, None)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2, 3]);
        assert_eq!(chunks.concat().len(), 13);
    }

    #[tokio::test]
    async fn test_hook_runs_after_last_chunk() {
        let counter = Arc::new(AtomicUsize::new(0));
        let upstream = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"abcdef"))]);
        let mut body = relay_body(upstream, 3, IDLE, counter_hook(&counter));

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"def"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(body.next().await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_skipped_on_upstream_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"never")),
        ]);
        let results: Vec<Result<Bytes>> = relay_body(upstream, 100, IDLE, counter_hook(&counter))
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_skipped_when_client_goes_away() {
        let counter = Arc::new(AtomicUsize::new(0));
        let upstream = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"abcdef"))]);
        let mut body = relay_body(upstream, 2, IDLE, counter_hook(&counter));
        body.next().await;
        drop(body);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_upstream_times_out_without_checkout() {
        let counter = Arc::new(AtomicUsize::new(0));
        let upstream = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"abc"))])
            .chain(stream::pending());
        let mut body = relay_body(upstream, 100, Duration::from_secs(1), counter_hook(&counter));

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        let started = tokio::time::Instant::now();
        assert!(matches!(
            body.next().await,
            Some(Err(GovnetError::ServiceUnavailable(_)))
        ));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(body.next().await.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_steady_upstream_is_not_cut_off() {
        let counter = Arc::new(AtomicUsize::new(0));
        let upstream = stream::iter(0..5u8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            Ok::<_, String>(Bytes::from(vec![i; 2]))
        });
        let collected: Vec<Result<Bytes>> =
            relay_body(upstream, 100, Duration::from_secs(1), counter_hook(&counter))
                .collect()
                .await;
        assert_eq!(collected.len(), 5);
        assert!(collected.iter().all(|chunk| chunk.is_ok()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, "application/zip".parse().unwrap());
        upstream.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        upstream.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        let headers = forwardable_headers(&upstream);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    }
}
