//! Bounded body probing.
//!
//! # Responsibilities
//! - Read at most `limit` bytes of a mutating request's body for inspection
//! - Hand the upstream every byte the client sent, in order
//! - Never wait on a slow client past the probe deadline
//!
//! # Design Decisions
//! - Sized and chunked bodies are probed alike; only the prefix is buffered
//! - The forwarded body is the buffered prefix followed by the unread stream
//! - A probe that times out or fails is empty; the request body is not touched

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap};
use futures_util::{stream, StreamExt};

/// Result of probing a request body.
pub struct BodyProbe {
    /// Bytes available to detectors.
    pub probe: Bytes,
    /// Body to forward upstream.
    pub body: Body,
}

impl BodyProbe {
    fn untouched(body: Body) -> Self {
        Self {
            probe: Bytes::new(),
            body,
        }
    }
}

/// How the prefix read ended.
enum Read {
    /// The whole body fit in the prefix.
    Complete,
    /// `limit` bytes were read; more may follow.
    Truncated,
    Failed(axum::Error),
    TimedOut,
}

fn declared_empty(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

/// Probe `body` under the given byte limit and deadline.
pub async fn probe_body(headers: &HeaderMap, body: Body, limit: usize, deadline: Duration) -> BodyProbe {
    if limit == 0 || declared_empty(headers) {
        return BodyProbe::untouched(body);
    }

    let mut frames = body.into_data_stream();
    let mut prefix: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;

    let read = tokio::time::timeout(deadline, async {
        while buffered < limit {
            match frames.next().await {
                Some(Ok(chunk)) => {
                    buffered += chunk.len();
                    prefix.push(chunk);
                }
                Some(Err(e)) => return Read::Failed(e),
                None => return Read::Complete,
            }
        }
        Read::Truncated
    })
    .await
    .unwrap_or(Read::TimedOut);

    let probe = match &read {
        Read::Complete | Read::Truncated => joined_prefix(&prefix, limit),
        Read::Failed(e) => {
            tracing::debug!(error = %e, read = buffered, "Request body unreadable, probe left empty");
            Bytes::new()
        }
        Read::TimedOut => {
            tracing::debug!(
                deadline_ms = deadline.as_millis() as u64,
                read = buffered,
                "Request body probe timed out, probe left empty"
            );
            Bytes::new()
        }
    };

    let body = match read {
        Read::Complete => Body::from(Bytes::from(prefix.concat())),
        Read::Truncated | Read::TimedOut => {
            Body::from_stream(stream::iter(prefix.into_iter().map(Ok)).chain(frames))
        }
        // The client's stream is broken; the upstream sees the same failure.
        Read::Failed(e) => {
            let failure = stream::once(async move { Err::<Bytes, _>(e) });
            Body::from_stream(stream::iter(prefix.into_iter().map(Ok)).chain(failure))
        }
    };

    BodyProbe { probe, body }
}

/// First `limit` bytes of the buffered chunks.
fn joined_prefix(chunks: &[Bytes], limit: usize) -> Bytes {
    match chunks {
        [single] => single.slice(..single.len().min(limit)),
        _ => {
            let mut joined = chunks.concat();
            joined.truncate(limit);
            Bytes::from(joined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tokio::sync::mpsc;

    fn headers(length: usize) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        headers
    }

    /// A body fed chunk by chunk through the returned sender.
    fn channel_body() -> (mpsc::Sender<Result<Bytes, std::io::Error>>, Body) {
        let (tx, rx) = mpsc::channel(8);
        let chunks = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        (tx, Body::from_stream(chunks))
    }

    #[tokio::test]
    async fn test_small_body_is_probed_and_preserved() {
        let payload = "{\"note\":\"routine check\"}";
        let result = probe_body(
            &headers(payload.len()),
            Body::from(payload),
            1024,
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(result.probe, Bytes::from(payload));
        let forwarded = axum::body::to_bytes(result.body, 1024).await.unwrap();
        assert_eq!(forwarded, Bytes::from(payload));
    }

    #[tokio::test]
    async fn test_chunked_body_is_probed() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"name\": \"x' OR ")),
            Ok(Bytes::from_static(b"'1'='1\"}")),
        ];
        let result = probe_body(
            &HeaderMap::new(),
            Body::from_stream(stream::iter(chunks)),
            1024,
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(result.probe, Bytes::from_static(b"{\"name\": \"x' OR '1'='1\"}"));
        let forwarded = axum::body::to_bytes(result.body, 1024).await.unwrap();
        assert_eq!(forwarded, result.probe);
    }

    #[tokio::test]
    async fn test_oversized_body_probes_prefix_and_forwards_all() {
        let mut payload = b"<script>alert(1)</script>".to_vec();
        payload.extend(std::iter::repeat(b'a').take(4096));
        let result = probe_body(
            &headers(payload.len()),
            Body::from(payload.clone()),
            1024,
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(result.probe.len(), 1024);
        assert!(result.probe.starts_with(b"<script>"));
        let forwarded = axum::body::to_bytes(result.body, 8192).await.unwrap();
        assert_eq!(forwarded, Bytes::from(payload));
    }

    #[tokio::test]
    async fn test_slow_body_times_out_without_losing_bytes() {
        let (tx, body) = channel_body();
        tx.send(Ok(Bytes::from_static(b"hello"))).await.unwrap();

        let result = probe_body(&headers(10), body, 1024, Duration::from_millis(50)).await;
        assert!(result.probe.is_empty());

        tx.send(Ok(Bytes::from_static(b"world"))).await.unwrap();
        drop(tx);
        let forwarded = axum::body::to_bytes(result.body, 1024).await.unwrap();
        assert_eq!(forwarded, Bytes::from_static(b"helloworld"));
    }

    #[tokio::test]
    async fn test_broken_body_fails_upstream_too() {
        let (tx, body) = channel_body();
        tx.send(Ok(Bytes::from_static(b"abc"))).await.unwrap();
        tx.send(Err(std::io::Error::other("connection reset"))).await.unwrap();

        let result = probe_body(&HeaderMap::new(), body, 1024, Duration::from_millis(100)).await;
        assert!(result.probe.is_empty());
        assert!(axum::body::to_bytes(result.body, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_declared_empty_body_skipped() {
        let result = probe_body(&headers(0), Body::empty(), 1024, Duration::from_millis(100)).await;
        assert!(result.probe.is_empty());
    }
}
