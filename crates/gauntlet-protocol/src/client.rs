//! Protocol client
//!
//! Borrows a byte-stream pair from an execution session and speaks
//! newline-delimited JSON-RPC over it. A background reader task feeds a
//! [`LineDecoder`] and resolves pending completions by request id. The client
//! never owns the process behind the stream.

use crate::decoder::{Decoded, LineDecoder};
use crate::error::ProtocolError;
use crate::message::{Notification, ProtocolMessage, Request, RequestId, Response};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Boxed read half of a session stream
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a session stream
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Completion = oneshot::Sender<Result<Response, ProtocolError>>;

/// Counters for traffic that was not a response to one of our requests
#[derive(Debug, Default)]
struct ClientStats {
    discarded_lines: AtomicU64,
    unmatched_responses: AtomicU64,
    server_requests: AtomicU64,
}

/// Point-in-time view of [`ProtocolClient`] counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Lines dropped by the decoder
    pub discarded_lines: u64,
    /// Responses whose id matched no pending request
    pub unmatched_responses: u64,
    /// Requests initiated by the server
    pub server_requests: u64,
}

impl StatsSnapshot {
    /// True when the stream carried only well-formed, expected traffic
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discarded_lines == 0 && self.unmatched_responses == 0
    }
}

/// State shared between the client and its reader task
struct Shared {
    writer: tokio::sync::Mutex<BoxWriter>,
    pending: DashMap<RequestId, Completion>,
    closed: AtomicBool,
    stats: ClientStats,
}

impl Shared {
    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    fn fail_pending(&self) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0usize;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(ProtocolError::ConnectionClosed));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(failed, "failed pending requests after stream closed");
        }
    }
}

/// Newline-delimited JSON-RPC client over a borrowed byte stream
pub struct ProtocolClient {
    shared: Arc<Shared>,
    issued: Mutex<HashSet<RequestId>>,
    next_id: AtomicI64,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl ProtocolClient {
    /// Attach to a stream pair and start the reader task
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            stats: ClientStats::default(),
        });

        let reader_task = tokio::spawn(read_loop(Box::new(reader), Arc::clone(&shared)));

        Self {
            shared,
            issued: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
            reader_task,
        }
    }

    /// Send a request and wait for its response
    ///
    /// The returned [`Response`] may carry an error payload; deciding whether
    /// that is fatal is up to the caller.
    ///
    /// # Errors
    /// - [`ProtocolError::DuplicateRequestId`] if the id was used before
    /// - [`ProtocolError::Timeout`] if no response arrives in time
    /// - [`ProtocolError::ConnectionClosed`] if the stream ends first
    pub async fn send(&self, request: Request, timeout: Duration) -> Result<Response, ProtocolError> {
        let id = request.id.clone();
        if !self.issued.lock().insert(id.clone()) {
            return Err(ProtocolError::DuplicateRequestId(id));
        }

        let line = serde_json::to_string(&request)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);

        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(ProtocolError::ConnectionClosed);
        }

        tracing::trace!(id = %id, method = %request.method, "sending request");

        let exchange = async {
            if let Err(e) = self.shared.write_line(&line).await {
                return Err(ProtocolError::Io(e));
            }
            rx.await.unwrap_or(Err(ProtocolError::ConnectionClosed))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if result.is_err() {
                    self.shared.pending.remove(&id);
                }
                result
            }
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(ProtocolError::Timeout {
                    method: request.method,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Send a request with the next free numeric id
    ///
    /// # Errors
    /// See [`ProtocolClient::send`]
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        let id = self.allocate_id();
        self.send(Request::new(id, method, params), timeout).await
    }

    /// Send a one-way notification
    ///
    /// # Errors
    /// Returns [`ProtocolError::Io`] if the stream cannot be written
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let line = serde_json::to_string(&Notification::new(method, params))?;
        self.shared.write_line(&line).await?;
        Ok(())
    }

    /// True once the reader has seen end of stream
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of requests awaiting a response
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Snapshot of traffic counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let stats = &self.shared.stats;
        StatsSnapshot {
            discarded_lines: stats.discarded_lines.load(Ordering::Relaxed),
            unmatched_responses: stats.unmatched_responses.load(Ordering::Relaxed),
            server_requests: stats.server_requests.load(Ordering::Relaxed),
        }
    }

    fn allocate_id(&self) -> RequestId {
        let issued = self.issued.lock();
        loop {
            let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !issued.contains(&id) {
                return id;
            }
        }
    }
}

async fn read_loop(mut reader: BoxReader, shared: Arc<Shared>) {
    let mut decoder = LineDecoder::new();
    let mut chunk = vec![0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for decoded in decoder.push(&chunk[..n]) {
                    dispatch(&shared, decoded).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "session stream read failed");
                break;
            }
        }
    }

    if let Some(decoded) = decoder.finish() {
        dispatch(&shared, decoded).await;
    }
    shared.closed.store(true, Ordering::Release);
    shared.fail_pending();
    tracing::debug!("protocol reader stopped");
}

async fn dispatch(shared: &Shared, decoded: Decoded) {
    match decoded {
        Decoded::Violation { violation, preview } => {
            shared.stats.discarded_lines.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%violation, line = %preview, "discarding non-protocol line");
        }
        Decoded::Message(ProtocolMessage::Response(response)) => {
            if let Some((_, tx)) = shared.pending.remove(&response.id) {
                let _ = tx.send(Ok(response));
            } else {
                shared.stats.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id = %response.id, "dropping response with unknown id");
            }
        }
        Decoded::Message(ProtocolMessage::Request { id, method, .. }) => {
            shared.stats.server_requests.fetch_add(1, Ordering::Relaxed);
            if method == "ping" {
                let reply = Response::result(id, Value::Object(serde_json::Map::new())).to_value();
                if let Err(e) = shared.write_line(&reply.to_string()).await {
                    tracing::debug!(error = %e, "failed to answer server ping");
                }
            } else {
                tracing::debug!(%method, "ignoring server-initiated request");
            }
        }
        Decoded::Message(ProtocolMessage::Notification { method, .. }) => {
            tracing::trace!(%method, "server notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ResponseOutcome, RpcError};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Client wired to an in-memory peer; returns the peer's halves
    fn pair() -> (
        ProtocolClient,
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    ) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, server_write) = tokio::io::split(server_side);
        (
            ProtocolClient::attach(client_read, client_write),
            BufReader::new(server_read),
            server_write,
        )
    }

    async fn read_request(
        reader: &mut BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    ) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn correlates_response_by_id() {
        let (client, mut server_in, mut server_out) = pair();

        let server = tokio::spawn(async move {
            let req = read_request(&mut server_in).await;
            assert_eq!(req["method"], "tools/list");
            let id = req["id"].clone();
            // Noise and an unrelated id arrive first.
            server_out.write_all(b"booting...\n").await.unwrap();
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":999,\"result\":{}}\n")
                .await
                .unwrap();
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}});
            server_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
            (server_in, server_out)
        });

        let resp = client
            .request("tools/list", None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.outcome, ResponseOutcome::Result(json!({"tools": []})));
        let _halves = server.await.unwrap();

        let stats = client.stats();
        assert_eq!(stats.discarded_lines, 1);
        assert_eq!(stats.unmatched_responses, 1);
        assert!(!stats.is_clean());
    }

    #[tokio::test]
    async fn error_response_is_returned_not_raised() {
        let (client, mut server_in, mut server_out) = pair();
        tokio::spawn(async move {
            let req = read_request(&mut server_in).await;
            let reply = json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32601, "message": "Method not found"}
            });
            server_out
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let resp = client
            .request("resources/list", None, Duration::from_secs(2))
            .await
            .unwrap();
        let err: RpcError = resp.into_result().unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[tokio::test]
    async fn times_out_and_clears_pending() {
        let (client, _server_in, _server_out) = pair();
        let started = std::time::Instant::now();

        let err = client
            .request("tools/call", None, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn reused_id_is_rejected() {
        let (client, _server_in, _server_out) = pair();

        let first = client
            .send(Request::new(5_i64, "ping", None), Duration::from_millis(20))
            .await;
        assert!(first.unwrap_err().is_timeout());

        let second = client
            .send(Request::new(5_i64, "ping", None), Duration::from_millis(20))
            .await;
        assert!(matches!(second, Err(ProtocolError::DuplicateRequestId(RequestId::Number(5)))));
    }

    #[tokio::test]
    async fn allocated_ids_skip_explicit_ones() {
        let (client, _server_in, _server_out) = pair();
        let _ = client
            .send(Request::new(1_i64, "a", None), Duration::from_millis(10))
            .await;
        assert_eq!(client.allocate_id(), RequestId::Number(2));
    }

    #[tokio::test]
    async fn closed_stream_fails_pending_requests() {
        let (client, server_in, server_out) = pair();
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(server_out);
            drop(server_in);
        });

        let err = client
            .request("initialize", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed | ProtocolError::Io(_)));
        closer.await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn answers_server_ping() {
        let (client, mut server_in, mut server_out) = pair();
        server_out
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"p1\",\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let reply = read_request(&mut server_in).await;
        assert_eq!(reply["id"], "p1");
        assert_eq!(reply["result"], json!({}));
        assert_eq!(client.stats().server_requests, 1);
    }

    #[tokio::test]
    async fn notification_is_written_without_id() {
        let (client, mut server_in, _server_out) = pair();
        client.notify("notifications/initialized", None).await.unwrap();
        let note = read_request(&mut server_in).await;
        assert_eq!(note["method"], "notifications/initialized");
        assert!(note.get("id").is_none());
    }
}
