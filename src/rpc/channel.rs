//! Bidirectional JSON-RPC channel over an async byte stream
//!
//! One task reads newline-delimited messages and dispatches them to the
//! registered [`RpcHandler`] in wire order; another task drains a single
//! unbounded queue of outgoing lines, so outbound order equals submission
//! order and sending never blocks the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use super::error::RpcError;
use super::message::{encode_line, join_call, split_call, ErrorObject, Incoming, RawMessage, RequestId, WireCall};

/// Receives calls decoded by a channel's read loop.
///
/// Handlers run on the read-loop task, one call at a time, in wire order.
/// The returned value is sent back for requests and discarded for
/// notifications.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Closed set of methods this side accepts
    type Call: WireCall;

    async fn handle(&self, call: Self::Call, peer: &RpcChannel) -> Result<Value, ErrorObject>;
}

enum Outgoing {
    Line(String),
    Close,
}

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingState {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

struct ChannelInner {
    label: String,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    pending: Mutex<PendingState>,
    next_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

/// Removes a request's waiter once its caller stops waiting.
struct PendingRequest<'a> {
    channel: &'a RpcChannel,
    id: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.channel.inner.pending.lock().waiters.remove(&self.id);
    }
}

/// Handle to an attached channel; clones share the connection
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcChannel {
    /// Binds a channel to a reader/writer pair and starts its tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn attach<R, W, H>(label: impl Into<String>, reader: R, writer: W, handler: H) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: RpcHandler,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        let channel = Self {
            inner: Arc::new(ChannelInner {
                label: label.into(),
                outgoing,
                pending: Mutex::new(PendingState::default()),
                next_id: AtomicU64::new(1),
                closed_tx,
            }),
        };

        tokio::spawn(write_loop(
            writer,
            outgoing_rx,
            Arc::downgrade(&channel.inner),
        ));
        tokio::spawn(read_loop(channel.clone(), reader, handler));

        debug!(channel = %channel.inner.label, "RPC channel attached");
        channel
    }

    /// Name used in log output.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Sends a notification. Never waits for the peer.
    pub fn notify<C: WireCall>(&self, call: &C) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        let (method, params) = split_call(call)?;
        trace!(channel = %self.inner.label, method = %method, "-> notification");
        let line = encode_line(&RawMessage::notification(method, params))?;
        self.push(line)
    }

    /// Sends a request and waits for its response without a deadline.
    ///
    /// Dropping the returned future forgets the request; a late response is
    /// discarded.
    pub async fn request<C, R>(&self, call: &C) -> Result<R, RpcError>
    where
        C: WireCall,
        R: DeserializeOwned,
    {
        let (id, reply) = self.begin_request(call)?;
        let _pending = PendingRequest { channel: self, id };

        let value = reply.await.map_err(|_| RpcError::ConnectionClosed)??;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends a request and waits at most `timeout` for the response.
    pub async fn request_with_timeout<C, R>(&self, call: &C, timeout: Duration) -> Result<R, RpcError>
    where
        C: WireCall,
        R: DeserializeOwned,
    {
        let (id, reply) = self.begin_request(call)?;
        let _pending = PendingRequest { channel: self, id };

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => Ok(serde_json::from_value(result?)?),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                warn!(
                    channel = %self.inner.label,
                    "Request {} ({}) timed out after {:?}",
                    id,
                    call.method(),
                    timeout
                );
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// Closes the channel: queued writes are flushed, the writer is shut
    /// down and every pending request fails with `ConnectionClosed`.
    pub fn close(&self) {
        self.shutdown("closed locally");
    }

    /// Resolves once the channel is closed, locally or by the peer.
    pub async fn closed(&self) {
        let mut closed_rx = self.inner.closed_tx.subscribe();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().waiters.len()
    }

    fn begin_request<C: WireCall>(
        &self,
        call: &C,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, RpcError>>), RpcError> {
        let (method, params) = split_call(call)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let line = encode_line(&RawMessage::request(RequestId::Number(id), method, params))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(RpcError::ConnectionClosed);
            }
            pending.waiters.insert(id, reply_tx);
        }

        trace!(channel = %self.inner.label, id, method = call.method(), "-> request");
        if let Err(err) = self.push(line) {
            self.inner.pending.lock().waiters.remove(&id);
            return Err(err);
        }

        Ok((id, reply_rx))
    }

    fn push(&self, line: String) -> Result<(), RpcError> {
        self.inner
            .outgoing
            .send(Outgoing::Line(line))
            .map_err(|_| RpcError::ConnectionClosed)
    }

    fn complete(&self, id: RequestId, outcome: Result<Value, ErrorObject>) {
        let waiter = match id {
            RequestId::Number(n) => self.inner.pending.lock().waiters.remove(&n),
            RequestId::String(_) => None,
        };

        let Some(waiter) = waiter else {
            debug!(channel = %self.inner.label, "Dropping response for unknown request {}", id);
            return;
        };

        let result = outcome.map_err(|error| RpcError::Remote {
            code: error.code,
            message: error.message,
        });
        let _ = waiter.send(result);
    }

    fn shutdown(&self, reason: &str) {
        let waiters = {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return;
            }
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };

        debug!(
            channel = %self.inner.label,
            "Closing RPC channel ({}), failing {} pending requests",
            reason,
            waiters.len()
        );

        for (_, waiter) in waiters {
            let _ = waiter.send(Err(RpcError::ConnectionClosed));
        }

        let _ = self.inner.outgoing.send(Outgoing::Close);
        self.inner.closed_tx.send_replace(true);
    }

    async fn dispatch_line<H: RpcHandler>(&self, line: &str, handler: &H) {
        let message: RawMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %self.inner.label, error = %e, "Skipping malformed message");
                return;
            }
        };

        // Only messages shaped like a request can be answered.
        let reply_to = match (&message.id, &message.method) {
            (Some(id), Some(_)) => Some(id.clone()),
            _ => None,
        };

        match message.classify() {
            Ok(Incoming::Response { id, outcome }) => self.complete(id, outcome),
            Ok(Incoming::Notification { method, params }) => {
                trace!(channel = %self.inner.label, method = %method, "<- notification");
                if let Err(error) = self.invoke(handler, &method, params).await {
                    warn!(
                        channel = %self.inner.label,
                        "Notification {} failed: {} ({})",
                        method,
                        error.message,
                        error.code
                    );
                }
            }
            Ok(Incoming::Request { id, method, params }) => {
                trace!(channel = %self.inner.label, %id, method = %method, "<- request");
                let outcome = self.invoke(handler, &method, params).await;
                self.respond(id, outcome);
            }
            Err(reason) => {
                warn!(channel = %self.inner.label, "Skipping invalid message: {}", reason);
                if let Some(id) = reply_to {
                    self.respond(id, Err(ErrorObject::invalid_request(reason)));
                }
            }
        }
    }

    fn respond(&self, id: RequestId, outcome: Result<Value, ErrorObject>) {
        let line = match encode_line(&RawMessage::response(id.clone(), outcome)) {
            Ok(line) => line,
            Err(e) => {
                warn!(channel = %self.inner.label, error = %e, "Failed to encode response");
                return;
            }
        };

        if self.push(line).is_err() {
            debug!(channel = %self.inner.label, "Response to {} dropped, channel closed", id);
        }
    }

    async fn invoke<H: RpcHandler>(&self, handler: &H, method: &str, params: Value) -> Result<Value, ErrorObject> {
        if !H::Call::METHODS.contains(&method) {
            return Err(ErrorObject::method_not_found(method));
        }

        let call = join_call::<H::Call>(method, params)
            .map_err(|e| ErrorObject::invalid_params(format!("{}: {}", method, e)))?;

        handler.handle(call, self).await
    }
}

async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Outgoing>, inner: Weak<ChannelInner>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = outgoing.recv().await {
        let line = match message {
            Outgoing::Line(line) => line,
            Outgoing::Close => break,
        };

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(error = %e, "RPC write failed");
            if let Some(inner) = inner.upgrade() {
                RpcChannel { inner }.shutdown("write failed");
            }
            break;
        }
    }

    let _ = writer.shutdown().await;
}

/// Closes the channel when the read loop is torn down without finishing,
/// e.g. by a panicking handler.
struct ReadLoopGuard {
    channel: RpcChannel,
    finished: bool,
}

impl Drop for ReadLoopGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(channel = %self.channel.inner.label, "RPC read loop aborted");
            self.channel.shutdown("read loop aborted");
        }
    }
}

async fn read_loop<R, H>(channel: RpcChannel, reader: R, handler: H)
where
    R: AsyncRead + Unpin + Send + 'static,
    H: RpcHandler,
{
    let mut guard = ReadLoopGuard {
        channel: channel.clone(),
        finished: false,
    };
    let mut reader = BufReader::new(reader);
    let mut closed_rx = channel.inner.closed_tx.subscribe();
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();

        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read,
            _ = closed_rx.wait_for(|closed| *closed) => break "closed",
        };

        match read {
            Ok(0) => break "end of stream",
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %channel.inner.label, error = %e, "RPC read failed");
                break "read error";
            }
        }

        if channel.is_closed() {
            break "closed";
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                warn!(channel = %channel.inner.label, "Skipping message that is not valid UTF-8");
                continue;
            }
        };

        if line.is_empty() {
            continue;
        }

        channel.dispatch_line(line, &handler).await;
    };

    guard.finished = true;
    channel.shutdown(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "method", content = "params", rename_all_fields = "camelCase")]
    enum TestCall {
        Add { left: i64, right: i64 },
        Note { text: String },
    }

    impl WireCall for TestCall {
        const METHODS: &'static [&'static str] = &["Add", "Note"];

        fn method(&self) -> &'static str {
            match self {
                TestCall::Add { .. } => "Add",
                TestCall::Note { .. } => "Note",
            }
        }
    }

    struct Recorder {
        notes: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl RpcHandler for Recorder {
        type Call = TestCall;

        async fn handle(&self, call: TestCall, _peer: &RpcChannel) -> Result<Value, ErrorObject> {
            match call {
                TestCall::Add { left, right } => Ok(json!(left + right)),
                TestCall::Note { text } => {
                    let _ = self.notes.send(text);
                    Ok(Value::Null)
                }
            }
        }
    }

    fn recorder() -> (Recorder, mpsc::UnboundedReceiver<String>) {
        let (notes, rx) = mpsc::unbounded_channel();
        (Recorder { notes }, rx)
    }

    /// Channel whose peer is the raw returned stream
    fn attach_raw() -> (RpcChannel, mpsc::UnboundedReceiver<String>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let (handler, notes) = recorder();
        (RpcChannel::attach("test", reader, writer, handler), notes, remote)
    }

    fn pair() -> (RpcChannel, RpcChannel, mpsc::UnboundedReceiver<String>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let (left_handler, _) = recorder();
        let (right_handler, right_notes) = recorder();
        let left = RpcChannel::attach("left", a_read, a_write, left_handler);
        let right = RpcChannel::attach("right", b_read, b_write, right_handler);
        (left, right, right_notes)
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (left, _right, _) = pair();

        let sum: i64 = left
            .request_with_timeout(&TestCall::Add { left: 40, right: 2 }, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(sum, 42);
        assert_eq!(left.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_notifications_arrive_in_order() {
        let (left, _right, mut notes) = pair();

        for i in 0..50 {
            left.notify(&TestCall::Note { text: i.to_string() }).unwrap();
        }

        for i in 0..50 {
            assert_eq!(notes.recv().await.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_timeout_and_close_are_distinct() {
        let (channel, _notes, _peer) = attach_raw();

        let timed_out = channel
            .request_with_timeout::<_, i64>(&TestCall::Add { left: 1, right: 1 }, Duration::from_millis(50))
            .await;
        assert!(matches!(timed_out, Err(RpcError::Timeout(_))));
        assert_eq!(channel.pending_requests(), 0);

        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.request::<_, i64>(&TestCall::Add { left: 1, right: 1 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        let closed = waiting.await.unwrap();
        assert!(matches!(closed, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_requests_after_close_fail() {
        let (channel, _notes, _peer) = attach_raw();
        channel.close();
        channel.closed().await;

        let result = channel.request::<_, i64>(&TestCall::Add { left: 1, right: 2 }).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(channel.notify(&TestCall::Note { text: "late".into() }).is_err());
    }

    #[tokio::test]
    async fn test_peer_eof_closes_channel() {
        let (channel, _notes, peer) = attach_raw();
        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.request::<_, i64>(&TestCall::Add { left: 1, right: 1 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(peer);
        channel.closed().await;
        assert!(matches!(waiting.await.unwrap(), Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (_channel, mut notes, mut peer) = attach_raw();

        peer.write_all(b"this is not json\n").await.unwrap();
        peer.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"Note\",\"params\":{\"wrong\":1}}\n")
            .await
            .unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"Note\",\"params\":{\"text\":\"still alive\"}}\n")
            .await
            .unwrap();

        assert_eq!(notes.recv().await.unwrap(), "still alive");
    }

    #[tokio::test]
    async fn test_unknown_method_gets_error_response() {
        let (_channel, _notes, peer) = attach_raw();
        let (peer_read, mut peer_write) = tokio::io::split(peer);

        peer_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"Launch\"}\n")
            .await
            .unwrap();
        peer_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"Add\",\"params\":{\"left\":\"x\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(peer_read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        assert_eq!(first["id"], 7);
        assert_eq!(first["error"]["code"], -32601);
        assert_eq!(second["id"], 8);
        assert_eq!(second["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error_response() {
        let (_channel, mut notes, peer) = attach_raw();
        let (peer_read, mut peer_write) = tokio::io::split(peer);

        peer_write
            .write_all(b"{\"jsonrpc\":\"1.0\",\"id\":9,\"method\":\"Add\"}\n")
            .await
            .unwrap();
        peer_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"Note\",\"params\":{\"text\":\"after\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(peer_read).lines();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(notes.recv().await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_abandoned_requests_leave_nothing_pending() {
        let (channel, _notes, _peer) = attach_raw();

        for _ in 0..50 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(5),
                channel.request::<_, i64>(&TestCall::Add { left: 1, right: 1 }),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert_eq!(channel.pending_requests(), 0);
        assert!(!channel.is_closed());
    }

    struct Panicking;

    #[async_trait]
    impl RpcHandler for Panicking {
        type Call = TestCall;

        async fn handle(&self, call: TestCall, _peer: &RpcChannel) -> Result<Value, ErrorObject> {
            match call {
                TestCall::Add { .. } => Ok(Value::Null),
                TestCall::Note { text } => panic!("handler failed on {}", text),
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_closes_channel() {
        let (local, mut peer) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let channel = RpcChannel::attach("panicking", reader, writer, Panicking);

        let waiting = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.request::<_, i64>(&TestCall::Add { left: 1, right: 1 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"Note\",\"params\":{\"text\":\"boom\"}}\n")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), channel.closed())
            .await
            .expect("channel should close after the handler panicked");
        assert!(matches!(waiting.await.unwrap(), Err(RpcError::ConnectionClosed)));
        assert_eq!(channel.pending_requests(), 0);
    }
}
