//! # Warden VSOCK
//!
//! L4: the framed, typed-message multiplexer between host and sandbox
//! described in `spec.md` §4.5 and §6. A [`Frame`] is an 8-byte
//! big-endian header (`body_len: u32`, `message_type: u32`) followed by a
//! UTF-8 JSON body. [`VsockChannel`] supports two modes:
//!
//! - **Local**: a single in-process handler answers `execute` calls
//!   directly, bypassing the wire entirely — used when host and sandbox
//!   share a process.
//! - **Wire**: `execute` serializes and hands the frame to a
//!   [`Transport`], then awaits a correlated result delivered later via
//!   [`VsockChannel::deliver_result`]. Results that arrive before their
//!   matching `receive` call are retained so a late `receive` still
//!   resolves (out-of-order delivery).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use warden_error::WardenError;

/// Wire message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// A `TaskPayload` body.
    Payload = 1,
    /// A `TaskResult` body.
    Result = 2,
}

impl MessageType {
    fn from_u32(v: u32) -> Result<Self, WardenError> {
        match v {
            1 => Ok(Self::Payload),
            2 => Ok(Self::Result),
            other => Err(WardenError::UnknownType { type_tag: other }),
        }
    }
}

/// A task dispatched from the host to a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Correlates this payload with its eventual [`TaskResult`].
    pub task_id: String,
    /// Agent issuing the task.
    pub agent_id: String,
    /// Action name, checked against isolation/policy before dispatch.
    pub action: String,
    /// Free-form arguments.
    pub args: serde_json::Value,
    /// Optional per-task timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// The outcome of executing a [`TaskPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Matches the originating payload's `task_id`.
    pub task_id: String,
    /// Whether the task succeeded.
    pub success: bool,
    /// Output value, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error message, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
}

/// Encodes `message_type` + `body` into the 8-byte-prefixed wire frame.
#[must_use]
pub fn encode_frame(message_type: MessageType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&(message_type as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Parses a raw frame into its message type and body slice.
pub fn parse_frame(bytes: &[u8]) -> Result<(MessageType, &[u8]), WardenError> {
    if bytes.len() < 8 {
        return Err(WardenError::FrameTooShort { len: bytes.len() });
    }
    let body_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let type_tag = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let message_type = MessageType::from_u32(type_tag)?;
    let body = &bytes[8..8 + body_len.min(bytes.len() - 8)];
    Ok((message_type, body))
}

/// Serializes a [`TaskPayload`] into a full wire frame.
pub fn serialize_payload(payload: &TaskPayload) -> Vec<u8> {
    let body = serde_json::to_vec(payload).expect("TaskPayload always serializes");
    encode_frame(MessageType::Payload, &body)
}

/// Serializes a [`TaskResult`] into a full wire frame.
pub fn serialize_result(result: &TaskResult) -> Vec<u8> {
    let body = serde_json::to_vec(result).expect("TaskResult always serializes");
    encode_frame(MessageType::Result, &body)
}

/// Parses and asserts `MessageType::Payload`, then deserializes the body.
pub fn deserialize_payload(bytes: &[u8]) -> Result<TaskPayload, WardenError> {
    let (message_type, body) = parse_frame(bytes)?;
    if message_type != MessageType::Payload {
        return Err(WardenError::UnknownType {
            type_tag: message_type as u32,
        });
    }
    serde_json::from_slice(body).map_err(|e| WardenError::Other(e.to_string()))
}

/// Parses and asserts `MessageType::Result`, then deserializes the body.
pub fn deserialize_result(bytes: &[u8]) -> Result<TaskResult, WardenError> {
    let (message_type, body) = parse_frame(bytes)?;
    if message_type != MessageType::Result {
        return Err(WardenError::UnknownType {
            type_tag: message_type as u32,
        });
    }
    serde_json::from_slice(body).map_err(|e| WardenError::Other(e.to_string()))
}

/// Connection state of a [`VsockChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// `send`/`execute` fail with `NotConnected`.
    Disconnected,
    /// Channel is usable.
    Connected,
}

/// Boxed future returned by a local handler or transport.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Answers `execute` calls directly, in-process, bypassing the wire.
pub type LocalHandler = Arc<dyn Fn(TaskPayload) -> BoxFuture<TaskResult> + Send + Sync>;

/// Delivers a serialized frame to the remote sandbox. Wire-mode
/// implementations hand this to the real VSOCK/unix-socket transport;
/// tests can stub it to simply record what was sent.
pub type Transport = Arc<dyn Fn(Vec<u8>) -> BoxFuture<Result<(), WardenError>> + Send + Sync>;

/// Counters for sent/received/errored frames.
#[derive(Debug, Default)]
pub struct ChannelStats {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
}

impl ChannelStats {
    /// Number of frames sent.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
    /// Number of results received.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
    /// Number of send/receive errors recorded.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }
}

enum Mode {
    Local(LocalHandler),
    Wire(Transport),
    Unset,
}

struct Pending {
    waiters: HashMap<String, oneshot::Sender<TaskResult>>,
    stash: HashMap<String, TaskResult>,
}

/// The host-side multiplexed task channel.
pub struct VsockChannel {
    state: Mutex<ChannelState>,
    mode: Mutex<Mode>,
    pending: Mutex<Pending>,
    stats: ChannelStats,
}

impl Default for VsockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl VsockChannel {
    /// Creates a disconnected channel with no handler configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Disconnected),
            mode: Mutex::new(Mode::Unset),
            pending: Mutex::new(Pending {
                waiters: HashMap::new(),
                stash: HashMap::new(),
            }),
            stats: ChannelStats::default(),
        }
    }

    /// Registers the in-process local handler and marks the channel
    /// connected.
    pub fn connect_local(&self, handler: LocalHandler) {
        *self.mode.lock() = Mode::Local(handler);
        *self.state.lock() = ChannelState::Connected;
    }

    /// Registers the wire transport and marks the channel connected.
    pub fn connect_wire(&self, transport: Transport) {
        *self.mode.lock() = Mode::Wire(transport);
        *self.state.lock() = ChannelState::Connected;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Disconnects the channel, rejecting every pending `receive` with
    /// [`WardenError::ChannelDisconnected`].
    pub fn disconnect(&self) {
        *self.state.lock() = ChannelState::Disconnected;
        let mut pending = self.pending.lock();
        for (_, waiter) in pending.waiters.drain() {
            // A dropped sender resolves the receiver with `RecvError`;
            // `receive` below maps that to `ChannelDisconnected`.
            drop(waiter);
        }
        pending.stash.clear();
    }

    /// Delivers a result for an in-flight (or not-yet-awaited) task.
    /// Out-of-order delivery is supported: if no one is waiting on
    /// `result.task_id` yet, it is stashed until `receive` is called.
    pub fn deliver_result(&self, result: TaskResult) {
        self.stats.received.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock();
        if let Some(waiter) = pending.waiters.remove(&result.task_id) {
            let _ = waiter.send(result);
        } else {
            pending.stash.insert(result.task_id.clone(), result);
        }
    }

    /// Awaits the result for `task_id`, consuming a stashed result
    /// immediately if it already arrived.
    pub async fn receive(
        &self,
        task_id: &str,
        timeout_ms: u64,
    ) -> Result<TaskResult, WardenError> {
        if let Some(result) = self.pending.lock().stash.remove(task_id) {
            return Ok(result);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().waiters.insert(task_id.to_string(), tx);

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_recv_error)) => {
                self.stats.errors.fetch_add(1, Ordering::SeqCst);
                Err(WardenError::ChannelDisconnected)
            }
            Err(_elapsed) => {
                self.pending.lock().waiters.remove(task_id);
                self.stats.errors.fetch_add(1, Ordering::SeqCst);
                Err(WardenError::Timeout {
                    operation: "vsock_receive".to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Sends a raw frame. Fails with `NotConnected` before `connect_*` is
    /// called.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), WardenError> {
        if self.state() == ChannelState::Disconnected {
            return Err(WardenError::NotConnected);
        }
        let transport = match &*self.mode.lock() {
            Mode::Wire(transport) => Some(transport.clone()),
            _ => None,
        };
        self.stats.sent.fetch_add(1, Ordering::SeqCst);
        if let Some(transport) = transport {
            transport(frame).await?;
        }
        Ok(())
    }

    /// Executes a task, dispatching to the local handler or the wire
    /// transport depending on which `connect_*` was used.
    pub async fn execute(
        &self,
        payload: TaskPayload,
        timeout_ms: u64,
    ) -> Result<TaskResult, WardenError> {
        if self.state() == ChannelState::Disconnected {
            return Err(WardenError::NotConnected);
        }

        let handler = match &*self.mode.lock() {
            Mode::Local(handler) => Some(handler.clone()),
            _ => None,
        };

        if let Some(handler) = handler {
            let fut = handler(payload);
            return tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .map_err(|_elapsed| WardenError::Timeout {
                    operation: "vsock_execute".to_string(),
                    timeout_ms,
                });
        }

        let task_id = payload.task_id.clone();
        let frame = serialize_payload(&payload);
        self.send(frame).await?;
        self.receive(&task_id, timeout_ms).await
    }

    /// Frame counters.
    #[must_use]
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> TaskPayload {
        TaskPayload {
            task_id: "task-1".to_string(),
            agent_id: "agent-1".to_string(),
            action: "echo".to_string(),
            args: serde_json::json!({"x": 1}),
            timeout_ms: Some(5_000),
        }
    }

    #[test]
    fn parse_frame_rejects_short_buffers() {
        let err = parse_frame(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, WardenError::FrameTooShort { len: 3 }));
    }

    #[test]
    fn parse_frame_rejects_unknown_type() {
        let mut bytes = 0u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&99u32.to_be_bytes());
        let err = parse_frame(&bytes).unwrap_err();
        assert!(matches!(err, WardenError::UnknownType { type_tag: 99 }));
    }

    #[test]
    fn payload_round_trips_field_for_field() {
        let payload = sample_payload();
        let frame = serialize_payload(&payload);
        let decoded = deserialize_payload(&frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn result_round_trips_field_for_field() {
        let result = TaskResult {
            task_id: "task-1".to_string(),
            success: true,
            output: Some(serde_json::json!({"ok": true})),
            error: None,
            duration_ms: 42,
        };
        let frame = serialize_result(&result);
        let decoded = deserialize_result(&frame).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn deserialize_payload_rejects_result_frame() {
        let result = TaskResult {
            task_id: "t".to_string(),
            success: true,
            output: None,
            error: None,
            duration_ms: 0,
        };
        let frame = serialize_result(&result);
        assert!(deserialize_payload(&frame).is_err());
    }

    #[tokio::test]
    async fn send_fails_before_connect() {
        let channel = VsockChannel::new();
        let err = channel.send(vec![0; 8]).await.unwrap_err();
        assert!(matches!(err, WardenError::NotConnected));
    }

    #[tokio::test]
    async fn local_mode_execute_bypasses_wire() {
        let channel = VsockChannel::new();
        channel.connect_local(Arc::new(|payload: TaskPayload| {
            Box::pin(async move {
                TaskResult {
                    task_id: payload.task_id,
                    success: true,
                    output: Some(serde_json::json!("ok")),
                    error: None,
                    duration_ms: 1,
                }
            })
        }));
        let result = channel.execute(sample_payload(), 1_000).await.unwrap();
        assert!(result.success);
        assert_eq!(channel.stats().sent(), 0);
    }

    #[tokio::test]
    async fn wire_mode_execute_awaits_delivered_result() {
        let channel = Arc::new(VsockChannel::new());
        channel.connect_wire(Arc::new(|_frame| Box::pin(async { Ok(()) })));

        let channel_clone = channel.clone();
        let handle = tokio::spawn(async move { channel_clone.execute(sample_payload(), 1_000).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.deliver_result(TaskResult {
            task_id: "task-1".to_string(),
            success: true,
            output: None,
            error: None,
            duration_ms: 5,
        });

        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(channel.stats().sent(), 1);
    }

    #[tokio::test]
    async fn out_of_order_delivery_is_stashed_for_later_receive() {
        let channel = VsockChannel::new();
        channel.connect_wire(Arc::new(|_frame| Box::pin(async { Ok(()) })));
        channel.deliver_result(TaskResult {
            task_id: "early".to_string(),
            success: true,
            output: None,
            error: None,
            duration_ms: 1,
        });
        let result = channel.receive("early", 100).await.unwrap();
        assert_eq!(result.task_id, "early");
    }

    #[tokio::test]
    async fn concurrent_receives_resolve_to_their_own_ids_regardless_of_delivery_order() {
        let channel = Arc::new(VsockChannel::new());
        channel.connect_wire(Arc::new(|_frame| Box::pin(async { Ok(()) })));

        let mut handles = Vec::new();
        for i in 0..10 {
            let channel = channel.clone();
            handles.push(tokio::spawn(async move {
                channel.receive(&format!("task-mux-{i}"), 2_000).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in (0..10).rev() {
            channel.deliver_result(TaskResult {
                task_id: format!("task-mux-{i}"),
                success: true,
                output: None,
                error: None,
                duration_ms: 0,
            });
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.task_id, format!("task-mux-{i}"));
        }
    }

    #[tokio::test]
    async fn disconnect_rejects_pending_receives() {
        let channel = Arc::new(VsockChannel::new());
        channel.connect_wire(Arc::new(|_frame| Box::pin(async { Ok(()) })));

        let channel_clone = channel.clone();
        let handle = tokio::spawn(async move { channel_clone.receive("never-arrives", 5_000).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.disconnect();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, WardenError::ChannelDisconnected));
    }

    #[tokio::test]
    async fn receive_times_out_when_nothing_arrives() {
        let channel = VsockChannel::new();
        channel.connect_wire(Arc::new(|_frame| Box::pin(async { Ok(()) })));
        let err = channel.receive("task-x", 30).await.unwrap_err();
        assert!(matches!(err, WardenError::Timeout { .. }));
    }
}
