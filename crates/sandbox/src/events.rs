//! Sandbox manager event broadcast (`spec.md` §6 "Events"). Uses
//! `tokio::sync::broadcast`, the same fire-and-forget bus the teacher's
//! `nebula-resource` crate builds for its own lifecycle events.

use tokio::sync::broadcast;
use warden_core::SandboxId;

/// Events broadcast by the sandbox manager.
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    /// The manager finished `initialize()` and is accepting `spawn` calls.
    Ready,
    /// A sandbox finished booting successfully.
    Spawned {
        /// The new sandbox's id.
        id: SandboxId,
    },
    /// A sandbox was paused.
    Paused {
        /// The paused sandbox's id.
        id: SandboxId,
    },
    /// A sandbox was resumed.
    Resumed {
        /// The resumed sandbox's id.
        id: SandboxId,
    },
    /// A sandbox was terminated.
    Terminated {
        /// The terminated sandbox's id.
        id: SandboxId,
    },
    /// A task finished executing inside a sandbox.
    TaskExecuted {
        /// The sandbox the task ran in.
        id: SandboxId,
        /// The task's correlation id.
        task_id: String,
        /// Whether the task succeeded.
        success: bool,
    },
    /// An error occurred. `id` is `None` for manager-wide failures.
    Error {
        /// The sandbox involved, if any.
        id: Option<SandboxId>,
        /// Human-readable error description.
        message: String,
    },
}

/// Broadcast-based event bus for sandbox manager events. Emission is
/// fire-and-forget: with no subscribers, or a full channel, events are
/// silently dropped.
pub struct EventBus {
    sender: broadcast::Sender<SandboxEvent>,
}

impl EventBus {
    /// Creates a bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: SandboxEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(SandboxEvent::Ready);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = SandboxId::v4();
        bus.emit(SandboxEvent::Spawned { id });
        match rx.recv().await.unwrap() {
            SandboxEvent::Spawned { id: got } => assert_eq!(got, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
