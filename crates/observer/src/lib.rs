//! # Warden Observer
//!
//! L7: the read-side of the sandbox manager. [`Observer`] attaches to a
//! [`warden_sandbox::SandboxManager`] (and, optionally, a
//! [`warden_isolation::IsolationManager`]), subscribes to their event
//! streams, and derives rollup metrics and a bounded recent-events ring
//! without owning any of the state it reports on. [`HypercoreBridge`] wraps
//! an `Observer` with an append-only event store, the same
//! subscribe-and-project shape `nebula-telemetry`'s `EventBus` uses for
//! execution events.

pub mod bridge;
pub mod observer;

pub use bridge::HypercoreBridge;
pub use observer::{HealthEvent, Observer, ObserverMetrics, RecentEvent};
