//! # Warden Core
//!
//! Foundational types shared by every other `warden-*` crate: a [`Clock`]
//! abstraction (L0 of the layering in `SPEC_FULL.md`) and the strongly-typed
//! identifiers used throughout the sandbox, audit and recovery subsystems.
//!
//! Nothing in this crate talks to a sandbox, a policy, or the network — it
//! is pure data and time, intentionally dependency-light so every layer
//! above can depend on it without pulling anything else in.

pub mod clock;
pub mod id;
pub mod ids;

pub use clock::{Clock, FixedClock, SystemClock};
pub use id::*;
pub use ids::generate_prefixed_id;
